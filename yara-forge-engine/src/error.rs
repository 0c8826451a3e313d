//! yara-forge-engine 内核错误定义
//! 封装流水线各阶段的错误，与应用层（文件读写/CLI）错误解耦，基于thiserror实现类型安全处理
use thiserror::Error;

use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;

/// 内核核心错误枚举
/// 单条规则/单个分层级别的错误均可在本地恢复，只有写出失败与空输入属于运行级失败
#[derive(Error, Debug)]
pub enum ForgeError {
    // ===================== 规则相关错误 =====================
    /// 单条规则归一化失败（跳过该规则，继续处理）
    #[error("Malformed rule '{rule}' in {file}: {reason}")]
    MalformedRule {
        rule: String,
        file: String,
        reason: String,
    },

    /// 规则文本解析失败（整个文件被跳过）
    #[error("Rule parse failed: {0}")]
    RuleParseError(String),

    /// 规范名冲突（由去重器自动追加后缀解决）
    #[error("Canonical name collision on '{name}', renamed to '{renamed}'")]
    NameCollision { name: String, renamed: String },

    /// 内容重复（常规结果，不会作为失败上报）
    #[error("Duplicate content: '{suppressed}' suppressed in favour of '{survivor}'")]
    DuplicateContent { survivor: String, suppressed: String },

    // ===================== 打包相关错误 =====================
    /// 某个分层没有任何规则（仍会输出仅含头部的包）
    #[error("Package '{0}' has no qualifying rules")]
    EmptyPackage(String),

    /// 规则引用的其它规则不在该分层中，规则被移出该分层
    #[error("Rule '{rule}' left out of package '{tier}': referenced rule '{reference}' is not in the package")]
    UnresolvedReference {
        rule: String,
        reference: String,
        tier: String,
    },

    /// 包写出失败（只影响该分层）
    #[error("Failed to write package '{tier}' to {path}: {reason}")]
    OutputWriteFailure {
        tier: String,
        path: String,
        reason: String,
    },

    /// 归一化之后没有任何可用规则（运行级失败）
    #[error("No usable rules after normalization")]
    NoUsableRules,

    // ===================== 内核基础错误 =====================
    /// 配置校验失败
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// 运行被外部取消
    #[error("Run cancelled")]
    Cancelled,

    #[error("IO operation failed: {0}")]
    Io(#[from] IoError),

    #[error("JSON error: {0}")]
    Json(#[from] SerdeJsonError),
}

impl ForgeError {
    /// 是否属于运行级失败（需以非零状态退出）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ForgeError::NoUsableRules
                | ForgeError::InvalidConfig(_)
                | ForgeError::Cancelled
                | ForgeError::Io(_)
                | ForgeError::Json(_)
        )
    }
}

/// 内核层全局Result类型别名
pub type CoreResult<T> = Result<T, ForgeError>;
