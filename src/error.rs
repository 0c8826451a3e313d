//! 全局错误类型定义

use thiserror::Error;
use serde_json::Error as SerdeJsonError;
use std::io::Error as IoError;
use walkdir::Error as WalkDirError;
use yara_forge_engine::ForgeError;

#[derive(Error, Debug)]
pub enum AppError {
    // 配置相关错误
    #[error("配置加载失败：{0}")]
    ConfigLoadError(String),

    // 规则采集相关错误
    #[error("规则集合采集失败：{0}")]
    CollectError(String),
    #[error("目录遍历失败：{0}")]
    WalkDirError(#[from] WalkDirError),

    // 输出相关错误
    #[error("规则包写出失败：{0}")]
    OutputError(String),

    // 流水线内核错误
    #[error(transparent)]
    Forge(#[from] ForgeError),

    // 序列化/反序列化错误
    #[error("JSON解析失败：{0}")]
    JsonError(#[from] SerdeJsonError),

    // 中断信号处理安装失败
    #[error("无法安装中断处理：{0}")]
    SignalError(#[from] ctrlc::Error),

    // 基础错误
    #[error("IO操作失败：{0}")]
    IoError(#[from] IoError),
}

impl AppError {
    /// 运行级失败：流水线内核判定的致命错误，或全部输出均失败
    pub fn is_fatal(&self) -> bool {
        match self {
            AppError::Forge(e) => e.is_fatal(),
            AppError::CollectError(_) => false,
            _ => true,
        }
    }
}

// 全局Result类型
pub type AppResult<T> = Result<T, AppError>;
