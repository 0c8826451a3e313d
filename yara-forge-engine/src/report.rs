//! 运行诊断与统计
//! 每个可恢复的问题都记录为一条 Diagnostic，并按其级别写入日志；
//! 各阶段的计数汇总在 StageStats 中，运行结束时统一输出

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::error::ForgeError;

/// 诊断级别，与日志级别一一对应
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl DiagnosticLevel {
    fn log_level(&self) -> log::Level {
        match self {
            DiagnosticLevel::Debug => log::Level::Debug,
            DiagnosticLevel::Info => log::Level::Info,
            DiagnosticLevel::Warning => log::Level::Warn,
            DiagnosticLevel::Error => log::Level::Error,
        }
    }
}

/// 诊断类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    FileSkipped,
    MalformedRule,
    NameCollision,
    DuplicateSuppressed,
    EmptyPackage,
    UnresolvedReference,
    OutputWriteFailure,
}

impl Display for DiagnosticKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiagnosticKind::FileSkipped => "file_skipped",
            DiagnosticKind::MalformedRule => "malformed_rule",
            DiagnosticKind::NameCollision => "name_collision",
            DiagnosticKind::DuplicateSuppressed => "duplicate_suppressed",
            DiagnosticKind::EmptyPackage => "empty_package",
            DiagnosticKind::UnresolvedReference => "unresolved_reference",
            DiagnosticKind::OutputWriteFailure => "output_write_failure",
        };
        f.write_str(s)
    }
}

/// 单条结构化诊断事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub level: DiagnosticLevel,
    /// 相关规则集合（若有）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// 主体：文件路径 / 规则名 / 分层名
    pub subject: String,
    pub message: String,
}

impl Diagnostic {
    /// 由内核错误构造诊断，级别按错误分类决定
    pub fn from_error(error: &ForgeError, collection: Option<&str>) -> Option<Self> {
        let (kind, level, subject) = match error {
            ForgeError::RuleParseError(_) => {
                (DiagnosticKind::FileSkipped, DiagnosticLevel::Error, String::new())
            }
            ForgeError::MalformedRule { rule, .. } => {
                (DiagnosticKind::MalformedRule, DiagnosticLevel::Error, rule.clone())
            }
            ForgeError::NameCollision { name, .. } => {
                (DiagnosticKind::NameCollision, DiagnosticLevel::Warning, name.clone())
            }
            ForgeError::DuplicateContent { suppressed, .. } => (
                DiagnosticKind::DuplicateSuppressed,
                DiagnosticLevel::Debug,
                suppressed.clone(),
            ),
            ForgeError::EmptyPackage(tier) => {
                (DiagnosticKind::EmptyPackage, DiagnosticLevel::Warning, tier.clone())
            }
            ForgeError::UnresolvedReference { rule, .. } => (
                DiagnosticKind::UnresolvedReference,
                DiagnosticLevel::Warning,
                rule.clone(),
            ),
            ForgeError::OutputWriteFailure { tier, .. } => (
                DiagnosticKind::OutputWriteFailure,
                DiagnosticLevel::Error,
                tier.clone(),
            ),
            // 运行级错误不作为诊断记录，由调用方直接返回
            _ => return None,
        };
        Some(Self {
            kind,
            level,
            collection: collection.map(str::to_string),
            subject,
            message: error.to_string(),
        })
    }

    /// 文件级解析失败
    pub fn file_skipped(collection: &str, path: &str, error: &str) -> Self {
        Self {
            kind: DiagnosticKind::FileSkipped,
            level: DiagnosticLevel::Error,
            collection: Some(collection.to_string()),
            subject: path.to_string(),
            message: format!("Skipping rule file because of a syntax error: {}", error),
        }
    }

    pub fn emit(&self) {
        match &self.collection {
            Some(collection) => log::log!(
                self.level.log_level(),
                "[{}] [{}] {}",
                self.kind,
                collection,
                self.message
            ),
            None => log::log!(self.level.log_level(), "[{}] {}", self.kind, self.message),
        }
    }
}

/// 各阶段统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    // ========== 采集/归一化 ==========
    /// 输入文件总数
    pub files_total: u32,
    /// 解析失败被跳过的文件数
    pub files_skipped: u32,
    /// 输入规则总数
    pub raw_rules: u32,
    /// 归一化成功的规则数
    pub normalized_rules: u32,
    /// 格式错误被跳过的规则数
    pub malformed_rules: u32,

    // ========== 去重 ==========
    /// 被抑制的重复规则数
    pub suppressed_duplicates: u32,
    /// 出现重复的指纹组数
    pub duplicate_groups: u32,
    /// 改名解决的名称冲突数
    pub name_collisions: u32,
    /// 去重后存活的规则数
    pub surviving_rules: u32,

    // ========== 评分 ==========
    /// 私有/内部规则数（不进入任何分层）
    pub private_rules: u32,
    pub min_score: Option<u8>,
    pub max_score: Option<u8>,
}

impl StageStats {
    /// 格式化输出统计信息（结构化日志）
    pub fn print_stats(&self, total_time: std::time::Duration) {
        log::info!(
            "Normalization | Files: {} (skipped {}) | Raw rules: {} | Normalized: {} | Malformed: {}",
            self.files_total,
            self.files_skipped,
            self.raw_rules,
            self.normalized_rules,
            self.malformed_rules
        );
        log::info!(
            "Deduplication | Duplicate groups: {} | Suppressed: {} | Name collisions: {} | Surviving: {}",
            self.duplicate_groups,
            self.suppressed_duplicates,
            self.name_collisions,
            self.surviving_rules
        );
        log::info!(
            "Scoring | Private rules: {} | Score range: {}-{} | Time: {:?}",
            self.private_rules,
            self.min_score.map_or("-".to_string(), |s| s.to_string()),
            self.max_score.map_or("-".to_string(), |s| s.to_string()),
            total_time
        );
    }
}

/// 批处理报告：诊断事件 + 阶段统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub stats: StageStats,
    pub diagnostics: Vec<Diagnostic>,
}

impl BatchReport {
    /// 记录诊断并立即写日志
    pub fn push(&mut self, diagnostic: Diagnostic) {
        diagnostic.emit();
        self.diagnostics.push(diagnostic);
    }

    /// 记录可恢复的内核错误，运行级错误返回 false 且不记录
    pub fn record_error(&mut self, error: &ForgeError, collection: Option<&str>) -> bool {
        match Diagnostic::from_error(error, collection) {
            Some(diagnostic) => {
                self.push(diagnostic);
                true
            }
            None => false,
        }
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.diagnostics.iter().filter(|d| d.kind == kind).count()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }

    /// 合并另一份报告的诊断（统计字段由各阶段自行维护）
    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.push(diagnostic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_maps_to_warning() {
        let err = ForgeError::NameCollision {
            name: "A_x".into(),
            renamed: "A_x_deadbeef".into(),
        };
        let diagnostic = Diagnostic::from_error(&err, Some("A")).unwrap();
        assert_eq!(diagnostic.kind, DiagnosticKind::NameCollision);
        assert_eq!(diagnostic.level, DiagnosticLevel::Warning);
        assert_eq!(diagnostic.subject, "A_x");
    }

    #[test]
    fn run_level_errors_are_not_recorded() {
        let mut report = BatchReport::default();
        assert!(!report.record_error(&ForgeError::NoUsableRules, None));
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn counts_by_kind() {
        let mut report = BatchReport::default();
        report.push(Diagnostic::file_skipped("A", "bad.yar", "unexpected '}'"));
        report.record_error(&ForgeError::EmptyPackage("core".into()), None);
        assert_eq!(report.count(DiagnosticKind::FileSkipped), 1);
        assert_eq!(report.count(DiagnosticKind::EmptyPackage), 1);
        assert_eq!(report.count(DiagnosticKind::NameCollision), 0);
    }
}
