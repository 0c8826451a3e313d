// 核心公共结构体+枚举
pub mod core;
// 流水线配置（集合、分层、评分信号）
pub mod config;
// 内核错误
pub mod error;
// 运行诊断+阶段统计
pub mod report;
// 规则源解析 (YARA 文本)
pub mod source;
// 归一化：命名空间+规范名+内容指纹
pub mod normalizer;
// 内容去重+名称冲突处理
pub mod dedup;
// 质量评分
pub mod scorer;
// 分层打包+渲染
pub mod assembler;
// 流水线驱动
pub mod processor;
// 日志格式化工具
pub mod utils;

// 顶层导出常用类型
pub use assembler::{render_package, PackageAssembler};
pub use config::{CollectionConfig, ForgeConfig, QualitySignal, ScoringConfig, TierConfig};
pub use core::{
    FileParseResult, Fingerprint, MetaEntry, MetaValue, NormalizedRule, PatternDef, RawRule,
    RulePackage, SourceCollection,
};
pub use dedup::{DedupOutcome, Deduplicator, DuplicateGroup};
pub use error::{CoreResult, ForgeError};
pub use normalizer::{NamespaceRegistry, Normalizer};
pub use processor::{ForgePipeline, PipelineOutput};
pub use report::{BatchReport, Diagnostic, DiagnosticKind, DiagnosticLevel, StageStats};
pub use scorer::QualityScorer;
pub use source::YaraParser;
