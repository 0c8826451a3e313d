//! yara-forge - 多来源 YARA 规则整理工具
//! 采集本地规则集合，经 yara-forge-engine 归一化、去重、评分后按质量分层写出规则包

// 全局错误类型
pub mod error;
// 应用配置 + 构建器
pub mod config;
// 本地规则集合采集
pub mod collector;
// 规则包与构建报告写出
pub mod output;
// 命令行参数
pub mod cli;
// 日志初始化
pub mod logging;
// 运行编排
pub mod runner;

pub use self::error::{AppError, AppResult};
pub use self::config::{AppConfig, CustomConfigBuilder, OutputOptions};
pub use self::collector::LocalCollector;
pub use self::output::{BuildReport, PackageWriter, TierWriteOutcome};
pub use self::cli::{banner, section_header, Cli};
pub use self::logging::init_logger;
pub use self::runner::{ForgeRunner, RunSummary};

// 引擎常用类型
pub use yara_forge_engine::{
    ForgeConfig, ForgeError, ForgePipeline, PipelineOutput, SourceCollection, TierConfig,
};
