//! 命令行参数与终端输出格式

use clap::Parser;
use std::path::PathBuf;

use crate::config::{AppConfig, CustomConfigBuilder};
use crate::error::AppResult;
use crate::logging::DEFAULT_LOG_FILE;

/// 分节标题宽度
const SECTION_WIDTH: usize = 72;

/// YARA Forge: 将多个 YARA 规则集合归一化、去重、评分并按质量分层打包
#[derive(Parser, Debug, Default)]
#[command(name = "yara-forge", version, about)]
pub struct Cli {
    /// JSON 配置文件（缺省使用内置集合与分层）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 规则包输出目录
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// 输出文件名前缀
    #[arg(short, long)]
    pub prefix: Option<String>,

    /// 额外写出 build_report.json
    #[arg(long)]
    pub report: bool,

    /// 输出调试日志
    #[arg(long)]
    pub debug: bool,

    /// 调试日志文件（始终记录 debug 级别）
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,
}

impl Cli {
    /// 加载配置文件并应用命令行覆盖项
    pub fn resolve_config(&self) -> AppResult<AppConfig> {
        let base = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };

        let mut builder = CustomConfigBuilder::from_config(base);
        if let Some(dir) = &self.output_dir {
            builder = builder.output_dir(dir.clone());
        }
        if let Some(prefix) = &self.prefix {
            builder = builder.file_prefix(prefix.clone());
        }
        if self.report {
            builder = builder.report(true);
        }
        builder.build()
    }
}

pub fn banner() -> String {
    let rule = "=".repeat(SECTION_WIDTH);
    format!(
        "{rule}\n{}\n{}\n{}\n{rule}",
        center("Y A R A   F O R G E"),
        center("Aligning hundreds of YARA rules to a common standard"),
        center(&format!("v{}", env!("CARGO_PKG_VERSION"))),
    )
}

/// 分节标题：标题大写居中，上下各一行 `=`
pub fn section_header(title: &str) -> String {
    let rule = "=".repeat(SECTION_WIDTH);
    format!("{rule}\n{}\n{rule}", center(&title.to_uppercase()))
}

fn center(text: &str) -> String {
    format!("{:^width$}", text, width = SECTION_WIDTH)
        .trim_end()
        .to_string()
}
