//! 应用配置管理
//! 流水线配置（集合/分层/评分）与输出选项合并在同一个 JSON 文件中

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use yara_forge_engine::ForgeConfig;

use crate::error::{AppError, AppResult};

/// 输出选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOptions {
    /// 规则包输出目录
    pub dir: PathBuf,
    /// 文件名前缀：`<prefix>-<tier>.yar`
    pub file_prefix: String,
    /// 是否写出 build_report.json
    pub report: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("packages"),
            file_prefix: "yara-rules".to_string(),
            report: false,
        }
    }
}

impl OutputOptions {
    pub fn package_path(&self, tier: &str) -> PathBuf {
        self.dir.join(format!("{}-{}.yar", self.file_prefix, tier))
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join("build_report.json")
    }
}

/// 完整应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(flatten)]
    pub forge: ForgeConfig,
    pub output: OutputOptions,
    /// 集合本地检出的根目录（未显式配置 path 的集合位于 `<staging_dir>/<repo>`）
    pub staging_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            forge: ForgeConfig::default(),
            output: OutputOptions::default(),
            staging_dir: PathBuf::from("repos"),
        }
    }
}

impl AppConfig {
    /// 从 JSON 文件加载并校验
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::ConfigLoadError(format!("读取配置文件失败: {} - {}", path.display(), e))
        })?;
        Self::from_json(&content)
            .map_err(|e| AppError::ConfigLoadError(format!("{} - {}", path.display(), e)))
    }

    pub fn from_json(content: &str) -> AppResult<Self> {
        let config: AppConfig = serde_json::from_str(content)?;
        config.forge.validate()?;
        Ok(config)
    }
}

/// 自定义构建器（链式 API），CLI 参数覆盖配置文件
#[derive(Debug, Clone, Default)]
pub struct CustomConfigBuilder {
    config: AppConfig,
}

impl CustomConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn output_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.dir = dir;
        self
    }

    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.output.file_prefix = prefix.into();
        self
    }

    pub fn report(mut self, enabled: bool) -> Self {
        self.config.output.report = enabled;
        self
    }

    pub fn staging_dir(mut self, dir: PathBuf) -> Self {
        self.config.staging_dir = dir;
        self
    }

    pub fn forge(mut self, forge: ForgeConfig) -> Self {
        self.config.forge = forge;
        self
    }

    pub fn build(self) -> AppResult<AppConfig> {
        self.config.forge.validate()?;
        Ok(self.config)
    }
}
