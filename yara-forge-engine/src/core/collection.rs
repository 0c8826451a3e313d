use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rule::RawRule;

/// 单个文件的解析结果：成功得到规则列表，或文件级解析失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileParseResult {
    Parsed { path: String, rules: Vec<RawRule> },
    Failed { path: String, error: String },
}

impl FileParseResult {
    pub fn path(&self) -> &str {
        match self {
            FileParseResult::Parsed { path, .. } | FileParseResult::Failed { path, .. } => path,
        }
    }
}

/// 上游规则集合（一个仓库 / 一个来源）
/// 由采集协作方在每次运行时创建，流水线内只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCollection {
    /// 展示名称（用于输出头部，同时是命名空间的推导来源）
    pub name: String,
    pub url: String,
    /// 规则未声明作者时使用的默认作者
    pub author: String,
    /// 基础质量分 0-100
    pub quality: u8,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub branch: String,
    pub retrieved_at: DateTime<Utc>,
    /// 显式命名空间（覆盖由名称推导的命名空间）
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub files: Vec<FileParseResult>,
}

impl SourceCollection {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        author: impl Into<String>,
        quality: u8,
        retrieved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            author: author.into(),
            quality: quality.min(100),
            license: None,
            branch: String::new(),
            retrieved_at,
            namespace: None,
            files: Vec::new(),
        }
    }

    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = Some(license.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// 追加一个成功解析的文件，规则的 file_path 统一改写为该文件路径
    pub fn push_rules(&mut self, path: impl Into<String>, mut rules: Vec<RawRule>) {
        let path = path.into();
        for rule in &mut rules {
            rule.file_path = path.clone();
        }
        self.files.push(FileParseResult::Parsed { path, rules });
    }

    pub fn push_failure(&mut self, path: impl Into<String>, error: impl Into<String>) {
        self.files.push(FileParseResult::Failed {
            path: path.into(),
            error: error.into(),
        });
    }

    /// 成功解析的规则总数
    pub fn rule_count(&self) -> usize {
        self.files
            .iter()
            .map(|f| match f {
                FileParseResult::Parsed { rules, .. } => rules.len(),
                FileParseResult::Failed { .. } => 0,
            })
            .sum()
    }

    /// 检索日期（`YYYY-MM-DD`），作为规则缺失 date 字段时的默认值
    pub fn retrieval_date(&self) -> String {
        self.retrieved_at.format("%Y-%m-%d").to_string()
    }
}
