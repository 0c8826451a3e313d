use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::normalized::NormalizedRule;

/// 某个集合贡献的许可证文本
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseEntry {
    pub collection: String,
    pub text: String,
}

/// 单个输出分层（core / extended / full ...）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulePackage {
    pub tier: String,
    pub min_score: u8,
    /// 按 (命名空间, 规范名) 排序的规则
    pub rules: Vec<NormalizedRule>,
    /// 集合名 → 规则数
    pub collection_counts: BTreeMap<String, usize>,
    /// 去重后的许可证文本（按集合名排序）
    pub licenses: Vec<LicenseEntry>,
    /// 规则所需模块导入（排序去重）
    pub imports: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl RulePackage {
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn contains(&self, canonical_name: &str) -> bool {
        self.rules.iter().any(|r| r.canonical_name == canonical_name)
    }
}
