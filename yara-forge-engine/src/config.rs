//! 流水线配置：规则集合、分层阈值、评分调整规则
//! 全部通过 ForgeConfig 注入流水线，不依赖任何全局状态

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{CoreResult, ForgeError};

/// 单个规则集合的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// 展示名称，输出头部使用，也是命名空间的推导来源（尽量简短）
    pub name: String,
    pub url: String,
    /// 规则未声明作者时使用
    pub author: String,
    /// 0-100，集合整体的基础质量
    pub quality: u8,
    #[serde(default)]
    pub branch: String,
    /// 显式许可证文本，优先于仓库中的 LICENSE 文件
    #[serde(default)]
    pub license: Option<String>,
    /// 显式命名空间
    #[serde(default)]
    pub namespace: Option<String>,
    /// 本地检出目录，缺省为 repos/<仓库名>
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl CollectionConfig {
    /// 从 URL 提取 (owner, repo)，如 https://github.com/owner/repo.git
    pub fn owner_and_repo(&self) -> (String, String) {
        let parts: Vec<&str> = self
            .url
            .trim_end_matches('/')
            .split('/')
            .filter(|p| !p.is_empty())
            .collect();
        let repo = parts
            .last()
            .map(|r| r.split('.').next().unwrap_or(r).to_string())
            .unwrap_or_default();
        let owner = if parts.len() >= 2 {
            parts[parts.len() - 2].to_string()
        } else {
            String::new()
        };
        (owner, repo)
    }

    /// 本地目录：显式配置优先，否则为 staging_dir/<repo>
    pub fn local_path(&self, staging_dir: &std::path::Path) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => staging_dir.join(self.owner_and_repo().1),
        }
    }
}

/// 输出分层配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    pub min_score: u8,
}

impl TierConfig {
    pub fn new(name: impl Into<String>, min_score: u8) -> Self {
        Self {
            name: name.into(),
            min_score,
        }
    }
}

/// 规则级质量信号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualitySignal {
    CompleteMetadata,
    NoMetadata,
    HasAuthor,
    HasDescription,
    HasReference,
    PrivateRule,
    BroadWildcard,
    ShortPattern,
    Stale,
}

impl QualitySignal {
    pub const ALL: [QualitySignal; 9] = [
        QualitySignal::CompleteMetadata,
        QualitySignal::NoMetadata,
        QualitySignal::HasAuthor,
        QualitySignal::HasDescription,
        QualitySignal::HasReference,
        QualitySignal::PrivateRule,
        QualitySignal::BroadWildcard,
        QualitySignal::ShortPattern,
        QualitySignal::Stale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualitySignal::CompleteMetadata => "complete_metadata",
            QualitySignal::NoMetadata => "no_metadata",
            QualitySignal::HasAuthor => "has_author",
            QualitySignal::HasDescription => "has_description",
            QualitySignal::HasReference => "has_reference",
            QualitySignal::PrivateRule => "private_rule",
            QualitySignal::BroadWildcard => "broad_wildcard",
            QualitySignal::ShortPattern => "short_pattern",
            QualitySignal::Stale => "stale",
        }
    }

    /// 默认分值调整
    pub fn default_delta(&self) -> i32 {
        match self {
            QualitySignal::CompleteMetadata => 5,
            QualitySignal::NoMetadata => -15,
            QualitySignal::HasAuthor => 2,
            QualitySignal::HasDescription => 2,
            QualitySignal::HasReference => 3,
            QualitySignal::PrivateRule => -20,
            QualitySignal::BroadWildcard => -15,
            QualitySignal::ShortPattern => -5,
            QualitySignal::Stale => -5,
        }
    }
}

impl Display for QualitySignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualitySignal {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QualitySignal::ALL
            .iter()
            .copied()
            .find(|signal| signal.as_str() == s)
            .ok_or_else(|| ForgeError::InvalidConfig(format!("unknown quality signal '{}'", s)))
    }
}

/// 评分配置：信号名 → 分值调整
/// 新增启发式只需增加信号与配置项，无需改动评分算法
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub adjustments: BTreeMap<String, i32>,
    /// 规则日期早于该天数视为陈旧，None 表示不检查
    pub stale_after_days: Option<i64>,
    /// 短模式阈值（字节）
    pub min_pattern_len: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            adjustments: QualitySignal::ALL
                .iter()
                .map(|s| (s.as_str().to_string(), s.default_delta()))
                .collect(),
            stale_after_days: Some(5 * 365),
            min_pattern_len: 4,
        }
    }
}

/// 单次调整的上下界
pub const MAX_ADJUSTMENT: i32 = 100;

impl ScoringConfig {
    /// 解析为 信号 → 分值
    /// 未配置的信号取默认值（置 0 即关闭），未知信号名记录告警后忽略，分值截断到 [-100, 100]
    pub fn resolved_adjustments(&self) -> BTreeMap<QualitySignal, i32> {
        let mut resolved: BTreeMap<QualitySignal, i32> = QualitySignal::ALL
            .iter()
            .map(|s| (*s, s.default_delta()))
            .collect();
        for (name, delta) in &self.adjustments {
            match name.parse::<QualitySignal>() {
                Ok(signal) => {
                    resolved.insert(signal, (*delta).clamp(-MAX_ADJUSTMENT, MAX_ADJUSTMENT));
                }
                Err(_) => log::warn!("Ignoring unknown scoring signal '{}'", name),
            }
        }
        resolved
    }
}

/// 流水线完整配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub collections: Vec<CollectionConfig>,
    /// 分层列表，按选择性从高到低排列
    pub tiers: Vec<TierConfig>,
    pub scoring: ScoringConfig,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            collections: default_collections(),
            tiers: default_tiers(),
            scoring: ScoringConfig::default(),
        }
    }
}

/// 内置规则集合列表
pub fn default_collections() -> Vec<CollectionConfig> {
    vec![
        CollectionConfig {
            name: "YARA Style Guide".to_string(),
            url: "https://github.com/Neo23x0/YARA-Style-Guide".to_string(),
            author: "Florian Roth".to_string(),
            quality: 80,
            branch: "master".to_string(),
            license: None,
            namespace: None,
            path: None,
        },
        CollectionConfig {
            name: "ReversingLabs".to_string(),
            url: "https://github.com/reversinglabs/reversinglabs-yara-rules/".to_string(),
            author: "ReversingLabs".to_string(),
            quality: 90,
            branch: "develop".to_string(),
            license: None,
            namespace: None,
            path: None,
        },
    ]
}

pub fn default_tiers() -> Vec<TierConfig> {
    vec![
        TierConfig::new("core", 80),
        TierConfig::new("extended", 60),
        TierConfig::new("full", 0),
    ]
}

impl ForgeConfig {
    /// 校验配置：集合质量、分层名唯一、阈值单调不增
    pub fn validate(&self) -> CoreResult<()> {
        for collection in &self.collections {
            if collection.name.trim().is_empty() {
                return Err(ForgeError::InvalidConfig(
                    "collection name must not be empty".to_string(),
                ));
            }
            if collection.quality > 100 {
                return Err(ForgeError::InvalidConfig(format!(
                    "collection '{}' has quality {} outside 0-100",
                    collection.name, collection.quality
                )));
            }
        }

        if self.tiers.is_empty() {
            return Err(ForgeError::InvalidConfig(
                "at least one tier must be configured".to_string(),
            ));
        }

        let mut seen = std::collections::BTreeSet::new();
        let mut previous: Option<&TierConfig> = None;
        for tier in &self.tiers {
            if tier.name.trim().is_empty() {
                return Err(ForgeError::InvalidConfig("tier name must not be empty".to_string()));
            }
            // 分层名会成为输出文件名的一部分
            if !is_tier_slug(&tier.name) {
                return Err(ForgeError::InvalidConfig(format!(
                    "tier name '{}' may only contain ASCII letters, digits, '_' and '-'",
                    tier.name
                )));
            }
            if !seen.insert(tier.name.as_str()) {
                return Err(ForgeError::InvalidConfig(format!(
                    "duplicate tier name '{}'",
                    tier.name
                )));
            }
            if tier.min_score > 100 {
                return Err(ForgeError::InvalidConfig(format!(
                    "tier '{}' threshold {} outside 0-100",
                    tier.name, tier.min_score
                )));
            }
            if let Some(prev) = previous {
                if tier.min_score > prev.min_score {
                    return Err(ForgeError::InvalidConfig(format!(
                        "tier '{}' (>= {}) is more selective than preceding tier '{}' (>= {})",
                        tier.name, tier.min_score, prev.name, prev.min_score
                    )));
                }
            }
            previous = Some(tier);
        }

        if let Some(days) = self.scoring.stale_after_days {
            if days <= 0 {
                return Err(ForgeError::InvalidConfig(format!(
                    "stale_after_days must be positive, got {}",
                    days
                )));
            }
        }

        Ok(())
    }
}

fn is_tier_slug(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
