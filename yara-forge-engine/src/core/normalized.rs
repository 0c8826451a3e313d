use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use super::enums::RuleModifiers;
use super::pattern::{MetaEntry, PatternDef};

/// 内容指纹（SHA-256 十六进制），与规则名、元数据无关
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 取前 n 个十六进制字符，用于冲突后缀
    pub fn short(&self, n: usize) -> &str {
        &self.0[..n.min(self.0.len())]
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 出处信息：规则来自哪个集合、哪个文件、何时检索
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub collection: String,
    pub collection_url: String,
    pub file_path: String,
    pub retrieved_at: DateTime<Utc>,
}

/// 规则自身声明了哪些标准字段（区分"声明"与"由集合默认值填充"）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredFields {
    pub any_metadata: bool,
    pub author: bool,
    pub description: bool,
    pub reference: bool,
    pub date: bool,
    pub license: bool,
}

impl DeclaredFields {
    /// 作者、描述、参考、日期是否全部声明
    pub fn is_complete(&self) -> bool {
        self.author && self.description && self.reference && self.date
    }
}

/// 归一化后的规则：字段类型明确，内核逻辑只读取这些字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRule {
    pub namespace: String,
    pub canonical_name: String,
    pub original_name: String,
    pub modifiers: RuleModifiers,
    pub tags: Vec<String>,

    // ===== 标准元数据 =====
    pub author: String,
    pub license: Option<String>,
    pub date: String,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub declared: DeclaredFields,
    /// 内核不解释的透传元数据
    pub extra_meta: Vec<MetaEntry>,

    // ===== 规则内容（原样透传）=====
    pub patterns: Vec<PatternDef>,
    pub condition: String,
    pub imports: Vec<String>,
    /// 条件引用的其它规则（最终规范名），去重阶段填充
    #[serde(default)]
    pub references: Vec<String>,

    pub fingerprint: Fingerprint,
    /// 质量分，评分阶段之前为 None
    pub quality: Option<u8>,
    /// 所属集合的基础质量分
    pub base_quality: u8,
    /// 是否为私有/内部规则（不进入任何公开分层）
    pub private: bool,
    pub provenance: Provenance,
}

impl NormalizedRule {
    /// 去重/冲突裁决用的排序键：质量分高者优先，其次基础质量高者，最后规范名字典序小者
    pub fn precedes(&self, other: &NormalizedRule) -> bool {
        self.precedence_cmp(other) == std::cmp::Ordering::Less
    }

    pub fn precedence_cmp(&self, other: &NormalizedRule) -> std::cmp::Ordering {
        other
            .quality
            .cmp(&self.quality)
            .then_with(|| other.base_quality.cmp(&self.base_quality))
            .then_with(|| self.canonical_name.cmp(&other.canonical_name))
            .then_with(|| self.provenance.collection.cmp(&other.provenance.collection))
            .then_with(|| self.provenance.file_path.cmp(&other.provenance.file_path))
    }

    pub fn score(&self) -> u8 {
        self.quality.unwrap_or(0)
    }
}
