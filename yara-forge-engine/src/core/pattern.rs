use serde::{Deserialize, Serialize};

use super::enums::{MetaValue, PatternKind};

/// 单条模式定义（strings 段的一行）
/// body 为 `=` 之后的全部文本（值 + 修饰符），原样透传，不做语义修改
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternDef {
    pub identifier: String,
    pub body: String,
}

impl PatternDef {
    pub fn new(identifier: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            body: body.into(),
        }
    }

    pub fn kind(&self) -> PatternKind {
        PatternKind::of_body(&self.body)
    }

    /// 匿名模式（`$ = ...`）允许重复声明
    pub fn is_anonymous(&self) -> bool {
        self.identifier == "$"
    }
}

/// 元数据键值对，保持声明顺序，允许重复键
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetaEntry {
    pub key: String,
    pub value: MetaValue,
}

impl MetaEntry {
    pub fn new(key: impl Into<String>, value: MetaValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

impl From<(&str, MetaValue)> for MetaEntry {
    fn from((key, value): (&str, MetaValue)) -> Self {
        MetaEntry::new(key, value)
    }
}
