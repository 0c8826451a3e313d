use serde::{Deserialize, Serialize};

use super::enums::{MetaValue, RuleModifiers};
use super::pattern::{MetaEntry, PatternDef};

/// 解析器产出的原始规则，字段结构松散、未做任何默认值填充
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRule {
    pub name: String,
    #[serde(default)]
    pub modifiers: RuleModifiers,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: Vec<MetaEntry>,
    #[serde(default)]
    pub patterns: Vec<PatternDef>,
    pub condition: String,
    /// 所在文件声明的模块导入（pe / math / hash ...）
    #[serde(default)]
    pub imports: Vec<String>,
    /// 相对于规则集合根目录的文件路径
    #[serde(default)]
    pub file_path: String,
}

impl RawRule {
    /// 按键名查找第一条元数据（大小写不敏感）
    pub fn meta_value(&self, key: &str) -> Option<&MetaValue> {
        self.meta
            .iter()
            .find(|entry| entry.key.eq_ignore_ascii_case(key))
            .map(|entry| &entry.value)
    }
}
