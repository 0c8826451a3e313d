//! 规则归一化
//! RawRule + 所属集合 → NormalizedRule：命名空间、规范名、元数据默认值、内容指纹
//! 单条规则的处理互不依赖，可并行执行

pub mod fingerprint;
pub mod namespace;

use rustc_hash::FxHashSet;
use sha2::{Digest, Sha256};

use crate::core::{
    DeclaredFields, MetaEntry, NormalizedRule, Provenance, RawRule, SourceCollection,
};
use crate::error::{CoreResult, ForgeError};

pub use fingerprint::{canonical_condition, canonical_pattern_body, fingerprint};
pub use namespace::{namespace_slug, NamespaceRegistry};

/// 规则标识符长度上限
pub const MAX_IDENTIFIER_LEN: usize = 128;
/// 截断后追加的哈希长度
const TRUNCATION_HASH_LEN: usize = 8;

/// 由流水线统一写入的元数据键，输入中出现时一律丢弃
pub const SYSTEM_META_KEYS: [&str; 6] = [
    "quality",
    "logic_hash",
    "source_collection",
    "source_url",
    "source_file",
    "imported",
];

/// 参考链接的可接受键名
const REFERENCE_KEYS: [&str; 4] = ["reference", "ref", "url", "references"];

/// 标记规则为私有/内部的标签与元数据键
const PRIVATE_MARKERS: [&str; 2] = ["private", "internal"];

/// 名称清洗：保留 `[A-Za-z0-9_]`，其余字符替换为 `_`
pub fn sanitize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// 规范名：`<namespace>_<清洗后的名称>`
/// 已带有命名空间前缀时不重复添加；超长时截断并追加哈希
pub fn canonical_name(namespace: &str, original: &str) -> String {
    let sanitized = sanitize_name(original);
    let prefix = format!("{}_", namespace);
    let full = if sanitized.starts_with(&prefix) {
        sanitized
    } else {
        format!("{}{}", prefix, sanitized)
    };

    if full.len() <= MAX_IDENTIFIER_LEN {
        return full;
    }
    let digest = hex::encode(Sha256::digest(full.as_bytes()));
    let keep = MAX_IDENTIFIER_LEN - TRUNCATION_HASH_LEN - 1;
    // 规范名只含 ASCII，按字节截断是安全的
    format!("{}_{}", &full[..keep], &digest[..TRUNCATION_HASH_LEN])
}

fn is_system_key(key: &str) -> bool {
    SYSTEM_META_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k))
}

/// 规则是否声明为私有/内部
fn is_private(raw: &RawRule) -> bool {
    raw.modifiers.private
        || raw
            .tags
            .iter()
            .any(|t| PRIVATE_MARKERS.iter().any(|m| t.eq_ignore_ascii_case(m)))
        || raw.meta.iter().any(|entry| {
            PRIVATE_MARKERS.iter().any(|m| entry.key.eq_ignore_ascii_case(m)) && entry.value.is_truthy()
        })
}

/// 从元数据中提取的标准字段
#[derive(Debug, Default)]
struct LiftedMeta {
    author: Option<String>,
    license: Option<String>,
    date: Option<String>,
    description: Option<String>,
    reference: Option<String>,
    any_metadata: bool,
    extra: Vec<MetaEntry>,
}

impl LiftedMeta {
    /// 首个非空值进入标准字段，同名的后续条目作为透传元数据保留
    fn from_entries(entries: &[MetaEntry]) -> Self {
        let mut lifted = LiftedMeta::default();
        for entry in entries {
            let key = entry.key.to_ascii_lowercase();
            if is_system_key(&key) {
                continue;
            }
            lifted.any_metadata = true;

            let slot = match key.as_str() {
                "author" => Some(&mut lifted.author),
                "license" => Some(&mut lifted.license),
                "date" => Some(&mut lifted.date),
                "description" => Some(&mut lifted.description),
                k if REFERENCE_KEYS.contains(&k) => Some(&mut lifted.reference),
                _ => None,
            };
            match slot {
                Some(slot) if slot.is_none() => {
                    if !entry.value.is_blank() {
                        *slot = Some(entry.value.as_text().trim().to_string());
                    }
                }
                _ => lifted.extra.push(entry.clone()),
            }
        }
        lifted
    }
}

/// 规则归一化器
#[derive(Debug, Clone, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// 归一化单条规则；结构不合法时返回 MalformedRule，由调用方跳过
    pub fn normalize(
        &self,
        raw: &RawRule,
        collection: &SourceCollection,
        namespace: &str,
    ) -> CoreResult<NormalizedRule> {
        self.check_structure(raw)?;

        let lifted = LiftedMeta::from_entries(&raw.meta);
        let declared = DeclaredFields {
            any_metadata: lifted.any_metadata,
            author: lifted.author.is_some(),
            description: lifted.description.is_some(),
            reference: lifted.reference.is_some(),
            date: lifted.date.is_some(),
            license: lifted.license.is_some(),
        };

        let rule = NormalizedRule {
            namespace: namespace.to_string(),
            canonical_name: canonical_name(namespace, &raw.name),
            original_name: raw.name.clone(),
            modifiers: raw.modifiers,
            tags: raw.tags.clone(),
            author: lifted.author.unwrap_or_else(|| collection.author.clone()),
            license: lifted.license.or_else(|| collection.license.clone()),
            date: lifted.date.unwrap_or_else(|| collection.retrieval_date()),
            description: lifted.description,
            reference: lifted.reference,
            declared,
            extra_meta: lifted.extra,
            patterns: raw.patterns.clone(),
            condition: raw.condition.clone(),
            imports: raw.imports.clone(),
            references: Vec::new(),
            fingerprint: fingerprint(&raw.patterns, &raw.condition),
            quality: None,
            base_quality: collection.quality,
            private: is_private(raw),
            provenance: Provenance {
                collection: collection.name.clone(),
                collection_url: collection.url.clone(),
                file_path: raw.file_path.clone(),
                retrieved_at: collection.retrieved_at,
            },
        };

        log::trace!(
            "Normalized '{}' -> '{}' ({})",
            rule.original_name,
            rule.canonical_name,
            rule.fingerprint.short(12)
        );
        Ok(rule)
    }

    /// 结构校验
    fn check_structure(&self, raw: &RawRule) -> CoreResult<()> {
        let malformed = |reason: String| ForgeError::MalformedRule {
            rule: raw.name.clone(),
            file: raw.file_path.clone(),
            reason,
        };

        let sanitized = sanitize_name(&raw.name);
        if sanitized.is_empty() || sanitized.chars().all(|c| c == '_') {
            return Err(malformed("rule name is empty".to_string()));
        }
        if raw.condition.trim().is_empty() {
            return Err(malformed("empty condition".to_string()));
        }

        let mut seen = FxHashSet::default();
        for pattern in &raw.patterns {
            if pattern.body.trim().is_empty() {
                return Err(malformed(format!(
                    "pattern '{}' has an empty body",
                    pattern.identifier
                )));
            }
            if !pattern.is_anonymous() && !seen.insert(pattern.identifier.as_str()) {
                return Err(malformed(format!(
                    "pattern identifier '{}' declared twice",
                    pattern.identifier
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MetaValue, PatternDef, RuleModifiers};
    use chrono::{TimeZone, Utc};

    fn collection() -> SourceCollection {
        SourceCollection::new(
            "Acme Rules",
            "https://example.org/acme/rules",
            "Acme Team",
            70,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        )
        .with_license("MIT License")
    }

    fn raw(name: &str) -> RawRule {
        RawRule {
            name: name.to_string(),
            patterns: vec![PatternDef::new("$a", "\"evil\"")],
            condition: "$a".to_string(),
            file_path: "malware/evil.yar".to_string(),
            ..RawRule::default()
        }
    }

    #[test]
    fn canonical_name_is_prefixed_once() {
        assert_eq!(canonical_name("Acme", "Trojan.Generic-1"), "Acme_Trojan_Generic_1");
        assert_eq!(canonical_name("Acme", "Acme_Trojan"), "Acme_Trojan");
    }

    #[test]
    fn long_names_are_truncated_with_hash() {
        let long = "X".repeat(200);
        let name = canonical_name("Acme", &long);
        assert_eq!(name.len(), MAX_IDENTIFIER_LEN);
        assert!(name.starts_with("Acme_XXX"));
        assert_ne!(canonical_name("Acme", &"Y".repeat(200)), name);
        // 再次归一化保持不变
        assert_eq!(canonical_name("Acme", &name), name);
    }

    #[test]
    fn defaults_come_from_collection() {
        let rule = Normalizer::new().normalize(&raw("Evil"), &collection(), "Acme_Rules").unwrap();
        assert_eq!(rule.canonical_name, "Acme_Rules_Evil");
        assert_eq!(rule.author, "Acme Team");
        assert_eq!(rule.date, "2024-03-01");
        assert_eq!(rule.license.as_deref(), Some("MIT License"));
        assert_eq!(rule.declared, DeclaredFields::default());
        assert_eq!(rule.base_quality, 70);
        assert_eq!(rule.quality, None);
        assert_eq!(rule.provenance.file_path, "malware/evil.yar");
    }

    #[test]
    fn metadata_is_lifted_and_system_keys_dropped() {
        let mut input = raw("Evil");
        input.meta = vec![
            ("author", MetaValue::text("Jane")).into(),
            ("ref", MetaValue::text("https://example.org/r")).into(),
            ("quality", MetaValue::Integer(12)).into(),
            ("source_collection", MetaValue::text("Old")).into(),
            ("hash", MetaValue::text("abc")).into(),
            ("author", MetaValue::text("Second")).into(),
        ];
        let rule = Normalizer::new().normalize(&input, &collection(), "Acme_Rules").unwrap();
        assert_eq!(rule.author, "Jane");
        assert_eq!(rule.reference.as_deref(), Some("https://example.org/r"));
        assert!(rule.declared.author && rule.declared.reference && rule.declared.any_metadata);
        assert!(!rule.declared.description);
        let extra: Vec<&str> = rule.extra_meta.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(extra, vec!["hash", "author"]);
    }

    #[test]
    fn only_system_keys_count_as_no_metadata() {
        let mut input = raw("Evil");
        input.meta = vec![("logic_hash", MetaValue::text("00")).into()];
        let rule = Normalizer::new().normalize(&input, &collection(), "Acme_Rules").unwrap();
        assert!(!rule.declared.any_metadata);
    }

    #[test]
    fn private_markers_are_detected() {
        let normalizer = Normalizer::new();
        let mut by_modifier = raw("A");
        by_modifier.modifiers = RuleModifiers { private: true, global: false };
        let mut by_tag = raw("B");
        by_tag.tags = vec!["Internal".to_string()];
        let mut by_meta = raw("C");
        by_meta.meta = vec![("private", MetaValue::text("yes")).into()];
        let mut not_private = raw("D");
        not_private.meta = vec![("private", MetaValue::Bool(false)).into()];

        for (input, expected) in [(by_modifier, true), (by_tag, true), (by_meta, true), (not_private, false)] {
            let rule = normalizer.normalize(&input, &collection(), "Acme_Rules").unwrap();
            assert_eq!(rule.private, expected, "rule {}", input.name);
        }
    }

    #[test]
    fn malformed_rules_are_rejected() {
        let normalizer = Normalizer::new();
        let mut empty_condition = raw("A");
        empty_condition.condition = "  ".to_string();
        let mut empty_body = raw("B");
        empty_body.patterns.push(PatternDef::new("$b", ""));
        let mut duplicate = raw("C");
        duplicate.patterns.push(PatternDef::new("$a", "\"other\""));
        let empty_name = raw("--");

        for input in [empty_condition, empty_body, duplicate, empty_name] {
            let err = normalizer.normalize(&input, &collection(), "Acme_Rules").unwrap_err();
            assert!(matches!(err, ForgeError::MalformedRule { .. }), "{:?}", err);
        }
    }

    #[test]
    fn anonymous_patterns_may_repeat() {
        let mut input = raw("Anon");
        input.patterns = vec![PatternDef::new("$", "\"a\""), PatternDef::new("$", "\"b\"")];
        input.condition = "any of them".to_string();
        assert!(Normalizer::new().normalize(&input, &collection(), "Acme_Rules").is_ok());
    }
}
