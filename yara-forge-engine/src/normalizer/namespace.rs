//! 命名空间推导与分配

use std::collections::BTreeSet;

/// 命名空间为空时的兜底值
const FALLBACK_NAMESPACE: &str = "COLLECTION";

/// 由展示名称推导稳定的命名空间
/// ASCII 字母数字保留，其余连续字符折叠为单个 `_`，首尾 `_` 去除；数字开头补 `_` 前缀
pub fn namespace_slug(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_sep = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch);
        } else {
            pending_sep = true;
        }
    }

    if slug.is_empty() {
        return FALLBACK_NAMESPACE.to_string();
    }
    if slug.starts_with(|c: char| c.is_ascii_digit()) {
        slug.insert(0, '_');
    }
    slug
}

/// 命名空间登记表
/// 按集合配置顺序分配，后出现的冲突追加 `_2`、`_3` ...
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    used: BTreeSet<String>,
    assigned: Vec<String>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为下一个集合分配命名空间，explicit 优先于展示名称
    pub fn register(&mut self, display_name: &str, explicit: Option<&str>) -> String {
        let source = explicit
            .filter(|ns| !ns.trim().is_empty())
            .unwrap_or(display_name);
        let base = namespace_slug(source);

        let mut candidate = base.clone();
        let mut counter = 2;
        while self.used.contains(&candidate) {
            candidate = format!("{}_{}", base, counter);
            counter += 1;
        }
        if candidate != base {
            log::warn!(
                "Namespace '{}' of collection '{}' is already taken, using '{}'",
                base,
                display_name,
                candidate
            );
        }

        self.used.insert(candidate.clone());
        self.assigned.push(candidate.clone());
        candidate
    }

    /// 按登记顺序返回已分配的命名空间
    pub fn assigned(&self) -> &[String] {
        &self.assigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_folds_separators() {
        assert_eq!(namespace_slug("YARA Style Guide"), "YARA_Style_Guide");
        assert_eq!(namespace_slug("  ReversingLabs  "), "ReversingLabs");
        assert_eq!(namespace_slug("a--b__c"), "a_b_c");
        assert_eq!(namespace_slug("3CX rules"), "_3CX_rules");
        assert_eq!(namespace_slug("***"), "COLLECTION");
    }

    #[test]
    fn registry_suffixes_collisions_in_order() {
        let mut registry = NamespaceRegistry::new();
        assert_eq!(registry.register("Acme Rules", None), "Acme_Rules");
        assert_eq!(registry.register("Acme-Rules", None), "Acme_Rules_2");
        assert_eq!(registry.register("Other", Some("Acme Rules")), "Acme_Rules_3");
        assert_eq!(registry.register("Named", Some("  ")), "Named");
        assert_eq!(registry.assigned().len(), 4);
    }
}
