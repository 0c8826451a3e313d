//! 条件中的规则引用
//! 条件里的裸标识符可能引用同一集合中的其它规则；改名、去重之后需要把这些引用改写为最终规范名

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use crate::core::NormalizedRule;

/// 条件中一个可能的规则引用（字节区间）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceToken {
    pub name: String,
    /// `Name*` 形式的规则集合通配
    pub wildcard: bool,
    start: usize,
    end: usize,
}

/// 找出条件中全部裸标识符
/// 跳过字符串与正则字面量、模式引用（`$a` `#a` `@a` `!a`）、模块成员、函数调用与数字
pub fn reference_tokens(condition: &str) -> Vec<ReferenceToken> {
    let bytes = condition.as_bytes();
    let mut tokens = Vec::new();
    let mut after_matches = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if b == b'"' || (b == b'/' && after_matches) {
            i = literal_end(bytes, i, b);
            after_matches = false;
            continue;
        }
        if b.is_ascii_digit() {
            while i < bytes.len() && is_ident_byte(bytes[i]) {
                i += 1;
            }
            after_matches = false;
            continue;
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            let start = i;
            while i < bytes.len() && is_ident_byte(bytes[i]) {
                i += 1;
            }
            let word = &condition[start..i];
            let sigil = start > 0 && matches!(bytes[start - 1], b'$' | b'#' | b'@' | b'!' | b'.');
            let wildcard = bytes.get(i) == Some(&b'*');
            let next = bytes[i..].iter().find(|c| !c.is_ascii_whitespace());
            let member_or_call = !wildcard && matches!(next, Some(b'.') | Some(b'('));
            if !sigil && !member_or_call {
                tokens.push(ReferenceToken {
                    name: word.to_string(),
                    wildcard,
                    start,
                    end: if wildcard { i + 1 } else { i },
                });
            }
            after_matches = word == "matches";
            if wildcard {
                i += 1;
            }
            continue;
        }
        after_matches = false;
        i += 1;
    }
    tokens
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// 字面量结束位置（含结尾定界符），反斜杠转义其后一个字节
fn literal_end(bytes: &[u8], start: usize, delimiter: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == delimiter {
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// 按 resolve 的结果替换标识符；resolve 返回 None 的标识符保持原样
pub fn rewrite_condition<F>(condition: &str, mut resolve: F) -> String
where
    F: FnMut(&ReferenceToken) -> Option<String>,
{
    let mut out = String::with_capacity(condition.len());
    let mut last = 0;
    for token in reference_tokens(condition) {
        if let Some(replacement) = resolve(&token) {
            out.push_str(&condition[last..token.start]);
            out.push_str(&replacement);
            last = token.end;
        }
    }
    out.push_str(&condition[last..]);
    out
}

/// 去重后的引用表：(命名空间, 原始名) → 最终规范名
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    /// 值为 (文件路径, 最终规范名)，按规范名排序
    by_original: BTreeMap<(String, String), Vec<(String, String)>>,
    /// 各命名空间内存活规则的最终规范名
    names: BTreeMap<String, BTreeSet<String>>,
}

impl ReferenceIndex {
    pub fn new(survivors: &[NormalizedRule]) -> Self {
        let mut index = Self::default();
        for rule in survivors {
            index
                .by_original
                .entry((rule.namespace.clone(), rule.original_name.clone()))
                .or_default()
                .push((rule.provenance.file_path.clone(), rule.canonical_name.clone()));
            index
                .names
                .entry(rule.namespace.clone())
                .or_default()
                .insert(rule.canonical_name.clone());
        }
        for targets in index.by_original.values_mut() {
            targets.sort_by(|a, b| a.1.cmp(&b.1));
        }
        index
    }

    /// 被抑制的重复规则：其原始名指向存活规则的最终规范名
    pub fn alias(&mut self, namespace: &str, original_name: &str, file_path: &str, target: &str) {
        let key = (namespace.to_string(), original_name.to_string());
        let targets = self.by_original.entry(key).or_default();
        if !targets.iter().any(|(file, _)| file == file_path) {
            targets.push((file_path.to_string(), target.to_string()));
        }
    }

    /// 单个标识符解析为最终规范名：同文件的定义优先，其次未改名的那一条
    pub fn resolve(&self, namespace: &str, file_path: &str, name: &str) -> Option<&str> {
        let key = (namespace.to_string(), name.to_string());
        if let Some(targets) = self.by_original.get(&key) {
            let chosen = targets
                .iter()
                .find(|(file, _)| file == file_path)
                .or_else(|| targets.first());
            return chosen.map(|(_, target)| target.as_str());
        }
        // 已经是规范名（例如重新读入的规则包）
        self.names
            .get(namespace)
            .and_then(|names| names.get(name))
            .map(String::as_str)
    }

    /// 通配前缀对应的规范名前缀与匹配到的规则
    fn resolve_wildcard(&self, namespace: &str, prefix: &str) -> (String, Vec<String>) {
        let ns_prefix = format!("{}_", namespace);
        let canonical = if prefix.starts_with(&ns_prefix) {
            prefix.to_string()
        } else {
            format!("{}{}", ns_prefix, prefix)
        };
        let matched: Vec<String> = self
            .names
            .get(namespace)
            .map(|names| {
                names
                    .iter()
                    .filter(|n| n.starts_with(&canonical))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        (canonical, matched)
    }

    /// 改写规则条件并记录其引用的规则
    pub fn apply(&self, rule: &mut NormalizedRule) {
        let mut references = BTreeSet::new();
        let condition = rewrite_condition(&rule.condition, |token| {
            if token.wildcard {
                let (canonical, matched) = self.resolve_wildcard(&rule.namespace, &token.name);
                if matched.is_empty() {
                    return None;
                }
                references.extend(matched);
                return Some(format!("{}*", canonical));
            }
            let target = self.resolve(&rule.namespace, &rule.provenance.file_path, &token.name)?;
            references.insert(target.to_string());
            Some(target.to_string())
        });
        references.remove(&rule.canonical_name);
        if condition != rule.condition {
            log::trace!("Rewrote rule references in '{}': {}", rule.canonical_name, condition);
        }
        rule.condition = condition;
        rule.references = references.into_iter().collect();
    }

    /// 并行改写全部存活规则
    pub fn apply_all(&self, rules: &mut [NormalizedRule]) {
        rules.par_iter_mut().for_each(|rule| self.apply(rule));
    }
}
