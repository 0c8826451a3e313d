//! 规则去重
//! 1. 按内容指纹分组，组内按优先级保留一条（各组并行裁决）
//! 2. 存活规则单线程写入名称索引，同名不同内容的规则追加指纹后缀改名
//! 3. 条件中对其它规则的引用改写为最终规范名（被抑制的规则指向其存活者）

pub mod references;

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{Fingerprint, NormalizedRule};
use crate::error::ForgeError;
use crate::normalizer::MAX_IDENTIFIER_LEN;

pub use references::{reference_tokens, rewrite_condition, ReferenceIndex, ReferenceToken};

/// 改名后缀的初始指纹长度
const SUFFIX_HEX_LEN: usize = 8;

/// 被抑制的重复规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressedRule {
    pub canonical_name: String,
    pub original_name: String,
    pub namespace: String,
    pub collection: String,
    pub file_path: String,
}

impl From<&NormalizedRule> for SuppressedRule {
    fn from(rule: &NormalizedRule) -> Self {
        Self {
            canonical_name: rule.canonical_name.clone(),
            original_name: rule.original_name.clone(),
            namespace: rule.namespace.clone(),
            collection: rule.provenance.collection.clone(),
            file_path: rule.provenance.file_path.clone(),
        }
    }
}

/// 内容相同的一组规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub fingerprint: Fingerprint,
    /// 存活规则的规范名（改名前）
    pub survivor: String,
    pub survivor_collection: String,
    pub suppressed: Vec<SuppressedRule>,
}

/// 规则在改名前的身份：(命名空间, 原始名, 文件)
type RuleKey = (String, String, String);

fn rule_key(rule: &NormalizedRule) -> RuleKey {
    (
        rule.namespace.clone(),
        rule.original_name.clone(),
        rule.provenance.file_path.clone(),
    )
}

/// 一次名称冲突改名
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRecord {
    pub original: String,
    pub renamed: String,
    pub collection: String,
}

/// 去重结果
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// 存活规则，按规范名排序
    pub rules: Vec<NormalizedRule>,
    pub groups: Vec<DuplicateGroup>,
    pub renames: Vec<RenameRecord>,
}

impl DedupOutcome {
    pub fn suppressed_count(&self) -> usize {
        self.groups.iter().map(|g| g.suppressed.len()).sum()
    }

    /// 转为诊断用的内核错误（重复为 debug 级，改名为 warning 级）
    pub fn diagnostic_errors(&self) -> Vec<(ForgeError, String)> {
        let mut errors = Vec::with_capacity(self.suppressed_count() + self.renames.len());
        for group in &self.groups {
            for suppressed in &group.suppressed {
                errors.push((
                    ForgeError::DuplicateContent {
                        survivor: group.survivor.clone(),
                        suppressed: suppressed.canonical_name.clone(),
                    },
                    suppressed.collection.clone(),
                ));
            }
        }
        for rename in &self.renames {
            errors.push((
                ForgeError::NameCollision {
                    name: rename.original.clone(),
                    renamed: rename.renamed.clone(),
                },
                rename.collection.clone(),
            ));
        }
        errors
    }
}

/// 规则去重器
#[derive(Debug, Clone, Default)]
pub struct Deduplicator;

impl Deduplicator {
    pub fn new() -> Self {
        Self
    }

    /// 必须在全部规则归一化完成之后调用
    pub fn deduplicate(&self, rules: Vec<NormalizedRule>) -> DedupOutcome {
        // 1. 指纹分组（BTreeMap 保证组顺序确定）
        let mut buckets: BTreeMap<Fingerprint, Vec<NormalizedRule>> = BTreeMap::new();
        for rule in rules {
            buckets.entry(rule.fingerprint.clone()).or_default().push(rule);
        }

        // 2. 各组并行裁决
        let resolved: Vec<(NormalizedRule, Option<DuplicateGroup>)> = buckets
            .into_iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(fingerprint, members)| resolve_group(fingerprint, members))
            .collect();

        let mut survivors = Vec::with_capacity(resolved.len());
        let mut groups = Vec::new();
        let mut aliases: Vec<(RuleKey, SuppressedRule)> = Vec::new();
        for (survivor, group) in resolved {
            if let Some(group) = group {
                let key = rule_key(&survivor);
                aliases.extend(group.suppressed.iter().map(|s| (key.clone(), s.clone())));
                log::debug!(
                    "Kept '{}' from {} over {} duplicate(s)",
                    group.survivor,
                    group.survivor_collection,
                    group.suppressed.len()
                );
                groups.push(group);
            }
            survivors.push(survivor);
        }

        // 3. 名称索引（单线程写入）
        let (mut rules, renames) = resolve_name_collisions(survivors);

        // 4. 引用改写（索引只读，各规则并行）
        let final_names: FxHashMap<RuleKey, String> = rules
            .iter()
            .map(|r| (rule_key(r), r.canonical_name.clone()))
            .collect();
        let mut index = ReferenceIndex::new(&rules);
        for (survivor, suppressed) in &aliases {
            if let Some(target) = final_names.get(survivor) {
                index.alias(
                    &suppressed.namespace,
                    &suppressed.original_name,
                    &suppressed.file_path,
                    target,
                );
            }
        }
        index.apply_all(&mut rules);

        DedupOutcome {
            rules,
            groups,
            renames,
        }
    }
}

fn resolve_group(
    fingerprint: Fingerprint,
    mut members: Vec<NormalizedRule>,
) -> (NormalizedRule, Option<DuplicateGroup>) {
    members.sort_by(|a, b| a.precedence_cmp(b));
    let mut members = members.into_iter();
    // 分组来源于至少一条规则，members 不会为空
    let survivor = match members.next() {
        Some(rule) => rule,
        None => unreachable!("fingerprint bucket without members"),
    };
    let suppressed: Vec<SuppressedRule> = members.map(|r| SuppressedRule::from(&r)).collect();
    if suppressed.is_empty() {
        return (survivor, None);
    }
    let group = DuplicateGroup {
        fingerprint,
        survivor: survivor.canonical_name.clone(),
        survivor_collection: survivor.provenance.collection.clone(),
        suppressed,
    };
    (survivor, Some(group))
}

/// 同名规则中优先级最高者保留原名，其余追加指纹后缀
fn resolve_name_collisions(survivors: Vec<NormalizedRule>) -> (Vec<NormalizedRule>, Vec<RenameRecord>) {
    let mut by_name: BTreeMap<String, Vec<NormalizedRule>> = BTreeMap::new();
    for rule in survivors {
        by_name.entry(rule.canonical_name.clone()).or_default().push(rule);
    }

    let mut taken: FxHashSet<String> = by_name.keys().cloned().collect();
    let mut output = Vec::with_capacity(taken.len());
    let mut renames = Vec::new();

    for (name, mut rules) in by_name {
        rules.sort_by(|a, b| a.precedence_cmp(b));
        let mut rules = rules.into_iter();
        if let Some(winner) = rules.next() {
            output.push(winner);
        }
        for mut loser in rules {
            let renamed = unique_suffixed_name(&name, &loser.fingerprint, &taken);
            taken.insert(renamed.clone());
            renames.push(RenameRecord {
                original: name.clone(),
                renamed: renamed.clone(),
                collection: loser.provenance.collection.clone(),
            });
            loser.canonical_name = renamed;
            output.push(loser);
        }
    }

    output.sort_by(|a, b| a.canonical_name.cmp(&b.canonical_name));
    (output, renames)
}

/// 追加后缀，总长度不超过标识符上限
fn with_suffix(name: &str, suffix: &str) -> String {
    let keep = MAX_IDENTIFIER_LEN.saturating_sub(suffix.len() + 1).min(name.len());
    format!("{}_{}", &name[..keep], suffix)
}

/// 依次尝试 8 位指纹、更长的指纹、指纹 + 计数器
fn unique_suffixed_name(name: &str, fingerprint: &Fingerprint, taken: &FxHashSet<String>) -> String {
    let mut len = SUFFIX_HEX_LEN;
    while len <= fingerprint.as_str().len() {
        let candidate = with_suffix(name, fingerprint.short(len));
        if !taken.contains(&candidate) {
            return candidate;
        }
        len += 4;
    }
    let mut counter = 2;
    loop {
        let candidate = with_suffix(
            name,
            &format!("{}_{}", fingerprint.short(SUFFIX_HEX_LEN), counter),
        );
        if !taken.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}
