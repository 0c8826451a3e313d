//! 分层打包
//! 已评分、已去重的规则按质量阈值划入各分层，生成 RulePackage
//! 引用了分层之外规则（私有规则、低分规则）的规则同样不进入该分层

pub mod render;

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::TierConfig;
use crate::core::{LicenseEntry, NormalizedRule, RulePackage, SourceCollection};
use crate::error::ForgeError;

pub use render::{render_package, render_rule, GENERATED_LINE_PREFIX};

/// 规则包组装器
#[derive(Debug, Clone)]
pub struct PackageAssembler {
    /// 选择性从高到低排列
    tiers: Vec<TierConfig>,
}

impl PackageAssembler {
    pub fn new(tiers: Vec<TierConfig>) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &[TierConfig] {
        &self.tiers
    }

    /// 规则是否属于某个分层：非私有且分数达到阈值
    pub fn qualifies(rule: &NormalizedRule, tier: &TierConfig) -> bool {
        !rule.private && rule.score() >= tier.min_score
    }

    /// 分层成员：达到阈值的规则中，引用了分层之外规则的被移出，直到不再有移出（移出可能连锁）
    fn tier_members<'a>(
        ordered: &[&'a NormalizedRule],
        tier: &TierConfig,
        diagnostics: &mut Vec<ForgeError>,
    ) -> Vec<&'a NormalizedRule> {
        let mut members: BTreeSet<&'a str> = ordered
            .iter()
            .filter(|r| Self::qualifies(r, tier))
            .map(|r| r.canonical_name.as_str())
            .collect();

        loop {
            let mut removed = false;
            for &rule in ordered {
                if !members.contains(rule.canonical_name.as_str()) {
                    continue;
                }
                let missing = rule.references.iter().find(|r| !members.contains(r.as_str()));
                if let Some(missing) = missing {
                    members.remove(rule.canonical_name.as_str());
                    diagnostics.push(ForgeError::UnresolvedReference {
                        rule: rule.canonical_name.clone(),
                        reference: missing.clone(),
                        tier: tier.name.clone(),
                    });
                    removed = true;
                }
            }
            if !removed {
                break;
            }
        }

        ordered
            .iter()
            .copied()
            .filter(|r| members.contains(r.canonical_name.as_str()))
            .collect()
    }

    /// 为每个分层生成规则包；空分层同样生成（只有头部），并返回 UnresolvedReference / EmptyPackage 诊断
    pub fn assemble(
        &self,
        rules: &[NormalizedRule],
        collections: &[SourceCollection],
        generated_at: DateTime<Utc>,
    ) -> (Vec<RulePackage>, Vec<ForgeError>) {
        let licenses_by_collection: BTreeMap<&str, &str> = collections
            .iter()
            .filter_map(|c| c.license.as_deref().map(|l| (c.name.as_str(), l)))
            .collect();

        // 所有分层共用同一排序
        let mut ordered: Vec<&NormalizedRule> = rules.iter().collect();
        ordered.sort_by(|a, b| {
            a.namespace
                .cmp(&b.namespace)
                .then_with(|| a.canonical_name.cmp(&b.canonical_name))
        });

        let mut packages = Vec::with_capacity(self.tiers.len());
        let mut diagnostics = Vec::new();
        for tier in &self.tiers {
            let members: Vec<NormalizedRule> = Self::tier_members(&ordered, tier, &mut diagnostics)
                .into_iter()
                .cloned()
                .collect();
            let package = build_package(tier, members, &licenses_by_collection, generated_at);

            if package.is_empty() {
                diagnostics.push(ForgeError::EmptyPackage(tier.name.clone()));
            }
            log::info!(
                "Package '{}' (>= {}): {} rules from {} collection(s)",
                package.tier,
                package.min_score,
                package.rule_count(),
                package.collection_counts.len()
            );
            packages.push(package);
        }
        (packages, diagnostics)
    }
}

fn build_package(
    tier: &TierConfig,
    rules: Vec<NormalizedRule>,
    licenses_by_collection: &BTreeMap<&str, &str>,
    generated_at: DateTime<Utc>,
) -> RulePackage {
    let mut collection_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut imports: BTreeSet<String> = BTreeSet::new();
    for rule in &rules {
        *collection_counts
            .entry(rule.provenance.collection.clone())
            .or_default() += 1;
        imports.extend(rule.imports.iter().cloned());
    }

    // 按集合名顺序取许可证，相同文本只保留一份
    let mut seen_texts = BTreeSet::new();
    let licenses = collection_counts
        .keys()
        .filter_map(|name| {
            let text = licenses_by_collection.get(name.as_str())?;
            let key = text.trim();
            if key.is_empty() || !seen_texts.insert(key) {
                return None;
            }
            Some(LicenseEntry {
                collection: name.clone(),
                text: key.to_string(),
            })
        })
        .collect();

    RulePackage {
        tier: tier.name.clone(),
        min_score: tier.min_score,
        rules,
        collection_counts,
        licenses,
        imports: imports.into_iter().collect(),
        generated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_tiers;
    use crate::core::{PatternDef, RawRule};
    use crate::normalizer::Normalizer;
    use chrono::TimeZone;

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap()
    }

    fn collection(name: &str, license: Option<&str>) -> SourceCollection {
        let c = SourceCollection::new(name, format!("https://example.org/{}", name), name, 80, generated_at());
        match license {
            Some(text) => c.with_license(text),
            None => c,
        }
    }

    fn scored(collection: &SourceCollection, name: &str, score: u8, private: bool) -> NormalizedRule {
        let raw = RawRule {
            name: name.to_string(),
            patterns: vec![PatternDef::new("$a", format!("\"{}\"", name))],
            condition: "$a".to_string(),
            imports: vec!["pe".to_string()],
            file_path: "rules.yar".to_string(),
            ..RawRule::default()
        };
        let mut rule = Normalizer::new().normalize(&raw, collection, &collection.name).unwrap();
        rule.quality = Some(score);
        rule.private = private;
        rule
    }

    #[test]
    fn tiers_are_monotonic_and_exclude_private_rules() {
        let b = collection("B", Some("MIT"));
        let a = collection("A", Some("MIT"));
        let rules = vec![
            scored(&b, "High", 95, false),
            scored(&a, "Mid", 65, false),
            scored(&a, "Low", 10, false),
            scored(&a, "Hidden", 100, true),
        ];
        let assembler = PackageAssembler::new(default_tiers());
        let (packages, diagnostics) = assembler.assemble(&rules, &[a, b], generated_at());

        let names = |i: usize| -> Vec<&str> {
            packages[i].rules.iter().map(|r| r.canonical_name.as_str()).collect()
        };
        assert_eq!(names(0), vec!["B_High"]);
        assert_eq!(names(1), vec!["A_Mid", "B_High"]);
        assert_eq!(names(2), vec!["A_Low", "A_Mid", "B_High"]);
        assert!(diagnostics.is_empty());

        for window in packages.windows(2) {
            for rule in &window[0].rules {
                assert!(window[1].contains(&rule.canonical_name));
            }
        }
        assert!(packages.iter().all(|p| !p.contains("A_Hidden")));

        // 相同许可证文本只保留一份
        assert_eq!(packages[2].licenses.len(), 1);
        assert_eq!(packages[2].licenses[0].collection, "A");
        assert_eq!(packages[2].collection_counts["A"], 2);
        assert_eq!(packages[2].imports, vec!["pe"]);
    }

    #[test]
    fn rules_leave_tiers_missing_their_references() {
        let a = collection("A", None);
        let mut dropper = scored(&a, "Dropper", 90, false);
        dropper.references = vec!["A_Is_PE".to_string()];
        let mut uses_helper = scored(&a, "Uses_Helper", 95, false);
        uses_helper.references = vec!["A_Helper".to_string()];
        let mut chained = scored(&a, "Chained", 85, false);
        chained.references = vec!["A_Dropper".to_string()];
        let rules = vec![
            scored(&a, "Is_PE", 65, false),
            dropper,
            scored(&a, "Helper", 100, true),
            uses_helper,
            chained,
        ];
        let (packages, diagnostics) =
            PackageAssembler::new(default_tiers()).assemble(&rules, &[a], generated_at());

        let names = |i: usize| -> Vec<&str> {
            packages[i].rules.iter().map(|r| r.canonical_name.as_str()).collect()
        };
        // core 中 Is_PE 分数不足，Dropper 与依赖它的 Chained 连锁移出
        assert!(packages[0].is_empty());
        assert_eq!(names(1), vec!["A_Chained", "A_Dropper", "A_Is_PE"]);
        assert_eq!(names(2), vec!["A_Chained", "A_Dropper", "A_Is_PE"]);

        let unresolved: Vec<(&str, &str, &str)> = diagnostics
            .iter()
            .filter_map(|e| match e {
                ForgeError::UnresolvedReference { rule, reference, tier } => {
                    Some((tier.as_str(), rule.as_str(), reference.as_str()))
                }
                _ => None,
            })
            .collect();
        assert!(unresolved.contains(&("core", "A_Dropper", "A_Is_PE")));
        assert!(unresolved.contains(&("core", "A_Chained", "A_Dropper")));
        assert!(unresolved.contains(&("core", "A_Uses_Helper", "A_Helper")));
        assert!(unresolved.contains(&("full", "A_Uses_Helper", "A_Helper")));
        assert_eq!(unresolved.len(), 5);

        for package in &packages {
            for rule in &package.rules {
                for reference in &rule.references {
                    assert!(package.contains(reference), "{} -> {}", rule.canonical_name, reference);
                }
            }
        }
    }

    #[test]
    fn empty_tier_is_still_emitted() {
        let a = collection("A", None);
        let rules = vec![scored(&a, "Low", 10, false)];
        let assembler = PackageAssembler::new(default_tiers());
        let (packages, diagnostics) = assembler.assemble(&rules, &[a], generated_at());

        assert_eq!(packages.len(), 3);
        assert!(packages[0].is_empty());
        assert_eq!(diagnostics.len(), 2);
        assert!(matches!(&diagnostics[0], ForgeError::EmptyPackage(t) if t == "core"));

        let text = render_package(&packages[0]);
        assert!(text.contains(" * Package: core"));
        assert!(text.contains(" * Rules: 0"));
        assert!(!text.contains("\nrule "));
    }

    #[test]
    fn rendered_rule_carries_provenance() {
        let a = collection("A", Some("Detection Rule License 1.1"));
        let rules = vec![scored(&a, "Dropper", 90, false)];
        let (packages, _) = PackageAssembler::new(default_tiers()).assemble(&rules, &[a], generated_at());
        let text = render_package(&packages[0]);

        assert!(text.contains("import \"pe\""));
        assert!(text.contains("rule A_Dropper {"));
        assert!(text.contains("        quality = 90\n"));
        assert!(text.contains("        source_collection = \"A\"\n"));
        assert!(text.contains("        imported = \"2025-06-01\"\n"));
        assert!(text.contains(" *   Detection Rule License 1.1\n"));
        assert!(text.contains(&format!("{}2025-06-01T08:30:00Z", GENERATED_LINE_PREFIX)));
    }
}
