//! 质量评分
//! 分数 = 集合基础质量 + 命中信号的分值调整之和，截断到 [0, 100]

pub mod signals;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{QualitySignal, ScoringConfig};
use crate::core::NormalizedRule;
use crate::error::{CoreResult, ForgeError};

pub use signals::{is_broad_wildcard, is_short_pattern, is_stale, parse_rule_date};

/// 单条规则的评分明细（调试日志使用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreBreakdown {
    pub base: u8,
    pub signals: Vec<(QualitySignal, i32)>,
    pub score: u8,
}

/// 质量评分器
/// 配置在构造时解析完成，评分过程只读，可跨线程共享
#[derive(Debug, Clone)]
pub struct QualityScorer {
    adjustments: BTreeMap<QualitySignal, i32>,
    stale_after_days: Option<i64>,
    min_pattern_len: usize,
    /// 陈旧判断的参考时间（每次运行固定，保证结果可复现）
    reference_time: DateTime<Utc>,
}

impl QualityScorer {
    pub fn new(config: &ScoringConfig, reference_time: DateTime<Utc>) -> Self {
        Self {
            adjustments: config.resolved_adjustments(),
            stale_after_days: config.stale_after_days,
            min_pattern_len: config.min_pattern_len,
            reference_time,
        }
    }

    pub fn delta(&self, signal: QualitySignal) -> i32 {
        self.adjustments.get(&signal).copied().unwrap_or(0)
    }

    /// 规则命中的全部信号（按声明顺序）
    pub fn signals(&self, rule: &NormalizedRule) -> Vec<QualitySignal> {
        let declared = &rule.declared;
        let mut hits = Vec::new();

        if declared.is_complete() {
            hits.push(QualitySignal::CompleteMetadata);
        }
        if !declared.any_metadata {
            hits.push(QualitySignal::NoMetadata);
        }
        if declared.author {
            hits.push(QualitySignal::HasAuthor);
        }
        if declared.description {
            hits.push(QualitySignal::HasDescription);
        }
        if declared.reference {
            hits.push(QualitySignal::HasReference);
        }
        if rule.private {
            hits.push(QualitySignal::PrivateRule);
        }
        if rule.patterns.iter().any(is_broad_wildcard) {
            hits.push(QualitySignal::BroadWildcard);
        }
        if rule
            .patterns
            .iter()
            .any(|p| is_short_pattern(p, self.min_pattern_len))
        {
            hits.push(QualitySignal::ShortPattern);
        }
        if let Some(max_age) = self.stale_after_days {
            if declared.date && is_stale(&rule.date, self.reference_time, max_age) {
                hits.push(QualitySignal::Stale);
            }
        }
        hits
    }

    pub fn breakdown(&self, rule: &NormalizedRule) -> ScoreBreakdown {
        let signals: Vec<(QualitySignal, i32)> = self
            .signals(rule)
            .into_iter()
            .map(|s| (s, self.delta(s)))
            .collect();
        let total = i32::from(rule.base_quality) + signals.iter().map(|(_, d)| d).sum::<i32>();
        ScoreBreakdown {
            base: rule.base_quality,
            signals,
            score: total.clamp(0, 100) as u8,
        }
    }

    pub fn score(&self, rule: &NormalizedRule) -> u8 {
        self.breakdown(rule).score
    }

    /// 并行评分全部规则；cancel 置位时尽早返回 Cancelled
    pub fn score_all(&self, rules: &mut [NormalizedRule], cancel: &AtomicBool) -> CoreResult<()> {
        rules.par_iter_mut().try_for_each(|rule| {
            if cancel.load(Ordering::Relaxed) {
                return Err(ForgeError::Cancelled);
            }
            let breakdown = self.breakdown(rule);
            if !breakdown.signals.is_empty() {
                log::trace!(
                    "Scored '{}': base {} {:?} -> {}",
                    rule.canonical_name,
                    breakdown.base,
                    breakdown.signals,
                    breakdown.score
                );
            }
            rule.quality = Some(breakdown.score);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MetaValue, PatternDef, RawRule, SourceCollection};
    use crate::normalizer::Normalizer;
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn normalized(quality: u8, raw: RawRule) -> NormalizedRule {
        let collection = SourceCollection::new("Acme", "https://example.org/acme", "Acme", quality, reference());
        Normalizer::new().normalize(&raw, &collection, "Acme").unwrap()
    }

    fn raw(patterns: Vec<PatternDef>, meta: Vec<(&str, MetaValue)>) -> RawRule {
        RawRule {
            name: "Rule".to_string(),
            patterns,
            meta: meta.into_iter().map(Into::into).collect(),
            condition: "any of them".to_string(),
            ..RawRule::default()
        }
    }

    #[test]
    fn complete_metadata_earns_bonuses() {
        let rule = normalized(
            80,
            raw(
                vec![PatternDef::new("$a", "\"malicious.example\"")],
                vec![
                    ("author", MetaValue::text("Jane")),
                    ("description", MetaValue::text("d")),
                    ("reference", MetaValue::text("https://r")),
                    ("date", MetaValue::text("2024-11-02")),
                ],
            ),
        );
        let scorer = QualityScorer::new(&ScoringConfig::default(), reference());
        assert_eq!(
            scorer.signals(&rule),
            vec![
                QualitySignal::CompleteMetadata,
                QualitySignal::HasAuthor,
                QualitySignal::HasDescription,
                QualitySignal::HasReference,
            ]
        );
        assert_eq!(scorer.score(&rule), 80 + 5 + 2 + 2 + 3);
    }

    #[test]
    fn penalties_clamp_at_zero() {
        let rule = normalized(
            10,
            raw(vec![PatternDef::new("$a", "{ 4D ?? ?? [-] }")], Vec::new()),
        );
        let scorer = QualityScorer::new(&ScoringConfig::default(), reference());
        let signals = scorer.signals(&rule);
        assert!(signals.contains(&QualitySignal::NoMetadata));
        assert!(signals.contains(&QualitySignal::BroadWildcard));
        assert!(signals.contains(&QualitySignal::ShortPattern));
        assert_eq!(scorer.score(&rule), 0);
    }

    #[test]
    fn bonuses_clamp_at_hundred() {
        let rule = normalized(
            100,
            raw(
                vec![PatternDef::new("$a", "\"long enough\"")],
                vec![("author", MetaValue::text("Jane"))],
            ),
        );
        let scorer = QualityScorer::new(&ScoringConfig::default(), reference());
        assert_eq!(scorer.score(&rule), 100);
    }

    #[test]
    fn stale_only_applies_to_declared_dates() {
        let old = normalized(
            70,
            raw(
                vec![PatternDef::new("$a", "\"long enough\"")],
                vec![("date", MetaValue::text("2015-01-01"))],
            ),
        );
        let undated = normalized(70, raw(vec![PatternDef::new("$a", "\"long enough\"")], vec![("x", MetaValue::Integer(1))]));
        let scorer = QualityScorer::new(&ScoringConfig::default(), reference());
        assert!(scorer.signals(&old).contains(&QualitySignal::Stale));
        assert!(!scorer.signals(&undated).contains(&QualitySignal::Stale));
    }

    #[test]
    fn adjustments_come_from_configuration() {
        let mut config = ScoringConfig::default();
        config.adjustments.insert("no_metadata".to_string(), 0);
        config.adjustments.insert("short_pattern".to_string(), -30);
        let rule = normalized(70, raw(vec![PatternDef::new("$a", "\"MZ\"")], Vec::new()));
        let scorer = QualityScorer::new(&config, reference());
        assert_eq!(scorer.score(&rule), 40);
    }

    #[test]
    fn score_all_sets_quality_and_honours_cancel() {
        let mut rules = vec![
            normalized(70, raw(vec![PatternDef::new("$a", "\"long enough\"")], vec![("author", MetaValue::text("J"))])),
        ];
        let scorer = QualityScorer::new(&ScoringConfig::default(), reference());
        scorer.score_all(&mut rules, &AtomicBool::new(false)).unwrap();
        assert_eq!(rules[0].quality, Some(72));

        let cancelled = scorer.score_all(&mut rules, &AtomicBool::new(true));
        assert!(matches!(cancelled, Err(ForgeError::Cancelled)));
    }
}
