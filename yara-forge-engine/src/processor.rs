//! 流水线驱动：归一化 → 去重 → 评分 → 打包
//! 数据单向流动，各阶段不修改上游输入

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::assembler::{render_package, PackageAssembler};
use crate::config::ForgeConfig;
use crate::core::{FileParseResult, NormalizedRule, RawRule, RulePackage, SourceCollection};
use crate::dedup::{DedupOutcome, Deduplicator};
use crate::error::{CoreResult, ForgeError};
use crate::normalizer::{NamespaceRegistry, Normalizer};
use crate::report::{BatchReport, Diagnostic};
use crate::scorer::QualityScorer;
use crate::utils::compress_name_list;

/// 一次运行的产出
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// 与配置中的分层一一对应
    pub packages: Vec<RulePackage>,
    pub dedup: DedupOutcome,
    pub report: BatchReport,
    /// 集合名 → 分配的命名空间（配置顺序）
    pub namespaces: Vec<(String, String)>,
}

impl PipelineOutput {
    /// 渲染全部规则包：(分层名, YARA 文本)
    pub fn rendered(&self) -> Vec<(String, String)> {
        self.packages
            .par_iter()
            .map(|p| (p.tier.clone(), render_package(p)))
            .collect()
    }
}

/// 规则整理流水线
#[derive(Debug, Clone)]
pub struct ForgePipeline {
    config: ForgeConfig,
    cancel: Arc<AtomicBool>,
}

impl ForgePipeline {
    /// 配置在构造时校验
    pub fn new(config: ForgeConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 与外部共享取消标志
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    fn check_cancelled(&self) -> CoreResult<()> {
        if self.cancel.load(Ordering::Relaxed) {
            log::warn!("Run cancelled");
            return Err(ForgeError::Cancelled);
        }
        Ok(())
    }

    /// 执行一次完整运行
    /// reference_time 同时用作包的生成时间与陈旧判断的参考时间
    pub fn run(
        &self,
        collections: &[SourceCollection],
        reference_time: DateTime<Utc>,
    ) -> CoreResult<PipelineOutput> {
        let start = Instant::now();
        let mut report = BatchReport::default();

        // 1. 命名空间（按集合顺序分配）
        let mut registry = NamespaceRegistry::new();
        let namespaces: Vec<(String, String)> = collections
            .iter()
            .map(|c| (c.name.clone(), registry.register(&c.name, c.namespace.as_deref())))
            .collect();

        // 2. 归一化（逐规则并行，屏障后才进入去重）
        let normalized = self.normalize_all(collections, &namespaces, &mut report)?;
        if normalized.is_empty() {
            log::error!("No usable rules after normalization");
            return Err(ForgeError::NoUsableRules);
        }
        self.check_cancelled()?;

        // 3. 去重
        let dedup = Deduplicator::new().deduplicate(normalized);
        for (error, collection) in dedup.diagnostic_errors() {
            report.record_error(&error, Some(collection.as_str()));
        }
        report.stats.duplicate_groups = dedup.groups.len() as u32;
        report.stats.suppressed_duplicates = dedup.suppressed_count() as u32;
        report.stats.name_collisions = dedup.renames.len() as u32;
        report.stats.surviving_rules = dedup.rules.len() as u32;
        if !dedup.renames.is_empty() {
            log::warn!(
                "Renamed {} rule(s) because of name collisions: {}",
                dedup.renames.len(),
                compress_name_list(dedup.renames.iter().map(|r| r.renamed.as_str()))
            );
        }
        self.check_cancelled()?;

        // 4. 评分
        let scorer = QualityScorer::new(&self.config.scoring, reference_time);
        let mut rules = dedup.rules.clone();
        scorer.score_all(&mut rules, &self.cancel)?;
        report.stats.private_rules = rules.iter().filter(|r| r.private).count() as u32;
        report.stats.min_score = rules.iter().map(NormalizedRule::score).min();
        report.stats.max_score = rules.iter().map(NormalizedRule::score).max();
        self.check_cancelled()?;

        // 5. 打包
        let assembler = PackageAssembler::new(self.config.tiers.clone());
        let (packages, package_errors) = assembler.assemble(&rules, collections, reference_time);
        for error in &package_errors {
            report.record_error(error, None);
        }

        report.stats.print_stats(start.elapsed());
        let dedup = DedupOutcome { rules, ..dedup };
        Ok(PipelineOutput {
            packages,
            dedup,
            report,
            namespaces,
        })
    }

    /// 归一化全部集合；文件级失败与格式错误的规则记录诊断后跳过
    fn normalize_all(
        &self,
        collections: &[SourceCollection],
        namespaces: &[(String, String)],
        report: &mut BatchReport,
    ) -> CoreResult<Vec<NormalizedRule>> {
        let mut work: Vec<(&RawRule, &SourceCollection, &str)> = Vec::new();
        for (collection, (_, namespace)) in collections.iter().zip(namespaces) {
            for file in &collection.files {
                report.stats.files_total += 1;
                match file {
                    FileParseResult::Parsed { rules, .. } => {
                        report.stats.raw_rules += rules.len() as u32;
                        work.extend(rules.iter().map(|r| (r, collection, namespace.as_str())));
                    }
                    FileParseResult::Failed { path, error } => {
                        report.stats.files_skipped += 1;
                        report.push(Diagnostic::file_skipped(&collection.name, path, error));
                    }
                }
            }
        }

        let normalizer = Normalizer::new();
        let results: Vec<CoreResult<NormalizedRule>> = work
            .par_iter()
            .map(|(raw, collection, namespace)| {
                if self.cancel.load(Ordering::Relaxed) {
                    return Err(ForgeError::Cancelled);
                }
                normalizer.normalize(raw, collection, namespace)
            })
            .collect();

        let mut normalized = Vec::with_capacity(results.len());
        for (result, (_, collection, _)) in results.into_iter().zip(&work) {
            match result {
                Ok(rule) => normalized.push(rule),
                Err(ForgeError::Cancelled) => return Err(ForgeError::Cancelled),
                Err(error) => {
                    report.stats.malformed_rules += 1;
                    report.record_error(&error, Some(collection.name.as_str()));
                }
            }
        }
        report.stats.normalized_rules = normalized.len() as u32;
        log::debug!(
            "Normalized {} of {} rules from {} collection(s)",
            normalized.len(),
            work.len(),
            collections.len()
        );
        Ok(normalized)
    }
}
