//! 构建报告（build_report.json）
//! 汇总一次运行的阶段统计、分层写出结果、集合概况、重复组与全部诊断

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

use yara_forge_engine::dedup::RenameRecord;
use yara_forge_engine::{
    Diagnostic, DuplicateGroup, FileParseResult, PipelineOutput, SourceCollection, StageStats,
};

use super::package_writer::TierWriteOutcome;
use super::write_atomic;
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierSummary {
    pub name: String,
    pub min_score: u8,
    pub rules: usize,
    pub path: String,
    pub written: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub name: String,
    pub url: String,
    pub namespace: String,
    pub quality: u8,
    pub files: usize,
    pub skipped_files: usize,
    pub rules: usize,
    pub has_license: bool,
    pub retrieved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    pub generated_at: DateTime<Utc>,
    pub stats: StageStats,
    pub tiers: Vec<TierSummary>,
    pub collections: Vec<CollectionSummary>,
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub renames: Vec<RenameRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildReport {
    pub fn new(
        output: &PipelineOutput,
        collections: &[SourceCollection],
        outcomes: &[TierWriteOutcome],
        generated_at: DateTime<Utc>,
    ) -> Self {
        let tiers = output
            .packages
            .iter()
            .map(|package| {
                let outcome = outcomes.iter().find(|o| o.tier == package.tier);
                TierSummary {
                    name: package.tier.clone(),
                    min_score: package.min_score,
                    rules: package.rule_count(),
                    path: outcome
                        .map(|o| o.path.display().to_string())
                        .unwrap_or_default(),
                    written: outcome.map(TierWriteOutcome::is_written).unwrap_or(false),
                }
            })
            .collect();

        // 命名空间与集合同序
        let collections = collections
            .iter()
            .zip(output.namespaces.iter())
            .map(|(collection, (_, namespace))| CollectionSummary {
                name: collection.name.clone(),
                url: collection.url.clone(),
                namespace: namespace.clone(),
                quality: collection.quality,
                files: collection.files.len(),
                skipped_files: collection
                    .files
                    .iter()
                    .filter(|f| matches!(f, FileParseResult::Failed { .. }))
                    .count(),
                rules: collection.rule_count(),
                has_license: collection.license.is_some(),
                retrieved_at: collection.retrieved_at,
            })
            .collect();

        Self {
            generated_at,
            stats: output.report.stats.clone(),
            tiers,
            collections,
            duplicate_groups: output.dedup.groups.clone(),
            renames: output.dedup.renames.clone(),
            diagnostics: output.report.diagnostics.clone(),
        }
    }

    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: &Path) -> AppResult<()> {
        let json = self.to_json()?;
        write_atomic(path, json.as_bytes())?;
        log::info!("Wrote build report: {}", path.display());
        Ok(())
    }
}
