use rayon::prelude::*;
use std::fs;
use std::path::PathBuf;

use yara_forge_engine::{render_package, ForgeError, RulePackage};

use super::write_atomic;
use crate::config::OutputOptions;
use crate::error::{AppError, AppResult};

/// 单个分层的写出结果
#[derive(Debug)]
pub struct TierWriteOutcome {
    pub tier: String,
    pub path: PathBuf,
    pub rules: usize,
    /// 写出失败时的错误（只影响该分层）
    pub error: Option<ForgeError>,
}

impl TierWriteOutcome {
    pub fn is_written(&self) -> bool {
        self.error.is_none()
    }
}

/// 规则包写出器：每个分层一个 `<dir>/<prefix>-<tier>.yar`
#[derive(Debug, Clone)]
pub struct PackageWriter {
    options: OutputOptions,
}

impl PackageWriter {
    pub fn new(options: OutputOptions) -> Self {
        Self { options }
    }

    /// 并行渲染并写出全部分层，结果顺序与输入一致
    /// 输出目录无法创建时直接返回错误
    pub fn write_all(&self, packages: &[RulePackage]) -> AppResult<Vec<TierWriteOutcome>> {
        fs::create_dir_all(&self.options.dir).map_err(|e| {
            AppError::OutputError(format!(
                "创建输出目录失败: {} - {}",
                self.options.dir.display(),
                e
            ))
        })?;

        Ok(packages
            .par_iter()
            .map(|package| self.write_package(package))
            .collect())
    }

    fn write_package(&self, package: &RulePackage) -> TierWriteOutcome {
        let path = self.options.package_path(&package.tier);
        let text = render_package(package);
        let error = match write_atomic(&path, text.as_bytes()) {
            Ok(()) => {
                log::info!(
                    "Wrote {} rule(s) to package '{}': {}",
                    package.rule_count(),
                    package.tier,
                    path.display()
                );
                None
            }
            Err(e) => Some(ForgeError::OutputWriteFailure {
                tier: package.tier.clone(),
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        };
        TierWriteOutcome {
            tier: package.tier.clone(),
            path,
            rules: package.rule_count(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn empty_package(tier: &str) -> RulePackage {
        RulePackage {
            tier: tier.to_string(),
            min_score: 0,
            rules: Vec::new(),
            collection_counts: BTreeMap::new(),
            licenses: Vec::new(),
            imports: Vec::new(),
            generated_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        }
    }

    fn options(dir: PathBuf) -> OutputOptions {
        OutputOptions {
            dir,
            file_prefix: "forge".to_string(),
            report: false,
        }
    }

    #[test]
    fn writes_one_file_per_tier() {
        let tmp = TempDir::new().unwrap();
        let writer = PackageWriter::new(options(tmp.path().join("out")));
        let outcomes = writer
            .write_all(&[empty_package("core"), empty_package("full")])
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(TierWriteOutcome::is_written));
        assert_eq!(outcomes[0].tier, "core");
        let text = fs::read_to_string(tmp.path().join("out/forge-full.yar")).unwrap();
        assert!(text.contains("Package: full"));
    }

    #[test]
    fn failing_tier_does_not_stop_the_others() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        // 占位目录让 core 分层的 rename 失败
        fs::create_dir(dir.join("forge-core.yar")).unwrap();

        let writer = PackageWriter::new(options(dir.clone()));
        let outcomes = writer
            .write_all(&[empty_package("core"), empty_package("full")])
            .unwrap();

        assert!(matches!(
            outcomes[0].error,
            Some(ForgeError::OutputWriteFailure { .. })
        ));
        assert!(outcomes[1].is_written());
        assert!(dir.join("forge-full.yar").is_file());
    }
}
