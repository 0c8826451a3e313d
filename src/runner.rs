//! 一次完整运行：采集 → 流水线 → 写出

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use yara_forge_engine::{ForgeError, ForgePipeline, PipelineOutput, SourceCollection};

use crate::collector::LocalCollector;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::output::{BuildReport, PackageWriter, TierWriteOutcome};

/// 写出阶段的结果
#[derive(Debug)]
pub struct RunSummary {
    pub outcomes: Vec<TierWriteOutcome>,
    pub report_path: Option<PathBuf>,
}

impl RunSummary {
    pub fn written(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_written()).count()
    }
}

#[derive(Debug, Clone)]
pub struct ForgeRunner {
    config: AppConfig,
    cancel: Arc<AtomicBool>,
}

impl ForgeRunner {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 与外部共享取消标志（同时传递给流水线）
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Ctrl-C 置位取消标志，流水线在下一个检查点停止且不写出任何包
    /// 每个进程只能安装一次
    pub fn cancel_on_interrupt(&self) -> AppResult<()> {
        let cancel = Arc::clone(&self.cancel);
        ctrlc::set_handler(move || {
            cancel.store(true, Ordering::Relaxed);
        })?;
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 采集全部配置的集合
    pub fn collect(&self, retrieved_at: DateTime<Utc>) -> Vec<SourceCollection> {
        LocalCollector::new(&self.config.staging_dir)
            .with_retrieved_at(retrieved_at)
            .collect_all(&self.config.forge.collections)
    }

    /// 归一化 → 去重 → 评分 → 打包
    pub fn process(
        &self,
        collections: &[SourceCollection],
        reference_time: DateTime<Utc>,
    ) -> AppResult<PipelineOutput> {
        let pipeline = ForgePipeline::new(self.config.forge.clone())?
            .with_cancel_flag(Arc::clone(&self.cancel));
        Ok(pipeline.run(collections, reference_time)?)
    }

    /// 写出全部分层与（可选的）构建报告
    /// 分层写出失败记录为诊断；全部分层失败时整次运行失败
    pub fn write(
        &self,
        output: &mut PipelineOutput,
        collections: &[SourceCollection],
        generated_at: DateTime<Utc>,
    ) -> AppResult<RunSummary> {
        // 取消的运行不产生任何输出
        if self.cancel.load(Ordering::Relaxed) {
            return Err(ForgeError::Cancelled.into());
        }

        let writer = PackageWriter::new(self.config.output.clone());
        let outcomes = writer.write_all(&output.packages)?;
        for outcome in &outcomes {
            if let Some(error) = &outcome.error {
                output.report.record_error(error, None);
            }
        }

        let mut report_path = None;
        if self.config.output.report {
            let path = self.config.output.report_path();
            let report = BuildReport::new(output, collections, &outcomes, generated_at);
            match report.write(&path) {
                Ok(()) => report_path = Some(path),
                Err(e) => log::error!("Failed to write build report {}: {}", path.display(), e),
            }
        }

        let summary = RunSummary {
            outcomes,
            report_path,
        };
        if !summary.outcomes.is_empty() && summary.written() == 0 {
            return Err(AppError::OutputError("所有分层均写出失败".to_string()));
        }
        Ok(summary)
    }

    /// 不带分节输出的完整运行
    pub fn run(&self) -> AppResult<RunSummary> {
        let now = Utc::now();
        let collections = self.collect(now);
        let mut output = self.process(&collections, now)?;
        self.write(&mut output, &collections, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CustomConfigBuilder;
    use std::fs;
    use tempfile::TempDir;
    use yara_forge_engine::{CollectionConfig, ForgeConfig, TierConfig};

    const GOOD: &str = r#"
import "pe"

rule Suspicious_Loader : loader {
    meta:
        author = "analyst"
        description = "Loader stub"
        reference = "https://example.org/report"
        date = "2024-02-01"
    strings:
        $s1 = "LoadLibraryA" ascii
        $s2 = { 4D 5A 90 00 }
    condition:
        pe.is_pe and all of them
}
"#;

    const OTHER: &str = r#"
rule Copied_Loader {
    strings:
        $s1 = "LoadLibraryA"   ascii
        $s2 = { 4d 5a 90 00 }
    condition:
        pe.is_pe and   all of them
}

rule Unrelated {
    strings:
        $x = "totally different"
    condition:
        $x
}
"#;

    fn collection(name: &str, quality: u8, dir: PathBuf) -> CollectionConfig {
        CollectionConfig {
            name: name.to_string(),
            url: format!("https://github.com/example/{}", name.to_lowercase()),
            author: name.to_string(),
            quality,
            branch: "main".to_string(),
            license: None,
            namespace: None,
            path: Some(dir),
        }
    }

    fn setup(tmp: &TempDir) -> AppConfig {
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        fs::write(first.join("loader.yar"), GOOD).unwrap();
        fs::write(first.join("LICENSE"), "Detection Rule License 1.1").unwrap();
        fs::write(second.join("mixed.yara"), OTHER).unwrap();

        let forge = ForgeConfig {
            collections: vec![
                collection("First", 90, first),
                collection("Second", 60, second),
                collection("Missing", 50, tmp.path().join("absent")),
            ],
            tiers: vec![TierConfig::new("core", 80), TierConfig::new("full", 0)],
            ..ForgeConfig::default()
        };
        CustomConfigBuilder::new()
            .forge(forge)
            .output_dir(tmp.path().join("out"))
            .file_prefix("test")
            .report(true)
            .build()
            .unwrap()
    }

    #[test]
    fn end_to_end_run_writes_packages_and_report() {
        let tmp = TempDir::new().unwrap();
        let summary = ForgeRunner::new(setup(&tmp)).run().unwrap();

        assert_eq!(summary.written(), 2);
        let full = fs::read_to_string(tmp.path().join("out/test-full.yar")).unwrap();
        assert!(full.starts_with("/*"));
        assert!(full.contains("import \"pe\""));
        assert!(full.contains("Suspicious_Loader"));
        assert!(full.contains("Unrelated"));
        // 内容重复的低质量副本被抑制
        assert!(!full.contains("Copied_Loader"));
        assert!(full.contains("Detection Rule License 1.1"));

        let report_path = summary.report_path.unwrap();
        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(report_path).unwrap()).unwrap();
        assert_eq!(report["collections"].as_array().unwrap().len(), 2);
        assert_eq!(report["stats"]["suppressed_duplicates"], 1);
    }

    #[test]
    fn cancelled_run_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let runner = ForgeRunner::new(setup(&tmp)).with_cancel_flag(Arc::clone(&cancel));

        let now = Utc::now();
        let collections = runner.collect(now);
        let mut output = runner.process(&collections, now).unwrap();
        cancel.store(true, Ordering::Relaxed);

        let err = runner.write(&mut output, &collections, now).unwrap_err();
        assert!(matches!(err, AppError::Forge(ForgeError::Cancelled)));
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn interrupt_between_collect_and_process_stops_the_pipeline() {
        let tmp = TempDir::new().unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let runner = ForgeRunner::new(setup(&tmp)).with_cancel_flag(Arc::clone(&cancel));

        let now = Utc::now();
        let collections = runner.collect(now);
        assert!(!collections.is_empty());
        cancel.store(true, Ordering::Relaxed);

        let err = runner.process(&collections, now).unwrap_err();
        assert!(matches!(err, AppError::Forge(ForgeError::Cancelled)));
        assert!(err.is_fatal());
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn no_collections_is_a_run_failure() {
        let tmp = TempDir::new().unwrap();
        let mut config = setup(&tmp);
        config.forge.collections.clear();

        let err = ForgeRunner::new(config).run().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, AppError::Forge(ForgeError::NoUsableRules)));
    }
}
