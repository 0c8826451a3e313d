//! 本地规则集合采集
//! 遍历已检出的仓库目录，解析全部 `.yar` / `.yara` 文件，生成 SourceCollection
//! 远程检出（git clone）不在本模块职责内，目录缺失时跳过该集合

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use yara_forge_engine::utils::preview_compact;
use yara_forge_engine::{CollectionConfig, FileParseResult, SourceCollection, YaraParser};

use crate::error::{AppError, AppResult};

/// 规则文件扩展名
const RULE_EXTENSIONS: [&str; 2] = ["yar", "yara"];
/// 仓库许可证文件名（按优先级）
const LICENSE_FILE_NAMES: [&str; 3] = ["LICENSE", "LICENSE.txt", "LICENSE.md"];

/// 本地目录采集器
#[derive(Debug, Clone)]
pub struct LocalCollector {
    parser: YaraParser,
    staging_dir: PathBuf,
    retrieved_at: DateTime<Utc>,
}

impl LocalCollector {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            parser: YaraParser::new(),
            staging_dir: staging_dir.into(),
            retrieved_at: Utc::now(),
        }
    }

    /// 固定检索时间（默认为采集器创建时刻）
    pub fn with_retrieved_at(mut self, retrieved_at: DateTime<Utc>) -> Self {
        self.retrieved_at = retrieved_at;
        self
    }

    /// 采集全部集合，单个集合失败只记录错误并跳过
    pub fn collect_all(&self, configs: &[CollectionConfig]) -> Vec<SourceCollection> {
        configs
            .iter()
            .filter_map(|config| match self.collect(config) {
                Ok(collection) => Some(collection),
                Err(e) => {
                    log::error!("Skipping collection '{}': {}", config.name, e);
                    None
                }
            })
            .collect()
    }

    /// 采集单个集合
    pub fn collect(&self, config: &CollectionConfig) -> AppResult<SourceCollection> {
        let root = config.local_path(&self.staging_dir);
        if !root.is_dir() {
            return Err(AppError::CollectError(format!(
                "目录不存在: {}",
                root.display()
            )));
        }

        let (rule_files, license_file) = scan_repository(&root)?;

        let mut collection = SourceCollection::new(
            config.name.clone(),
            config.url.clone(),
            config.author.clone(),
            config.quality,
            self.retrieved_at,
        );
        collection.branch = config.branch.clone();
        collection.namespace = config.namespace.clone();
        collection.license = match &config.license {
            Some(text) => Some(text.clone()),
            None => license_file.and_then(|path| read_license(&path)),
        };

        // 并行解析，collect 保留遍历顺序
        let parsed: Vec<FileParseResult> = rule_files
            .par_iter()
            .map(|path| self.parse_file(&root, path))
            .collect();

        for result in parsed {
            match result {
                FileParseResult::Parsed { path, rules } => collection.push_rules(path, rules),
                FileParseResult::Failed { path, error } => {
                    log::debug!("Parse failed for {}: {}", path, preview_compact(&error, 160));
                    collection.push_failure(path, error);
                }
            }
        }

        log::info!(
            "Retrieved {} YARA rules from repository: {}",
            collection.rule_count(),
            config.name
        );
        Ok(collection)
    }

    fn parse_file(&self, root: &Path, path: &Path) -> FileParseResult {
        let relative = relative_path(root, path);
        let parsed = fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| self.parser.parse_bytes(&bytes).map_err(|e| e.to_string()));
        match parsed {
            Ok(rules) => FileParseResult::Parsed {
                path: relative,
                rules,
            },
            Err(error) => FileParseResult::Failed {
                path: relative,
                error,
            },
        }
    }
}

/// 遍历仓库：规则文件列表（按文件名排序）+ 第一个找到的许可证文件
fn scan_repository(root: &Path) -> AppResult<(Vec<PathBuf>, Option<PathBuf>)> {
    let mut rule_files = Vec::new();
    let mut license_file: Option<PathBuf> = None;

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if is_rule_file(path) {
            rule_files.push(path.to_path_buf());
        } else if license_file.is_none() && is_license_file(&entry) {
            license_file = Some(path.to_path_buf());
        }
    }
    Ok((rule_files, license_file))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn is_rule_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| RULE_EXTENSIONS.iter().any(|r| ext.eq_ignore_ascii_case(r)))
        .unwrap_or(false)
}

fn is_license_file(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| LICENSE_FILE_NAMES.contains(&name))
        .unwrap_or(false)
}

fn read_license(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            log::warn!("Cannot read license file {}: {}", path.display(), e);
            None
        }
    }
}

/// 相对仓库根目录的路径，统一使用 `/` 分隔
fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
