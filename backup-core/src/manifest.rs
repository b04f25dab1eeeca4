//! 文件清单、排除规则与目录扫描

use crate::checksum::sha256_file_blocking;
use crate::constants::backup::DEFAULT_EXCLUDES;
use crate::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;
use walkdir::WalkDir;

/// 清单中的单个文件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    /// 相对项目根目录的路径，使用 `/` 分隔
    pub path: String,
    pub hash: String,
    pub size: u64,
    /// 修改时间 (Unix 秒)
    pub mtime: i64,
}

/// 文件在某一时刻的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub hash: String,
    pub size: u64,
    pub mtime: i64,
}

/// 路径 -> 文件状态，按路径排序
pub type ManifestMap = BTreeMap<String, FileState>;

/// 备份清单: 本次归档包含的文件，以及相对基础备份被删除的文件 (墓碑)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
    #[serde(default)]
    pub deleted: Vec<String>,
}

impl Manifest {
    pub fn from_map(map: &ManifestMap) -> Self {
        let entries = map
            .iter()
            .map(|(path, state)| ManifestEntry {
                path: path.clone(),
                hash: state.hash.clone(),
                size: state.size,
                mtime: state.mtime,
            })
            .collect();
        Self {
            entries,
            deleted: Vec::new(),
        }
    }

    pub fn to_map(&self) -> ManifestMap {
        let mut map = ManifestMap::new();
        self.apply_to(&mut map);
        map
    }

    /// 把本清单叠加到已有状态上: 覆盖新增/修改的文件，移除墓碑中的文件
    pub fn apply_to(&self, map: &mut ManifestMap) {
        for entry in &self.entries {
            map.insert(
                entry.path.clone(),
                FileState {
                    hash: entry.hash.clone(),
                    size: entry.size,
                    mtime: entry.mtime,
                },
            );
        }
        for path in &self.deleted {
            map.remove(path);
        }
    }

    pub fn files_count(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// 排除规则集合
///
/// 规则语义:
/// - `dir/*`：排除任意层级下名为 `dir` 的目录（可带中间路径，如 `storage/logs/*`）
/// - 含 `/` 的规则：匹配相对路径的结尾部分
/// - 不含 `/` 的规则：匹配文件或目录名，如 `*.log`、`.env`
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    patterns: Vec<String>,
    path_rules: Vec<Regex>,
    name_rules: Vec<Regex>,
}

impl ExcludeSet {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if !pattern.is_empty() && !unique.iter().any(|p| p == pattern) {
                unique.push(pattern.to_string());
            }
        }

        let mut path_rules = Vec::new();
        let mut name_rules = Vec::new();
        for pattern in &unique {
            if let Some(dir) = pattern.strip_suffix("/*") {
                let dir = dir.trim_start_matches('/');
                path_rules.push(Regex::new(&format!(
                    "^(?:.*/)?{}(?:/.*)?$",
                    glob_to_regex(dir)
                ))?);
            } else if pattern.contains('/') {
                let pattern = pattern.trim_start_matches('/');
                path_rules.push(Regex::new(&format!(
                    "^(?:.*/)?{}$",
                    glob_to_regex(pattern)
                ))?);
            } else {
                name_rules.push(Regex::new(&format!("^{}$", glob_to_regex(pattern)))?);
            }
        }

        Ok(Self {
            patterns: unique,
            path_rules,
            name_rules,
        })
    }

    /// 默认规则 + 项目规则 + 附加规则，去重
    pub fn with_defaults<S: AsRef<str>>(extra: &[S]) -> Result<Self> {
        Self::new(
            DEFAULT_EXCLUDES
                .iter()
                .map(|s| s.to_string())
                .chain(extra.iter().map(|s| s.as_ref().to_string())),
        )
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// 判断相对路径是否被排除
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        self.name_rules.iter().any(|r| r.is_match(name))
            || self.path_rules.iter().any(|r| r.is_match(relative_path))
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    for c in glob.chars() {
        match c {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out
}

/// 扫描到的文件
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub size: u64,
    pub mtime: i64,
}

/// 遍历项目目录，返回未被排除的普通文件（按路径排序）
///
/// 阻塞操作，调用方应放在 `spawn_blocking` 中执行
pub fn scan_tree(root: &Path, excludes: &ExcludeSet) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            match entry.path().strip_prefix(root) {
                Ok(rel) => !excludes.is_excluded(&to_archive_path(rel)),
                Err(_) => true,
            }
        });

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative_path = to_archive_path(entry.path().strip_prefix(root)?);
        let metadata = entry.metadata()?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        files.push(ScannedFile {
            relative_path,
            absolute_path: entry.path().to_path_buf(),
            size: metadata.len(),
            mtime,
        });
    }

    debug!("扫描目录 {} 完成，共 {} 个文件", root.display(), files.len());
    Ok(files)
}

/// tar 归档内部统一使用 `/` 分隔符
pub fn to_archive_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// 对比结果: 需要归档的文件与墓碑
#[derive(Debug, Clone, Default)]
pub struct TreeDiff {
    /// 需要写入归档的文件
    pub changed: Vec<ScannedFile>,
    /// 本次清单
    pub manifest: Manifest,
}

/// 构建全量清单，每个文件都计算哈希
pub fn build_full(files: Vec<ScannedFile>) -> Result<TreeDiff> {
    let mut entries = Vec::with_capacity(files.len());
    for file in &files {
        entries.push(ManifestEntry {
            path: file.relative_path.clone(),
            hash: sha256_file_blocking(&file.absolute_path)?,
            size: file.size,
            mtime: file.mtime,
        });
    }

    Ok(TreeDiff {
        changed: files,
        manifest: Manifest {
            entries,
            deleted: Vec::new(),
        },
    })
}

/// 与基础备份的有效清单对比，只保留新增或变化的文件
///
/// 大小与修改时间都未变时视为未变化；否则重新计算哈希，哈希相同也视为未变化
pub fn build_incremental(files: Vec<ScannedFile>, base: &ManifestMap) -> Result<TreeDiff> {
    let mut changed = Vec::new();
    let mut entries = Vec::new();
    let mut seen = std::collections::BTreeSet::new();

    for file in files {
        seen.insert(file.relative_path.clone());

        if let Some(prev) = base.get(&file.relative_path) {
            if prev.size == file.size && prev.mtime == file.mtime {
                continue;
            }
            let hash = sha256_file_blocking(&file.absolute_path)?;
            if hash == prev.hash {
                continue;
            }
            entries.push(ManifestEntry {
                path: file.relative_path.clone(),
                hash,
                size: file.size,
                mtime: file.mtime,
            });
        } else {
            entries.push(ManifestEntry {
                path: file.relative_path.clone(),
                hash: sha256_file_blocking(&file.absolute_path)?,
                size: file.size,
                mtime: file.mtime,
            });
        }
        changed.push(file);
    }

    let deleted = base
        .keys()
        .filter(|path| !seen.contains(*path))
        .cloned()
        .collect();

    Ok(TreeDiff {
        changed,
        manifest: Manifest { entries, deleted },
    })
}
