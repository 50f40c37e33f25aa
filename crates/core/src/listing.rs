use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tracing::warn;
use walkdir::WalkDir;

use crate::file_monitor::FileMonitorError;

/// Name of the per-project scratch directory; never listed or monitored.
pub const PROJECT_USER_DIR: &str = ".Rproj.user";

/// Hidden entries that are still worth showing in a project listing.
const VISIBLE_DOTFILES: &[&str] = &[
    ".gitignore",
    ".Rbuildignore",
    ".Renviron",
    ".Rprofile",
    ".httr-oauth",
    ".travis.yml",
];

/// 決定哪些路徑會出現在清單與監控事件中。 / Decides which paths are visible in listings and change events.
///
/// Returns `true` to keep the entry. A directory rejected by the filter hides
/// its whole subtree.
pub type FileListingFilter = Arc<dyn Fn(&FileInfo) -> bool + Send + Sync>;

/// 預設清單篩選規則。 / Default listing filter: hides the scratch directory and most dotfiles.
pub fn default_listing_filter() -> FileListingFilter {
    Arc::new(|info: &FileInfo| {
        let Some(name) = info.file_name() else {
            return true;
        };
        if name == PROJECT_USER_DIR || name == ".DS_Store" {
            return false;
        }
        !name.starts_with('.') || VISIBLE_DOTFILES.contains(&name)
    })
}

/// Filter that keeps everything.
pub fn accept_all_filter() -> FileListingFilter {
    Arc::new(|_: &FileInfo| true)
}

/// 單一檔案或資料夾的描述。 / Snapshot of a single file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub is_directory: bool,
    pub size: u64,
    pub modified_unix_ms: Option<i64>,
}

impl FileInfo {
    /// 讀取路徑目前的中繼資料。 / Stats the path as it currently exists on disk.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let metadata = path.metadata()?;
        Ok(Self::from_metadata(path, &metadata))
    }

    pub fn from_metadata(path: impl Into<PathBuf>, metadata: &Metadata) -> Self {
        Self {
            path: path.into(),
            is_directory: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified_unix_ms: metadata
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64),
        }
    }

    /// Describes a path that no longer exists.
    pub fn removed(path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            path: path.into(),
            is_directory,
            size: 0,
            modified_unix_ms: None,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

/// 專案目錄的初始檔案樹快照。 / Initial listing of a monitored directory, depth-first and sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileTree {
    pub root: PathBuf,
    pub entries: Vec<FileInfo>,
}

impl FileTree {
    /// 掃描目錄並套用篩選。 / Walks `root`, skipping anything (and any subtree) the filter rejects.
    pub fn scan(
        root: impl AsRef<Path>,
        recursive: bool,
        filter: &FileListingFilter,
    ) -> Result<Self, FileMonitorError> {
        let root = root.as_ref();
        let max_depth = if recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            // The root is always kept, even when its own name would be filtered.
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                match entry.metadata() {
                    Ok(metadata) => filter(&FileInfo::from_metadata(entry.path(), &metadata)),
                    Err(_) => false,
                }
            });

        let mut entries = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                // Only an unreadable root fails the scan.
                Err(source) if source.depth() == 0 => {
                    return Err(FileMonitorError::Scan {
                        path: root.to_path_buf(),
                        source,
                    })
                }
                Err(err) => {
                    warn!(path = ?err.path(), %err, "skipping unreadable entry");
                    continue;
                }
            };
            match entry.metadata() {
                Ok(metadata) => entries.push(FileInfo::from_metadata(entry.path(), &metadata)),
                Err(err) => warn!(path = %entry.path().display(), %err, "skipping unreadable entry"),
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileInfo> {
        self.entries.iter()
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.entries.iter().any(|entry| entry.path == path)
    }
}

/// 檢查路徑本身與 `root` 之下的每一層父目錄是否都通過篩選。
/// Checks the entry and every ancestor directory below `root` against the filter.
pub fn is_visible(root: &Path, info: &FileInfo, filter: &FileListingFilter) -> bool {
    if !filter(info) {
        return false;
    }
    let Ok(relative) = info.path.strip_prefix(root) else {
        return false;
    };
    let mut ancestor = root.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        ancestor.push(component);
        if !filter(&FileInfo::removed(ancestor.clone(), true)) {
            return false;
        }
    }
    true
}
