use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rsession_core::PROJECT_USER_DIR;
use thiserror::Error;

/// 建立暫存目錄時的錯誤。 / Errors raised while preparing the scratch directory.
#[derive(Debug, Error)]
pub enum ScratchPathError {
    #[error("project file {0} has no parent directory")]
    NoParent(PathBuf),
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to hide directory {path}: {source}")]
    Hide {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ScratchPathError {
    /// 給使用者看的簡短說明。 / Short description suitable for a user-facing message.
    pub fn summary(&self) -> String {
        match self {
            ScratchPathError::NoParent(_) => "the project file has no parent directory".into(),
            ScratchPathError::CreateDir { source, .. } | ScratchPathError::Hide { source, .. } => {
                source.to_string()
            }
        }
    }
}

/// 取得目前作業系統使用者名稱。 / Name of the invoking OS user, if any.
pub fn current_username() -> Option<String> {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// 計算（並建立）專案的私人暫存目錄。
/// Computes and creates `<project dir>/.Rproj.user[/<user>]/<context id>`.
///
/// Every level is created only when missing, so the call is idempotent.
pub fn compute_scratch_path(
    project_file: &Path,
    username: Option<&str>,
    context_id: &str,
) -> Result<PathBuf, ScratchPathError> {
    let parent = project_file
        .parent()
        .ok_or_else(|| ScratchPathError::NoParent(project_file.to_path_buf()))?;

    let mut dir = parent.join(PROJECT_USER_DIR);
    if !dir.exists() {
        ensure_dir(&dir)?;
        mark_hidden(&dir)?;
    }

    if let Some(user) = username.filter(|user| !user.is_empty()) {
        dir.push(user);
        ensure_dir(&dir)?;
    }

    dir.push(context_id);
    ensure_dir(&dir)?;
    Ok(dir)
}

fn ensure_dir(path: &Path) -> Result<(), ScratchPathError> {
    fs::create_dir_all(path).map_err(|source| ScratchPathError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(windows)]
fn mark_hidden(path: &Path) -> Result<(), ScratchPathError> {
    use std::process::Command;

    let status = Command::new("attrib")
        .arg("+h")
        .arg(path)
        .status()
        .map_err(|source| ScratchPathError::Hide {
            path: path.to_path_buf(),
            source,
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(ScratchPathError::Hide {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::Other, format!("attrib exited with {status}")),
        })
    }
}

// 以 '.' 開頭的名稱在 Unix 上已是隱藏檔。 / Dot-prefixed names are already hidden on Unix.
#[cfg(not(windows))]
fn mark_hidden(_path: &Path) -> Result<(), ScratchPathError> {
    Ok(())
}
