use std::fs;
use std::io;
use std::path::Path;

use tracing::error;

/// Writes data atomically by using a temporary sibling file followed by rename.  
/// 以臨時檔案搭配 rename 實現原子寫入。
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)
}

/// Checks writability by creating then deleting a uniquely named file.
/// 建立並刪除一個唯一名稱的檔案以確認目錄可寫入。
///
/// A failed cleanup is logged but still counts as writable.
pub fn can_write_to_dir(dir: &Path) -> bool {
    let marker = dir.join(uuid::Uuid::new_v4().to_string());
    if fs::write(&marker, "test").is_err() {
        return false;
    }
    if let Err(err) = fs::remove_file(&marker) {
        error!(path = %marker.display(), %err, "failed to remove write check file");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_check_leaves_directory_clean() {
        let dir = tempdir().unwrap();
        assert!(can_write_to_dir(dir.path()));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(!can_write_to_dir(&dir.path().join("missing")));
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proj.Rproj");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!path.with_extension("tmp").exists());
    }
}
