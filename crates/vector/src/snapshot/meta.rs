//! On-disk snapshot descriptor

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{VectorError, VectorResult};

/// Directory name prefix of an admitted snapshot: `snapshot_<020d log id>`.
pub const SNAPSHOT_DIR_PREFIX: &str = "snapshot_";

const LOG_ID_DIGITS: usize = 20;

/// Immutable descriptor of one snapshot directory. Dropping the last handle
/// removes the directory recursively; this is the only deletion path.
#[derive(Debug)]
pub struct SnapshotMeta {
    index_id: u64,
    log_id: u64,
    path: PathBuf,
    file_names: Vec<String>,
}

impl SnapshotMeta {
    pub fn new(index_id: u64, path: impl Into<PathBuf>) -> VectorResult<Self> {
        let path = path.into();
        let log_id = parse_log_id_from_dir_name(&path)?;

        let mut file_names = Vec::new();
        let entries = fs::read_dir(&path).map_err(|e| {
            VectorError::SnapshotInvalid(format!("read snapshot dir {} failed: {}", path.display(), e))
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| {
                VectorError::SnapshotInvalid(format!(
                    "read snapshot dir {} failed: {}",
                    path.display(),
                    e
                ))
            })?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                file_names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        file_names.sort();

        // Verify before taking ownership: a rejected directory must stay on
        // disk for inspection, not be removed by Drop.
        verify_meta_file(&path.join("meta"), log_id)?;

        Ok(Self {
            index_id,
            log_id,
            path,
            file_names,
        })
    }

    pub fn index_id(&self) -> u64 {
        self.index_id
    }

    pub fn log_id(&self) -> u64 {
        self.log_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Regular files directly inside the snapshot directory, captured at
    /// init time.
    pub fn file_names(&self) -> &[String] {
        &self.file_names
    }

    pub fn data_path(&self) -> PathBuf {
        self.path
            .join(format!("index_{}_{}.idx", self.index_id, self.log_id))
    }

    pub fn meta_path(&self) -> PathBuf {
        self.path.join("meta")
    }
}

impl Drop for SnapshotMeta {
    fn drop(&mut self) {
        info!(
            "Delete vector index snapshot directory {}",
            self.path.display()
        );
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(
                "Remove snapshot directory {} failed: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Parse the log id out of a `snapshot_<020d>` directory name.
fn parse_log_id_from_dir_name(path: &Path) -> VectorResult<u64> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            VectorError::SnapshotInvalid(format!("bad snapshot path: {}", path.display()))
        })?;

    let digits = name.strip_prefix(SNAPSHOT_DIR_PREFIX).ok_or_else(|| {
        VectorError::SnapshotInvalid(format!("parse snapshot log id failed from {}", name))
    })?;
    if digits.len() != LOG_ID_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VectorError::SnapshotInvalid(format!(
            "parse snapshot log id failed from {}",
            name
        )));
    }

    digits.parse::<u64>().map_err(|e| {
        VectorError::SnapshotInvalid(format!("parse snapshot log id failed from {}: {}", name, e))
    })
}

// A present meta file must carry the same non-zero log id as the directory
// name; a zero or mismatching value marks a corrupt snapshot.
fn verify_meta_file(meta_path: &Path, expected_log_id: u64) -> VectorResult<()> {
    if !meta_path.exists() {
        return Ok(());
    }
    let content = fs::read_to_string(meta_path).map_err(|e| {
        VectorError::SnapshotInvalid(format!("read {} failed: {}", meta_path.display(), e))
    })?;
    let log_id = content
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .parse::<u64>()
        .unwrap_or(0);
    if log_id == 0 || log_id != expected_log_id {
        return Err(VectorError::SnapshotInvalid(format!(
            "meta file {} log id {} does not match snapshot {}",
            meta_path.display(),
            log_id,
            expected_log_id
        )));
    }
    Ok(())
}

/// Directory name of a snapshot frozen at `log_id`.
pub fn snapshot_dir_name(log_id: u64) -> String {
    format!("{}{:020}", SNAPSHOT_DIR_PREFIX, log_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_snapshot_dir(root: &Path, log_id: u64) -> PathBuf {
        let dir = root.join(snapshot_dir_name(log_id));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("meta"), format!("{}\n", log_id)).unwrap();
        fs::write(dir.join(format!("index_42_{}.idx", log_id)), b"data").unwrap();
        dir
    }

    #[test]
    fn test_parse_and_file_listing() {
        let root = tempfile::tempdir().unwrap();
        let dir = make_snapshot_dir(root.path(), 100);

        let meta = SnapshotMeta::new(42, &dir).unwrap();
        assert_eq!(meta.index_id(), 42);
        assert_eq!(meta.log_id(), 100);
        assert_eq!(meta.file_names(), &["index_42_100.idx", "meta"]);
        assert_eq!(meta.data_path(), dir.join("index_42_100.idx"));
        assert_eq!(meta.meta_path(), dir.join("meta"));
    }

    #[test]
    fn test_reject_bad_names() {
        let root = tempfile::tempdir().unwrap();
        for name in [
            "tmp_12345",
            "snapshot_abc",
            "snapshot_100",
            "snapshot_000000000000000000001", // 21 digits
            "other",
        ] {
            let dir = root.path().join(name);
            fs::create_dir_all(&dir).unwrap();
            let err = SnapshotMeta::new(42, &dir).unwrap_err();
            assert!(matches!(err, VectorError::SnapshotInvalid(_)), "{}", name);
        }
    }

    #[test]
    fn test_drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = make_snapshot_dir(root.path(), 7);

        let meta = SnapshotMeta::new(42, &dir).unwrap();
        assert!(dir.exists());
        drop(meta);
        assert!(!dir.exists());
    }

    #[test]
    fn test_reject_corrupt_meta_file() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(snapshot_dir_name(100));
        fs::create_dir_all(&dir).unwrap();

        // Zero means the meta file never recorded a real log id.
        fs::write(dir.join("meta"), "0\n").unwrap();
        let err = SnapshotMeta::new(42, &dir).unwrap_err();
        assert!(matches!(err, VectorError::SnapshotInvalid(_)));
        // A rejected directory is left on disk.
        assert!(dir.exists());

        fs::write(dir.join("meta"), "99\n").unwrap();
        assert!(SnapshotMeta::new(42, &dir).is_err());

        fs::write(dir.join("meta"), "garbage\n").unwrap();
        assert!(SnapshotMeta::new(42, &dir).is_err());

        fs::write(dir.join("meta"), "100\n").unwrap();
        assert!(SnapshotMeta::new(42, &dir).is_ok());
    }

    #[test]
    fn test_missing_directory_rejected() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(snapshot_dir_name(5));
        let err = SnapshotMeta::new(42, &dir).unwrap_err();
        assert!(matches!(err, VectorError::SnapshotInvalid(_)));
    }
}
