//! Replay file handling
//!
//! Every raw line received from the child is appended to the replay file.
//! The handle is shared between the loop and in-flight read tasks, so the
//! file sits behind a mutex and can only be closed once.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::error::RunError;
use crate::event::{parse_line, Action};

#[derive(Debug, Default)]
struct ReplayInner {
    file: Option<File>,
    closed: bool,
}

/// Shared, close-once handle to the replay file
#[derive(Debug, Clone)]
pub struct ReplayFile {
    path: PathBuf,
    inner: Arc<Mutex<ReplayInner>>,
}

impl ReplayFile {
    /// Create (or truncate) the replay file
    pub fn create(path: &Path) -> Result<Self, RunError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| RunError::ReplayOpen {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let file = File::create(path).map_err(|source| RunError::ReplayOpen {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "replay file opened");

        Ok(Self {
            path: path.to_path_buf(),
            inner: Arc::new(Mutex::new(ReplayInner {
                file: Some(file),
                closed: false,
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ReplayInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one raw line. Writes after close are dropped.
    pub fn write_line(&self, line: impl AsRef<[u8]>) -> io::Result<()> {
        let mut inner = self.lock();
        match inner.file.as_mut() {
            Some(file) => {
                file.write_all(line.as_ref())?;
                file.write_all(b"\n")
            }
            None => Ok(()),
        }
    }

    /// Flush and close. Returns true only for the call that actually closed it.
    pub fn close(&self) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        inner.closed = true;
        if let Some(mut file) = inner.file.take() {
            if let Err(e) = file.flush() {
                warn!(path = %self.path.display(), error = %e, "failed to flush replay file");
            }
        }
        debug!(path = %self.path.display(), "replay file closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Count test-level run events in a previous replay file.
///
/// Used as the seed estimate for the next run; `None` when the file is
/// missing, unreadable or holds no run events.
pub fn seed_estimate(path: &Path) -> Option<usize> {
    let bytes = fs::read(path).ok()?;
    let count = String::from_utf8_lossy(&bytes)
        .lines()
        .filter_map(parse_line)
        .filter(|event| event.action == Action::Run && !event.test.is_empty())
        .count();

    (count > 0).then_some(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_close_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("replay.json");
        let replay = ReplayFile::create(&path).unwrap();

        replay.write_line(r#"{"Action":"start","Package":"p"}"#).unwrap();
        let clone = replay.clone();
        clone.write_line(&b"not a record \xff"[..]).unwrap();

        assert!(replay.close());
        assert!(!clone.close());
        assert!(replay.is_closed());

        // Late writes from a pending read are ignored
        clone.write_line("late").unwrap();

        let content = fs::read(&path).unwrap();
        assert_eq!(
            content,
            b"{\"Action\":\"start\",\"Package\":\"p\"}\nnot a record \xff\n".to_vec()
        );
    }

    #[test]
    fn test_create_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a file
        let err = ReplayFile::create(dir.path()).unwrap_err();
        assert!(matches!(err, RunError::ReplayOpen { .. }));
    }

    #[test]
    fn test_seed_estimate_counts_test_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("previous.json");
        fs::write(
            &path,
            [
                r#"{"Action":"start","Package":"p"}"#,
                r#"{"Action":"run","Package":"p","Test":"TestA"}"#,
                r#"{"Action":"run","Package":"p","Test":"TestA/sub"}"#,
                "garbage",
                r#"{"Action":"pass","Package":"p","Test":"TestA"}"#,
                r#"{"Action":"run","Package":"q","Test":"TestB"}"#,
            ]
            .join("\n"),
        )
        .unwrap();

        assert_eq!(seed_estimate(&path), Some(3));

        // Stray non-UTF-8 output does not hide the records around it
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(b"\ndiag \xff\xfe\n");
        bytes.extend_from_slice(br#"{"Action":"run","Package":"q","Test":"TestC"}"#);
        fs::write(&path, bytes).unwrap();
        assert_eq!(seed_estimate(&path), Some(4));
        assert_eq!(seed_estimate(&dir.path().join("missing.json")), None);
    }
}
