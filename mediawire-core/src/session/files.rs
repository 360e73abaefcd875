//! Per-session temporary files

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Tracks the uploaded source and produced result of one session.
///
/// Every tracked path is removed by `cleanup`, or on drop if the session
/// future is cancelled before reaching it. File names carry the session id
/// so concurrent sessions uploading the same name never collide.
#[derive(Debug)]
pub struct SessionFiles {
    session_id: Uuid,
    upload: Option<PathBuf>,
    output: Option<PathBuf>,
}

impl SessionFiles {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            upload: None,
            output: None,
        }
    }

    /// Reserves the upload path for `file_name` inside `upload_dir`.
    pub fn track_upload(&mut self, upload_dir: &Path, file_name: &str) -> PathBuf {
        let path = upload_dir.join(format!("{}-{file_name}", self.session_id.simple()));
        self.upload = Some(path.clone());
        path
    }

    /// Registers the result path so it is removed with the session.
    pub fn track_output(&mut self, path: PathBuf) {
        self.output = Some(path);
    }

    /// Removes every tracked file. Missing files are not an error.
    pub async fn cleanup(&mut self) {
        for path in [self.upload.take(), self.output.take()].into_iter().flatten() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!("Removed temporary file {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!("Failed to remove temporary file {}: {}", path.display(), e)
                }
            }
        }
    }
}

impl Drop for SessionFiles {
    fn drop(&mut self) {
        for path in [self.upload.take(), self.output.take()].into_iter().flatten() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_upload_names_are_unique_per_session() {
        let dir = Path::new("/work/before_process");
        let mut first = SessionFiles::new(Uuid::new_v4());
        let mut second = SessionFiles::new(Uuid::new_v4());

        let a = first.track_upload(dir, "clip.mp4");
        let b = second.track_upload(dir, "clip.mp4");

        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with("-clip.mp4"));
        assert_eq!(a.parent(), Some(dir));
    }

    #[tokio::test]
    async fn test_cleanup_removes_tracked_files() {
        let temp_dir = tempdir().unwrap();
        let mut files = SessionFiles::new(Uuid::new_v4());

        let upload = files.track_upload(temp_dir.path(), "clip.mp4");
        let output = temp_dir.path().join("result.mp3");
        std::fs::write(&upload, b"partial").unwrap();
        std::fs::write(&output, b"result").unwrap();
        files.track_output(output.clone());

        files.cleanup().await;

        assert!(!upload.exists());
        assert!(!output.exists());
        assert!(files.upload.is_none() && files.output.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_missing_files() {
        let temp_dir = tempdir().unwrap();
        let mut files = SessionFiles::new(Uuid::new_v4());
        files.track_upload(temp_dir.path(), "never-written.mp4");

        files.cleanup().await;
    }

    #[test]
    fn test_drop_removes_files() {
        let temp_dir = tempdir().unwrap();
        let upload = {
            let mut files = SessionFiles::new(Uuid::new_v4());
            let upload = files.track_upload(temp_dir.path(), "clip.mp4");
            std::fs::write(&upload, b"partial").unwrap();
            upload
        };

        assert!(!upload.exists());
    }
}
