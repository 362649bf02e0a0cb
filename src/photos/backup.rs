use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::Result;

/// Durable copy of a person's photos kept outside the uploads tree.
///
/// Backups run after the owning record is committed; a failure is logged
/// and never reaches the request that triggered it.
pub trait PhotoBackup: Send + Sync {
    fn name(&self) -> &str;

    fn backup(&self, job: &BackupJob) -> Result<usize>;
}

#[derive(Debug, Clone)]
pub struct BackupJob {
    pub institution_folder: String,
    pub person_dir: String,
    pub files: Vec<PathBuf>,
}

/// Mirrors photos into `<root>/<institution folder>/<person dir>/`.
pub struct DirectoryBackup {
    root: PathBuf,
}

impl DirectoryBackup {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl PhotoBackup for DirectoryBackup {
    fn name(&self) -> &str {
        "directory"
    }

    fn backup(&self, job: &BackupJob) -> Result<usize> {
        let target = self.root.join(&job.institution_folder).join(&job.person_dir);
        std::fs::create_dir_all(&target)?;

        let mut copied = 0;
        for file in &job.files {
            let Some(name) = file.file_name() else {
                continue;
            };
            std::fs::copy(file, target.join(name))?;
            copied += 1;
        }
        Ok(copied)
    }
}

/// Runs `job` on the blocking pool and logs the outcome.
pub fn spawn_backup(backup: Arc<dyn PhotoBackup>, job: BackupJob) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || match backup.backup(&job) {
        Ok(copied) => tracing::info!(
            "Backed up {copied} photos for {}/{} via {}",
            job.institution_folder,
            job.person_dir,
            backup.name()
        ),
        Err(e) => tracing::warn!(
            "Photo backup via {} failed for {}/{}: {e}",
            backup.name(),
            job.institution_folder,
            job.person_dir
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_directory_backup_copies_files() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let photo = source.path().join("photos-1.png");
        std::fs::write(&photo, b"png").unwrap();

        let backup: Arc<dyn PhotoBackup> = Arc::new(DirectoryBackup::new(target.path()));
        let job = BackupJob {
            institution_folder: "alpha".to_string(),
            person_dir: "Ada_Lovelace".to_string(),
            files: vec![photo],
        };
        spawn_backup(backup, job).await.unwrap();

        let copied = target.path().join("alpha/Ada_Lovelace/photos-1.png");
        assert_eq!(std::fs::read(copied).unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_failed_backup_is_contained() {
        let target = TempDir::new().unwrap();
        let backup: Arc<dyn PhotoBackup> = Arc::new(DirectoryBackup::new(target.path()));
        let job = BackupJob {
            institution_folder: "alpha".to_string(),
            person_dir: "Ghost".to_string(),
            files: vec![PathBuf::from("/nonexistent/photo.png")],
        };

        // The task completes normally even though the copy fails.
        spawn_backup(backup, job).await.unwrap();
    }
}
