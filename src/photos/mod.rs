//! On-disk photo layout: `uploads/<institution folder>/<students|teachers>/<Person_Name>_<id>/`.

mod backup;

pub use backup::{BackupJob, DirectoryBackup, PhotoBackup, spawn_backup};

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::types::PhotoInfo;

pub const MAX_PHOTOS: usize = 5;
pub const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_FOLDER: &str = "default";
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("Only image files are allowed")]
    NotAnImage,
    #[error("Photo {0} exceeds the 5 MB limit")]
    TooLarge(String),
    #[error("At most {MAX_PHOTOS} photos may be uploaded")]
    TooMany,
    #[error("invalid photo directory: {0}")]
    InvalidPath(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonKind {
    Student,
    Teacher,
}

impl PersonKind {
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            PersonKind::Student => "students",
            PersonKind::Teacher => "teachers",
        }
    }

    fn placeholder(self) -> &'static str {
        match self {
            PersonKind::Student => "unknown_student",
            PersonKind::Teacher => "unknown_teacher",
        }
    }
}

/// One image received in a multipart form.
#[derive(Debug, Clone)]
pub struct UploadedPhoto {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadedPhoto {
    pub fn validate(&self) -> Result<(), PhotoError> {
        if !self.content_type.starts_with("image/") {
            return Err(PhotoError::NotAnImage);
        }
        if self.bytes.len() > MAX_PHOTO_BYTES {
            return Err(PhotoError::TooLarge(self.filename.clone()));
        }
        Ok(())
    }

    fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(str::to_ascii_lowercase)
    }
}

pub fn validate_batch(photos: &[UploadedPhoto]) -> Result<(), PhotoError> {
    if photos.len() > MAX_PHOTOS {
        return Err(PhotoError::TooMany);
    }
    photos.iter().try_for_each(UploadedPhoto::validate)
}

/// Directory segment for a person: `<Name>_<id>`. Whitespace runs become
/// `_` and anything outside `[A-Za-z0-9_-]` is replaced. The id keeps two
/// people with the same name apart.
#[must_use]
pub fn person_dir_name(name: &str, id: &str, kind: PersonKind) -> String {
    let name = sanitize_segment(name);
    let name = if name.is_empty() {
        kind.placeholder().to_string()
    } else {
        name
    };
    match sanitize_segment(id) {
        id if id.is_empty() => name,
        id => format!("{name}_{id}"),
    }
}

fn sanitize_segment(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

pub struct PhotoStore {
    base_path: PathBuf,
}

impl PhotoStore {
    pub fn new(uploads_dir: &Path) -> Self {
        Self {
            base_path: uploads_dir.to_path_buf(),
        }
    }

    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Relative directory stored in `photo_directory`.
    #[must_use]
    pub fn relative_dir(
        folder: Option<&str>,
        kind: PersonKind,
        person_name: &str,
        person_id: &str,
    ) -> String {
        format!(
            "{}/{}/{}",
            folder.filter(|f| !f.is_empty()).unwrap_or(DEFAULT_FOLDER),
            kind.dir_name(),
            person_dir_name(person_name, person_id, kind)
        )
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, PhotoError> {
        let path = Path::new(relative);
        let safe = path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || relative.is_empty() {
            return Err(PhotoError::InvalidPath(relative.to_string()));
        }
        Ok(self.base_path.join(path))
    }

    pub async fn ensure_institution_dirs(&self, folder: &str) -> Result<(), PhotoError> {
        for kind in [PersonKind::Student, PersonKind::Teacher] {
            let dir = self.resolve(&format!("{folder}/{}", kind.dir_name()))?;
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Writes each photo under `relative` and returns the absolute paths.
    pub async fn save(&self, relative: &str, photos: &[UploadedPhoto]) -> Result<Vec<PathBuf>, PhotoError> {
        validate_batch(photos)?;
        let dir = self.resolve(relative)?;
        fs::create_dir_all(&dir).await?;

        let mut saved = Vec::with_capacity(photos.len());
        for photo in photos {
            let suffix = format!(
                "{}-{}",
                Utc::now().timestamp_millis(),
                rand::thread_rng().gen_range(0..1_000_000_000u32)
            );
            let name = match photo.extension() {
                Some(ext) => format!("photos-{suffix}.{ext}"),
                None => format!("photos-{suffix}"),
            };

            let temp_path = dir.join(format!(".{}", Uuid::new_v4()));
            let mut file = File::create(&temp_path).await?;
            file.write_all(&photo.bytes).await?;
            file.sync_all().await?;

            let final_path = dir.join(name);
            fs::rename(&temp_path, &final_path).await?;
            saved.push(final_path);
        }

        Ok(saved)
    }

    /// Lists image files under `relative`; a missing directory is empty.
    pub async fn list(&self, relative: &str) -> Result<Vec<PhotoInfo>, PhotoError> {
        let dir = self.resolve(relative)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut photos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name().to_string_lossy().into_owned();
            let is_image = Path::new(&filename)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if is_image {
                photos.push(PhotoInfo {
                    path: format!("uploads/{relative}/{filename}"),
                    filename,
                });
            }
        }

        photos.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(photos)
    }

    /// Removes a person's directory. Returns false when it did not exist.
    pub async fn remove(&self, relative: &str) -> Result<bool, PhotoError> {
        let dir = self.resolve(relative)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
