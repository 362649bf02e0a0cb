use std::collections::HashMap;
use std::path::Path;

use axum::extract::Multipart;
use axum::extract::multipart::{Field, MultipartError};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use crate::photos::{MAX_PHOTO_BYTES, MAX_PHOTOS, UploadedPhoto};
use crate::server::response::ApiError;

const PHOTO_FIELD: &str = "photos";

fn multipart_error(e: MultipartError) -> ApiError {
    ApiError {
        status: e.status(),
        message: e.body_text(),
    }
}

/// Text fields plus attached photos from a person form.
#[derive(Debug, Default)]
pub struct PersonForm {
    fields: HashMap<String, String>,
    pub photos: Vec<UploadedPhoto>,
}

impl PersonForm {
    /// Trimmed value of a text field; blank values count as absent.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Reads every field of a multipart person form into memory.
///
/// Photo limits are enforced while reading so an oversized upload is
/// refused before it is fully buffered.
pub async fn read_person_form(mut multipart: Multipart) -> Result<PersonForm, ApiError> {
    let mut form = PersonForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == PHOTO_FIELD && field.file_name().is_some() {
            if form.photos.len() == MAX_PHOTOS {
                return Err(ApiError::bad_request(format!(
                    "At most {MAX_PHOTOS} photos may be uploaded"
                )));
            }
            let photo = read_photo(field).await?;
            photo
                .validate()
                .map_err(|e| ApiError::bad_request(e.to_string()))?;
            form.photos.push(photo);
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            form.fields.insert(name, value);
        }
    }

    Ok(form)
}

async fn read_photo(mut field: Field<'_>) -> Result<UploadedPhoto, ApiError> {
    let filename = field.file_name().unwrap_or_default().to_string();
    let content_type = field.content_type().unwrap_or_default().to_string();

    let mut bytes = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if bytes.len() + chunk.len() > MAX_PHOTO_BYTES {
            return Err(ApiError::bad_request(format!(
                "Photo {filename} exceeds the 5 MB limit"
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(UploadedPhoto {
        filename,
        content_type,
        bytes,
    })
}

/// An uploaded file spooled to disk. The file is removed when this is dropped.
pub struct SpooledUpload {
    pub file: NamedTempFile,
    pub text_fields: HashMap<String, String>,
}

/// Streams the `file_field` part of a multipart body into a temporary file
/// under `dir`, collecting the remaining text fields.
pub async fn spool_upload(
    mut multipart: Multipart,
    file_field: &str,
    dir: &Path,
) -> Result<SpooledUpload, ApiError> {
    let mut spooled = None;
    let mut text_fields = HashMap::new();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == file_field {
            tokio::fs::create_dir_all(dir).await.map_err(spool_error)?;
            let temp = NamedTempFile::new_in(dir).map_err(spool_error)?;
            let mut writer = tokio::fs::File::from_std(temp.reopen().map_err(spool_error)?);
            while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                writer.write_all(&chunk).await.map_err(spool_error)?;
            }
            writer.flush().await.map_err(spool_error)?;
            spooled = Some(temp);
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            text_fields.insert(name, value);
        }
    }

    let file = spooled.ok_or_else(|| ApiError::bad_request("CSV file is required"))?;
    Ok(SpooledUpload { file, text_fields })
}

fn spool_error(e: std::io::Error) -> ApiError {
    tracing::error!("Failed to spool upload: {e}");
    ApiError::internal("Failed to store upload")
}
