use anyhow::Context;
use uuid::Uuid;

use crate::storage::StorageClient;
use crate::uploads::UploadedFile;

/// Where an uploaded image ended up.
#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub key: String,
    pub url: String,
}

pub const AVATAR_FOLDER: &str = "avatars";
pub const COVER_FOLDER: &str = "covers";

pub async fn upload_image(
    storage: &dyn StorageClient,
    folder: &str,
    file: UploadedFile,
) -> anyhow::Result<StoredMedia> {
    let ext = ext_from_mime(&file.content_type).unwrap_or("bin");
    let key = format!("{}/{}.{}", folder, Uuid::new_v4(), ext);
    storage
        .put_object(&key, file.body.clone(), &file.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    let url = storage.public_url(&key);
    tracing::debug!(file_name = ?file.file_name, key = %key, "image uploaded");
    Ok(StoredMedia { key, url })
}

/// Removes uploads whose owning record was never written. Failures are only logged.
pub async fn discard(storage: &dyn StorageClient, media: &[StoredMedia]) {
    for m in media {
        if let Err(e) = storage.delete_object(&m.key).await {
            tracing::warn!(error = %e, key = %m.key, "failed to delete orphaned upload");
        }
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}
