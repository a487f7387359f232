//! Attachment uploads.
//!
//! Uploads are a call of their own: the client stores each file first and
//! then sends a message referencing the returned [`Media`] descriptors.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use rand::{Rng, distr::Alphanumeric};
use shared::models::Media;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::errors::{MessagingError, MessagingResult};

const TOKEN_LEN: usize = 32;

pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("media storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Streamed writes to a destination path.
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Writes the stream to `path`, returning the byte count. A failed
    /// write leaves nothing behind at `path`.
    async fn write(&self, path: &str, stream: ByteStream, max_bytes: u64) -> Result<u64, MediaError>;
}

/// Files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalMediaStorage {
    root: PathBuf,
}

impl LocalMediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn copy(file: &mut fs::File, mut stream: ByteStream, max_bytes: u64) -> Result<u64, MediaError> {
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written = written.saturating_add(u64::try_from(chunk.len()).unwrap_or(u64::MAX));
            if written > max_bytes {
                return Err(MediaError::TooLarge { limit: max_bytes });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl MediaStorage for LocalMediaStorage {
    async fn write(&self, path: &str, stream: ByteStream, max_bytes: u64) -> Result<u64, MediaError> {
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&target).await?;
        let result = Self::copy(&mut file, stream, max_bytes).await;
        drop(file);

        if result.is_err() {
            remove_partial(&target).await;
        }
        result
    }
}

async fn remove_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        warn!(path = %path.display(), error = %err, "failed to remove partial upload");
    }
}

/// Splits a MIME type into the media kind and file extension.
///
/// `image/svg+xml; charset=utf-8` gives `("image", "svg")`.
///
/// # Errors
/// `Validation` when either half is missing or holds unexpected characters.
pub fn classify(content_type: &str) -> MessagingResult<(String, String)> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let invalid = || MessagingError::Validation(format!("unsupported content type '{content_type}'"));

    let (kind, subtype) = essence.split_once('/').ok_or_else(invalid)?;
    let ext = subtype.split('+').next().unwrap_or_default();
    let well_formed = |part: &str| {
        !part.is_empty()
            && !part.starts_with('.')
            && !part.contains("..")
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    };
    if !well_formed(kind) || !well_formed(ext) {
        return Err(invalid());
    }
    Ok((kind.to_string(), ext.to_string()))
}

fn token() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[derive(Clone)]
pub struct MediaService {
    storage: Arc<dyn MediaStorage>,
    max_bytes: u64,
}

impl std::fmt::Debug for MediaService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaService")
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

impl MediaService {
    pub fn new(storage: Arc<dyn MediaStorage>, max_bytes: u64) -> Self {
        Self { storage, max_bytes }
    }

    /// Fresh storage location for an upload by `member`.
    ///
    /// # Errors
    /// `Validation` for malformed content types.
    pub fn destination(&self, member: Uuid, content_type: &str) -> MessagingResult<Media> {
        let (kind, ext) = classify(content_type)?;
        Ok(Media {
            kind,
            path: format!("{member}/{}.{ext}", token()),
        })
    }

    /// # Errors
    /// `Validation` for malformed content types or oversized uploads,
    /// `Provider` when the storage write fails.
    #[instrument(skip(self, stream), err)]
    pub async fn store(
        &self,
        member: Uuid,
        content_type: &str,
        stream: ByteStream,
    ) -> MessagingResult<Media> {
        let media = self.destination(member, content_type)?;
        let bytes = self
            .storage
            .write(&media.path, stream, self.max_bytes)
            .await
            .map_err(|err| match err {
                MediaError::TooLarge { .. } => MessagingError::Validation(err.to_string()),
                MediaError::Io(_) => MessagingError::Provider(err.to_string()),
            })?;
        info!(path = %media.path, bytes, "media stored");
        Ok(media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::tempdir;

    fn chunks(parts: &[&'static [u8]]) -> ByteStream {
        let items: Vec<Result<Bytes, std::io::Error>> =
            parts.iter().map(|part| Ok(Bytes::from_static(part))).collect();
        stream::iter(items).boxed()
    }

    #[test]
    fn classify_strips_suffixes_and_parameters() {
        assert_eq!(
            classify("image/png").unwrap(),
            ("image".to_string(), "png".to_string())
        );
        assert_eq!(
            classify("image/svg+xml").unwrap(),
            ("image".to_string(), "svg".to_string())
        );
        assert_eq!(
            classify("Audio/OGG; codecs=opus").unwrap(),
            ("audio".to_string(), "ogg".to_string())
        );
    }

    #[test]
    fn classify_rejects_malformed_types() {
        for bad in ["image", "image/", "/png", "", "image/../x", "image/+xml"] {
            assert!(classify(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn destination_uses_member_folder_and_random_token() {
        let service = MediaService::new(Arc::new(LocalMediaStorage::new("unused")), 10);
        let member = Uuid::new_v4();
        let first = service.destination(member, "image/jpeg").unwrap();
        let second = service.destination(member, "image/jpeg").unwrap();

        assert_eq!(first.kind, "image");
        let (folder, file) = first.path.split_once('/').unwrap();
        assert_eq!(folder, member.to_string());
        let (token, ext) = file.split_once('.').unwrap();
        assert_eq!(ext, "jpeg");
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first.path, second.path);
    }

    #[tokio::test]
    async fn store_writes_the_stream_under_root() {
        let dir = tempdir().unwrap();
        let service = MediaService::new(Arc::new(LocalMediaStorage::new(dir.path())), 1_024);
        let member = Uuid::new_v4();

        let media = service
            .store(member, "text/plain", chunks(&[b"hello ", b"world"]))
            .await
            .unwrap();
        let written = std::fs::read(dir.path().join(&media.path)).unwrap();
        assert_eq!(written, b"hello world");
        assert_eq!(media.kind, "text");
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_and_removed() {
        let dir = tempdir().unwrap();
        let service = MediaService::new(Arc::new(LocalMediaStorage::new(dir.path())), 4);
        let member = Uuid::new_v4();

        let err = service
            .store(member, "image/png", chunks(&[b"abc", b"def"]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_failed");

        let folder = dir.path().join(member.to_string());
        assert_eq!(std::fs::read_dir(folder).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn broken_stream_is_a_provider_fault() {
        let dir = tempdir().unwrap();
        let service = MediaService::new(Arc::new(LocalMediaStorage::new(dir.path())), 1_024);
        let failing: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::other("client went away")),
        ])
        .boxed();

        let err = service
            .store(Uuid::new_v4(), "image/png", failing)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "provider_fault");
    }
}
