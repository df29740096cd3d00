//! Immutable, content-addressed archive for raw and enriched event batches.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "agenda-storage";

/// Which stage of the pipeline produced a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Raw,
    Enriched,
}

impl BatchKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Enriched => "enriched",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchivedBatch {
    pub kind: BatchKind,
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct BatchArchive {
    root: PathBuf,
}

impl BatchArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// `<kind>/<source>/<YYYYmmdd>/<hash>.<ext>`; identical bytes captured on the
    /// same day for the same source land on the same path.
    pub fn batch_relative_path(
        &self,
        kind: BatchKind,
        captured_at: DateTime<Utc>,
        source: &str,
        content_hash: &str,
        extension: &str,
    ) -> PathBuf {
        let day = captured_at.format("%Y%m%d").to_string();
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "json" } else { ext };
        PathBuf::from(kind.dir_name())
            .join(sanitize_segment(source))
            .join(day)
            .join(format!("{content_hash}.{ext}"))
    }

    /// Writes a batch once; a second write of the same bytes is a no-op.
    pub async fn store_batch(
        &self,
        kind: BatchKind,
        captured_at: DateTime<Utc>,
        source: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<ArchivedBatch> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path =
            self.batch_relative_path(kind, captured_at, source, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);
        let archived = |deduplicated: bool| ArchivedBatch {
            kind,
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating archive directory {}", parent.display()))?;

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", absolute_path.display()))?
        {
            debug!(path = %absolute_path.display(), "batch already archived");
            return Ok(archived(true));
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp batch file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp batch file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp batch file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(archived(false)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(archived(true))
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "renaming temp batch {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}

fn sanitize_segment(input: &str) -> String {
    let cleaned = input
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect::<String>();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn captured_at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T08:30:00Z")
            .expect("ts")
            .with_timezone(&Utc)
    }

    #[test]
    fn batch_hashing_is_stable() {
        let hash = BatchArchive::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn batch_paths_are_grouped_by_kind_source_and_day() {
        let archive = BatchArchive::new("/tmp/archive");
        let path = archive.batch_relative_path(
            BatchKind::Enriched,
            captured_at(),
            "openagenda api",
            "abc",
            ".json",
        );
        assert_eq!(path, PathBuf::from("enriched/openagenda_api/20260301/abc.json"));
    }

    #[tokio::test]
    async fn identical_batches_are_archived_once() {
        let dir = tempdir().expect("tempdir");
        let archive = BatchArchive::new(dir.path());
        let body = br#"[{"uid":"evt-1"}]"#;

        let first = archive
            .store_batch(BatchKind::Raw, captured_at(), "openagenda_api", "json", body)
            .await
            .expect("first store");
        let second = archive
            .store_batch(BatchKind::Raw, captured_at(), "openagenda_api", "json", body)
            .await
            .expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert_eq!(first.kind, BatchKind::Raw);
        assert_eq!(first.byte_size, body.len());
        assert_eq!(first.content_hash, BatchArchive::sha256_hex(body));
        assert_eq!(first.absolute_path, dir.path().join(&first.relative_path));
        let stored = std::fs::read(&first.absolute_path).expect("read back");
        assert_eq!(stored, body.to_vec());
    }
}
