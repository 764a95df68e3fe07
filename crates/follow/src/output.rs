use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{fs::File, io::AsyncWriteExt};

use crate::{
    config::SessionConfig,
    error::{FollowError, FollowResult},
};

/// Where the segments of one stream end up.
///
/// `{root}[/{bucket}]/{[timestamp-]name}`, where bucket is the unix time
/// divided by the bucket window, so a long capture is split over several
/// directories.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    bucket_window: Option<Duration>,
    timestamp_prefix: bool,
}

impl OutputLayout {
    pub fn new(root: PathBuf, bucket_window: Option<Duration>, timestamp_prefix: bool) -> Self {
        Self {
            root,
            bucket_window,
            timestamp_prefix,
        }
    }

    pub fn from_config(root: PathBuf, config: &SessionConfig) -> Self {
        Self::new(root, config.bucket_window, config.timestamp_prefix)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket(&self, now: DateTime<Utc>) -> Option<i64> {
        match self.bucket_window {
            Some(window) if window.as_secs() > 0 => Some(now.timestamp() / window.as_secs() as i64),
            _ => None,
        }
    }

    pub fn bucket_dir(&self, now: DateTime<Utc>) -> PathBuf {
        match self.bucket(now) {
            Some(bucket) => self.root.join(bucket.to_string()),
            None => self.root.clone(),
        }
    }

    pub fn file_name(&self, name: &str, now: DateTime<Utc>) -> String {
        let name = name.replace('/', "__");
        if self.timestamp_prefix {
            format!("{}-{name}", now.timestamp())
        } else {
            name
        }
    }

    pub fn segment_path(&self, name: &str, now: DateTime<Utc>) -> PathBuf {
        self.bucket_dir(now).join(self.file_name(name, now))
    }

    /// Find a saved copy of `name` in the current or the previous bucket.
    ///
    /// A segment saved just before a bucket boundary stays listed in the
    /// playlist after it, so the previous bucket has to be searched too.
    /// Only meaningful without a timestamp prefix.
    pub async fn find_saved(&self, name: &str, now: DateTime<Utc>) -> Option<PathBuf> {
        let file_name = self.file_name(name, now);
        let mut dirs = vec![self.bucket_dir(now)];
        if let Some(bucket) = self.bucket(now) {
            dirs.push(self.root.join((bucket - 1).to_string()));
        }

        for dir in dirs {
            let path = dir.join(&file_name);
            if segment_exists(&path).await {
                return Some(path);
            }
        }
        None
    }
}

/// Whether a non-empty file is already saved at `path`.
pub async fn segment_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|p| p.is_file() && p.len() > 0)
        .unwrap_or_default()
}

/// Write `data` to `path`, creating parent directories.
///
/// The file is removed again unless its final length matches `data`.
pub async fn save_segment(path: &Path, data: &[u8]) -> FollowResult<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let result = write_file(path, data).await;
    finish_write(path, result, data.len() as u64).await
}

/// Check the written length against `expected`, removing the file on any
/// failure.
async fn finish_write(path: &Path, result: FollowResult<u64>, expected: u64) -> FollowResult<u64> {
    let result = match result {
        Ok(written) if written == expected => return Ok(written),
        Ok(written) => Err(FollowError::ShortWrite { written, expected }),
        Err(e) => Err(e),
    };

    if let Err(e) = tokio::fs::remove_file(path).await {
        log::warn!("Failed to remove partial file {}: {e}", path.display());
    }
    result
}

async fn write_file(path: &Path, data: &[u8]) -> FollowResult<u64> {
    let mut file = File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(file.metadata().await?.len())
}
