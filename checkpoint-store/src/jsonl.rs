//! Append-only JSON Lines checkpoint, one `KeywordResult` per line.

use crate::{archive_stamp, CheckpointStore};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::io::SeekFrom;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use trendscout_core::{keyword_key, CheckpointError, KeywordResult};

pub struct JsonlCheckpoint {
    path: PathBuf,
    known: HashSet<String>,
    pending: Vec<KeywordResult>,
}

impl JsonlCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            known: HashSet::new(),
            pending: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_log(&self) -> Result<Vec<KeywordResult>, CheckpointError> {
        match fs::metadata(&self.path).await {
            Ok(meta) if meta.is_dir() => {
                return Err(CheckpointError::Unavailable {
                    reason: format!("{} is a directory", self.path.display()),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
            Ok(_) => {}
        }
        let raw = fs::read_to_string(&self.path).await?;

        // Only newline-terminated lines were fully flushed. A trailing fragment
        // is a write cut short by a crash and is dropped, not reported.
        let complete = match raw.rfind('\n') {
            Some(end) => &raw[..=end],
            None => "",
        };
        let fragment = &raw[complete.len()..];
        if !fragment.trim().is_empty() {
            warn!(
                "Ignoring unterminated final line {} of {} ({} bytes)",
                complete.lines().count() + 1,
                self.path.display(),
                fragment.len()
            );
        }

        let mut records = Vec::new();
        for (index, line) in complete.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: KeywordResult =
                serde_json::from_str(line).map_err(|e| CheckpointError::Corrupt {
                    location: format!("{}:{}", self.path.display(), index + 1),
                    reason: e.to_string(),
                })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Cuts the file back to its last newline so the next batch does not
    /// land on the end of a torn line.
    async fn truncate_torn_tail(&self) -> Result<(), CheckpointError> {
        let mut file = match OpenOptions::new().read(true).write(true).open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        if len == 0 {
            return Ok(());
        }

        file.seek(SeekFrom::End(-1)).await?;
        if file.read_u8().await? == b'\n' {
            return Ok(());
        }

        file.seek(SeekFrom::Start(0)).await?;
        let mut raw = Vec::with_capacity(len as usize);
        file.read_to_end(&mut raw).await?;
        let keep = raw
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |end| end + 1);

        warn!(
            "Truncating {} bytes of unterminated data from {}",
            raw.len() - keep,
            self.path.display()
        );
        file.set_len(keep as u64).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Timestamped sibling of the log path, suffixed further if that name is
    /// already taken.
    async fn archive_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "checkpoint".to_string());
        let ext = self.path.extension().map(|e| e.to_string_lossy().into_owned());
        let stamp = archive_stamp();

        let mut n = 0;
        loop {
            let tag = if n == 0 { stamp.clone() } else { format!("{}-{}", stamp, n) };
            let name = match &ext {
                Some(ext) => format!("{}.{}.{}", stem, tag, ext),
                None => format!("{}.{}", stem, tag),
            };
            let candidate = self.path.with_file_name(name);
            if !fs::try_exists(&candidate).await.unwrap_or(false) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[async_trait]
impl CheckpointStore for JsonlCheckpoint {
    async fn load_existing(&mut self) -> Result<HashSet<String>, CheckpointError> {
        let records = self.read_log().await?;
        self.known = records.iter().map(KeywordResult::key).collect();
        debug!(
            "Loaded {} checkpoint records ({} keywords) from {}",
            records.len(),
            self.known.len(),
            self.path.display()
        );
        Ok(self.known.clone())
    }

    fn has(&self, keyword: &str) -> bool {
        self.known.contains(&keyword_key(keyword))
    }

    async fn append(&mut self, result: KeywordResult) -> Result<(), CheckpointError> {
        self.known.insert(result.key());
        self.pending.push(result);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), CheckpointError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut batch = String::new();
        for record in &self.pending {
            batch.push_str(&serde_json::to_string(record)?);
            batch.push('\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        self.truncate_torn_tail().await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(batch.as_bytes()).await?;
        file.sync_data().await?;

        info!(
            "Checkpoint flushed {} records to {}",
            self.pending.len(),
            self.path.display()
        );
        self.pending.clear();
        Ok(())
    }

    async fn read_all(&mut self) -> Result<Vec<KeywordResult>, CheckpointError> {
        self.flush().await?;
        self.read_log().await
    }

    async fn archive(&mut self) -> Result<Option<String>, CheckpointError> {
        self.flush().await?;
        if fs::metadata(&self.path).await.is_err() {
            return Ok(None);
        }

        let target = self.archive_path().await;
        fs::rename(&self.path, &target).await?;
        self.known.clear();

        info!("Archived checkpoint to {}", target.display());
        Ok(Some(target.display().to_string()))
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}
