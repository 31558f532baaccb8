//! Paginated on-disk JSON archive of records.
//!
//! The archive directory holds one index file plus fixed-capacity page files.
//! Every write is a whole-file read-modify-write; a single writer is assumed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shogi_core::Record;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_PAGE_CAPACITY: usize = 100;
pub const INDEX_FILENAME: &str = "problems_index.json";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexFile {
    pub problem_files: Vec<PageDescriptor>,
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageFile {
    pub problems: Vec<Record>,
    pub count: usize,
    pub last_updated: String,
}

/// Result of writing one batch into its page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushOutcome {
    pub page_index: usize,
    pub filename: String,
    pub page_count: usize,
    pub new_page: bool,
}

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
    page_capacity: usize,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>, page_capacity: usize) -> Self {
        Self {
            root: root.into(),
            page_capacity: page_capacity.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILENAME)
    }

    /// Page holding the record with 1-based sequence number `running_total`.
    pub fn page_index_for(&self, running_total: usize) -> usize {
        running_total.saturating_sub(1) / self.page_capacity
    }

    pub fn page_filename(&self, page_index: usize) -> String {
        let start = page_index * self.page_capacity + 1;
        let end = (page_index + 1) * self.page_capacity;
        format!("problems_{start:04}-{end:04}.json")
    }

    pub async fn load_index(&self) -> Result<IndexFile> {
        read_json_or_default(&self.index_path()).await
    }

    pub async fn load_page(&self, filename: &str) -> Result<PageFile> {
        read_json_or_default(&self.root.join(filename)).await
    }

    /// Number of records already archived, summed over every indexed page.
    pub async fn existing_total(&self) -> Result<usize> {
        let index = self.load_index().await?;
        let mut total = 0;
        for descriptor in &index.problem_files {
            total += self.load_page(&descriptor.filename).await?.count;
        }
        Ok(total)
    }

    pub async fn flush_batch(&self, batch: &[Record], running_total: usize) -> Result<FlushOutcome> {
        self.flush_batch_at(batch, running_total, Utc::now()).await
    }

    /// Writes `batch` into the page that `running_total` (the sequence number
    /// of the batch's last record) falls on, keyed by record id.
    pub async fn flush_batch_at(
        &self,
        batch: &[Record],
        running_total: usize,
        now: DateTime<Utc>,
    ) -> Result<FlushOutcome> {
        ensure!(!batch.is_empty(), "refusing to flush an empty batch");
        let stamp = archive_timestamp(now);
        let page_index = self.page_index_for(running_total);
        let filename = self.page_filename(page_index);

        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating archive directory {}", self.root.display()))?;

        let mut index = self.load_index().await?;
        let new_page = !index.problem_files.iter().any(|d| d.filename == filename);
        if new_page {
            index.problem_files.push(PageDescriptor {
                filename: filename.clone(),
            });
        }
        index.last_updated = stamp.clone();
        write_json_atomic(&self.index_path(), &index).await?;

        let page = self.load_page(&filename).await?;
        let mut by_id: IndexMap<String, Record> = page
            .problems
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        for record in batch {
            by_id.insert(record.id.clone(), record.clone());
        }
        let problems: Vec<Record> = by_id.into_values().collect();
        let page = PageFile {
            count: problems.len(),
            problems,
            last_updated: stamp,
        };
        write_json_atomic(&self.root.join(&filename), &page).await?;

        info!(
            filename = %filename,
            batch = batch.len(),
            page_count = page.count,
            "flushed page"
        );

        Ok(FlushOutcome {
            page_index,
            filename,
            page_count: page.count,
            new_page,
        })
    }
}

pub fn archive_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match fs::read(path).await {
        Ok(bytes) => {
            serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
    }
}

/// Replace `path` with the pretty-printed JSON of `value` via temp-file rename.
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serializing {}", path.display()))?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(&bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "renaming temp file {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}
