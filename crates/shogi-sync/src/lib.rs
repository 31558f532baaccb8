//! Report-to-archive pipeline: builds one record per input report and pages
//! the records into the JSON archive.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shogi_core::{Analysis, Clock, IdResolution, Position, Record, SystemClock};
use shogi_extract::fields::parse_document;
use shogi_extract::{decode_sfen, extract_fields, parse_report};
use shogi_storage::{
    ArchiveStore, BackoffPolicy, HttpClientConfig, HttpFetcher, DEFAULT_PAGE_CAPACITY,
};
use tokio::fs;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "shogi-sync";

pub const INPUT_BASENAME: &str = "problem";
pub const INPUT_EXTENSION: &str = "txt";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub workspace_root: PathBuf,
    pub archive_dir: PathBuf,
    pub page_capacity: usize,
    pub id_resolution: IdResolution,
    pub strict_fields: bool,
    pub user_agent: Option<String>,
    pub http_timeout_secs: Option<u64>,
    pub http_max_retries: usize,
}

impl SyncConfig {
    pub fn for_workspace(root: impl Into<PathBuf>) -> Self {
        let workspace_root = root.into();
        Self {
            archive_dir: workspace_root.join("problems"),
            workspace_root,
            page_capacity: DEFAULT_PAGE_CAPACITY,
            id_resolution: IdResolution::Seconds,
            strict_fields: false,
            user_agent: None,
            http_timeout_secs: None,
            http_max_retries: 0,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `SHOGI_*` variables resolved through `lookup`.
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let workspace_root = lookup("SHOGI_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let defaults = Self::for_workspace(workspace_root);
        Self {
            archive_dir: lookup("SHOGI_ARCHIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.archive_dir),
            page_capacity: lookup("SHOGI_PAGE_CAPACITY")
                .and_then(|v| v.parse().ok())
                .filter(|&v: &usize| v > 0)
                .unwrap_or(defaults.page_capacity),
            id_resolution: lookup("SHOGI_ID_RESOLUTION")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.id_resolution),
            strict_fields: lookup("SHOGI_STRICT_FIELDS")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.strict_fields),
            user_agent: lookup("SHOGI_USER_AGENT"),
            http_timeout_secs: lookup("SHOGI_HTTP_TIMEOUT_SECS").and_then(|v| v.parse().ok()),
            http_max_retries: lookup("SHOGI_HTTP_MAX_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_max_retries),
            workspace_root: defaults.workspace_root,
        }
    }
}

/// Path of the `n`-th input report: `problem.txt`, `problem_2.txt`, `problem_3.txt`, ...
pub fn input_path(root: &Path, n: usize) -> PathBuf {
    if n <= 1 {
        root.join(format!("{INPUT_BASENAME}.{INPUT_EXTENSION}"))
    } else {
        root.join(format!("{INPUT_BASENAME}_{n}.{INPUT_EXTENSION}"))
    }
}

/// Where game pages come from. The HTTP fetcher in production.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch_document(&self, url: &str) -> Result<String>;
}

#[async_trait]
impl DocumentSource for HttpFetcher {
    async fn fetch_document(&self, url: &str) -> Result<String> {
        let page = self
            .fetch_text(url)
            .await
            .with_context(|| format!("fetching {url}"))?;
        Ok(page.body)
    }
}

pub struct RecordBuilder {
    documents: Box<dyn DocumentSource>,
    clock: Box<dyn Clock>,
    id_resolution: IdResolution,
    strict_fields: bool,
}

impl RecordBuilder {
    pub fn new(documents: Box<dyn DocumentSource>) -> Self {
        Self {
            documents,
            clock: Box::new(SystemClock),
            id_resolution: IdResolution::Seconds,
            strict_fields: false,
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_resolution(mut self, id_resolution: IdResolution) -> Self {
        self.id_resolution = id_resolution;
        self
    }

    pub fn with_strict_fields(mut self, strict_fields: bool) -> Self {
        self.strict_fields = strict_fields;
        self
    }

    /// Builds the record for one report file. The first line of the report is
    /// the game URL; every candidate line in the file becomes a candidate.
    pub async fn build(&self, report_path: &Path) -> Result<Record> {
        let span = info_span!("build_record", report = %report_path.display());
        self.build_inner(report_path).instrument(span).await
    }

    async fn build_inner(&self, report_path: &Path) -> Result<Record> {
        let report = fs::read_to_string(report_path)
            .await
            .with_context(|| format!("reading {}", report_path.display()))?;
        let url = report.lines().next().map(str::trim).unwrap_or_default().to_string();
        ensure!(
            !url.is_empty(),
            "{} has no source url on its first line",
            report_path.display()
        );

        let html = self.documents.fetch_document(&url).await?;
        let fields = {
            let document = parse_document(&html);
            extract_fields(&document, self.strict_fields)
                .with_context(|| format!("extracting metadata from {url}"))?
        };

        let board_encoding =
            decode_sfen(&url).with_context(|| format!("decoding board in {}", report_path.display()))?;
        let id = self.id_resolution.format_id(self.clock.now());
        let candidates = parse_report(&report)
            .with_context(|| format!("parsing candidates in {}", report_path.display()))?;

        Ok(Record::new(
            id,
            fields.strategy,
            Position { board_encoding },
            Analysis { url, candidates },
            fields.metadata,
        ))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed_reports: usize,
    pub flushed_batches: usize,
    pub archived_total: usize,
    pub archive_dir: String,
    pub index_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageStatus {
    pub filename: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveStatus {
    pub index_path: String,
    pub last_updated: String,
    pub pages: Vec<PageStatus>,
    pub total: usize,
}

pub struct SyncPipeline {
    config: SyncConfig,
    archive: ArchiveStore,
    builder: RecordBuilder,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let archive = ArchiveStore::new(config.archive_dir.clone(), config.page_capacity);
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: config.http_timeout_secs.map(Duration::from_secs),
            user_agent: config.user_agent.clone(),
            backoff: BackoffPolicy {
                max_retries: config.http_max_retries,
                ..Default::default()
            },
        })?;
        let builder = RecordBuilder::new(Box::new(http))
            .with_id_resolution(config.id_resolution)
            .with_strict_fields(config.strict_fields);
        Ok(Self {
            config,
            archive,
            builder,
        })
    }

    pub fn with_document_source(mut self, documents: Box<dyn DocumentSource>) -> Self {
        self.builder.documents = documents;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.builder = self.builder.with_clock(clock);
        self
    }

    pub fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    /// Processes `problem.txt`, `problem_2.txt`, ... until the next file is
    /// missing, flushing a batch every time the running total reaches a page
    /// boundary and once more for the trailing partial batch.
    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let capacity = self.archive.page_capacity();
        let mut running_total = self.archive.existing_total().await?;

        let mut batch = Vec::new();
        let mut processed_reports = 0usize;
        let mut flushed_batches = 0usize;

        for n in 1usize.. {
            let path = input_path(&self.config.workspace_root, n);
            if !fs::try_exists(&path)
                .await
                .with_context(|| format!("checking input path {}", path.display()))?
            {
                break;
            }

            let record = self.builder.build(&path).await?;
            info!(
                %run_id,
                report = %path.display(),
                id = %record.id,
                candidates = record.analysis.candidates.len(),
                "built record"
            );
            batch.push(record);
            running_total += 1;
            processed_reports += 1;

            if running_total % capacity == 0 {
                self.archive.flush_batch(&batch, running_total).await?;
                batch.clear();
                flushed_batches += 1;
            }
        }

        if !batch.is_empty() {
            self.archive.flush_batch(&batch, running_total).await?;
            flushed_batches += 1;
        }

        Ok(SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            processed_reports,
            flushed_batches,
            archived_total: running_total,
            archive_dir: self.archive.root().display().to_string(),
            index_path: self.archive.index_path().display().to_string(),
        })
    }

    pub async fn archive_status(&self) -> Result<ArchiveStatus> {
        let index = self.archive.load_index().await?;
        let mut pages = Vec::with_capacity(index.problem_files.len());
        for descriptor in &index.problem_files {
            let page = self.archive.load_page(&descriptor.filename).await?;
            pages.push(PageStatus {
                filename: descriptor.filename.clone(),
                count: page.count,
            });
        }
        Ok(ArchiveStatus {
            index_path: self.archive.index_path().display().to_string(),
            last_updated: index.last_updated,
            total: pages.iter().map(|p| p.count).sum(),
            pages,
        })
    }
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    SyncPipeline::new(SyncConfig::from_env())?.run_once().await
}

pub async fn archive_status_from_env() -> Result<ArchiveStatus> {
    SyncPipeline::new(SyncConfig::from_env())?.archive_status().await
}
