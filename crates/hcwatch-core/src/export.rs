// ── Event sinks ──
//
// Sinks receive each canonical event once, in order. Delivery is at least
// once across restarts, so the SQL sink ignores duplicate keys and the file
// sink is append-only.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime, SecondsFormat};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::event::Event;

/// A destination for canonical events.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, event: &Event) -> Result<(), CoreError>;

    async fn bulk_export(&self, events: &[Event]) -> Result<(), CoreError> {
        for event in events {
            self.export(event).await?;
        }
        Ok(())
    }

    /// Flush and release resources.
    async fn close(&self) -> Result<(), CoreError>;
}

// ── File sink ───────────────────────────────────────────────────────

/// Local wall clock, replaceable in tests.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Appends canonical lines to `hcw_YYYY-MM-DD.jsonl` in a directory.
///
/// The file is reopened when the local date changes and flushed once the
/// flush interval has elapsed since the last flush.
pub struct FileExporter {
    dir: PathBuf,
    flush_interval: Duration,
    clock: Clock,
    state: Mutex<Option<OpenFile>>,
}

struct OpenFile {
    writer: BufWriter<File>,
    date: NaiveDate,
    last_flush: NaiveDateTime,
}

impl FileExporter {
    pub fn new(dir: impl Into<PathBuf>, flush_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            flush_interval,
            clock: Arc::new(|| Local::now().naive_local()),
            state: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Path of the file events for `date` go to.
    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("hcw_{}.jsonl", date.format("%Y-%m-%d")))
    }

    async fn open(&self, now: NaiveDateTime) -> Result<OpenFile, CoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.file_for(now.date());
        info!(path = %path.display(), "opening output file");
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(OpenFile {
            writer: BufWriter::new(file),
            date: now.date(),
            last_flush: now,
        })
    }
}

#[async_trait]
impl Exporter for FileExporter {
    async fn export(&self, event: &Event) -> Result<(), CoreError> {
        let now = (self.clock)();
        let mut state = self.state.lock().await;

        let stale = state.as_ref().is_some_and(|open| open.date != now.date());
        if stale {
            if let Some(mut old) = state.take() {
                old.writer.flush().await?;
            }
        }
        let open = match state.take() {
            Some(open) => open,
            None => self.open(now).await?,
        };
        let open = state.insert(open);

        let mut line = event.to_line();
        line.push('\n');
        open.writer.write_all(line.as_bytes()).await?;

        let since_flush = (now - open.last_flush).to_std().unwrap_or_default();
        if since_flush > self.flush_interval {
            debug!("flushing output file");
            open.writer.flush().await?;
            open.last_flush = now;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        if let Some(mut open) = self.state.lock().await.take() {
            open.writer.flush().await?;
            open.writer.shutdown().await?;
        }
        Ok(())
    }
}

// ── SQL sink ────────────────────────────────────────────────────────

const CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS events (
    appliance_id TEXT NOT NULL,
    event        TEXT NOT NULL,
    timestamp    TEXT NOT NULL,
    data         TEXT NOT NULL,
    PRIMARY KEY (appliance_id, event, timestamp)
)";

const INSERT_EVENT: &str = "\
INSERT INTO events (appliance_id, event, timestamp, data) VALUES (?, ?, ?, ?)
ON CONFLICT DO NOTHING";

/// Writes each event's item map into an SQLite `events` table.
pub struct SqlExporter {
    pool: SqlitePool,
}

impl SqlExporter {
    /// Open (creating if needed) the database at `url`, e.g.
    /// `sqlite://events.db` or `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        info!(url, "database ready");
        Ok(Self { pool })
    }

    pub async fn count(&self) -> Result<i64, CoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Delete every stored row.
    pub async fn clear(&self) -> Result<u64, CoreError> {
        let done = sqlx::query("DELETE FROM events").execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    fn row(event: &Event) -> Result<(String, String, String, String), CoreError> {
        let items = event.items()?;
        let data = serde_json::to_string(&items).map_err(|e| CoreError::Export {
            message: e.to_string(),
        })?;
        Ok((
            event.appliance_id().unwrap_or_default().to_owned(),
            event.kind().to_string(),
            event.timestamp().to_rfc3339_opts(SecondsFormat::Micros, true),
            data,
        ))
    }
}

#[async_trait]
impl Exporter for SqlExporter {
    async fn export(&self, event: &Event) -> Result<(), CoreError> {
        let (appliance_id, kind, timestamp, data) = Self::row(event)?;
        sqlx::query(INSERT_EVENT)
            .bind(appliance_id)
            .bind(kind)
            .bind(timestamp)
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn bulk_export(&self, events: &[Event]) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            let (appliance_id, kind, timestamp, data) = Self::row(event)?;
            sqlx::query(INSERT_EVENT)
                .bind(appliance_id)
                .bind(kind)
                .bind(timestamp)
                .bind(data)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!(count = events.len(), "bulk export committed");
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        self.pool.close().await;
        Ok(())
    }
}

// ── Fan-out ─────────────────────────────────────────────────────────

/// Sends every event to each inner sink in turn.
#[derive(Default)]
pub struct MultiExporter {
    sinks: Vec<Arc<dyn Exporter>>,
}

impl MultiExporter {
    pub fn new(sinks: Vec<Arc<dyn Exporter>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn Exporter>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Exporter for MultiExporter {
    async fn export(&self, event: &Event) -> Result<(), CoreError> {
        for sink in &self.sinks {
            sink.export(event).await?;
        }
        Ok(())
    }

    async fn bulk_export(&self, events: &[Event]) -> Result<(), CoreError> {
        for sink in &self.sinks {
            sink.bulk_export(events).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        for sink in &self.sinks {
            sink.close().await?;
        }
        Ok(())
    }
}

// ── Reader ──────────────────────────────────────────────────────────

/// Events of one `*.jsonl` file.
#[derive(Debug)]
pub struct EventFile {
    pub path: PathBuf,
    pub events: Vec<Event>,
}

/// Read every `*.jsonl` file in `dir` (sorted by name), skipping blank lines.
pub fn read_events(dir: &Path) -> Result<Vec<EventFile>, CoreError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let events = read_event_file(&path)?;
            Ok(EventFile { path, events })
        })
        .collect()
}

/// Parse one file of canonical lines.
pub fn read_event_file(path: &Path) -> Result<Vec<Event>, CoreError> {
    let contents = std::fs::read_to_string(path)?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            Event::from_line(line).map_err(|e| CoreError::Export {
                message: format!("{}:{}: {e}", path.display(), n + 1),
            })
        })
        .collect()
}
