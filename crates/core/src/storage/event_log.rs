use crate::events::{Event, EventLog};
use crate::types::RunId;
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Buffered events per run are written out once they exceed this
const FLUSH_THRESHOLD: usize = 100;

/// Event log stored as gzip-compressed JSON Lines, one file per run per day
pub struct JsonlEventLog {
    base_path: PathBuf,
    buffers: Mutex<HashMap<RunId, Vec<Event>>>,
}

impl JsonlEventLog {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path).context("Failed to create event log directory")?;
        Ok(Self {
            base_path,
            buffers: Mutex::new(HashMap::new()),
        })
    }

    /// Format: events/YYYY/MM/DD/<run_id>.jsonl.gz
    fn event_log_path(&self, run_id: RunId, date: NaiveDate) -> PathBuf {
        self.base_path
            .join("events")
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
            .join(format!("{}.jsonl.gz", run_id))
    }

    async fn write_events(&self, run_id: RunId, events: Vec<Event>) -> Result<()> {
        let mut by_date: BTreeMap<NaiveDate, Vec<Event>> = BTreeMap::new();
        for event in events {
            by_date
                .entry(event.timestamp.date_naive())
                .or_default()
                .push(event);
        }

        for (date, events) in by_date {
            let path = self.event_log_path(run_id, date);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create event log directory")?;
            }

            let mut all_events = if path.exists() {
                read_jsonl_gz(&path)?
            } else {
                Vec::new()
            };
            all_events.extend(events);

            write_jsonl_gz(&path, &all_events).await?;
        }

        Ok(())
    }

    /// Log files of a run across day directories
    fn log_files(&self, run_id: RunId) -> Result<Vec<PathBuf>> {
        let filename = format!("{}.jsonl.gz", run_id);
        let mut dirs = vec![self.base_path.join("events")];

        // events/ -> year -> month -> day
        for _ in 0..3 {
            let mut next = Vec::new();
            for dir in dirs.iter().filter(|d| d.is_dir()) {
                for entry in std::fs::read_dir(dir)
                    .with_context(|| format!("Failed to read {}", dir.display()))?
                {
                    let path = entry.context("Failed to read directory entry")?.path();
                    if path.is_dir() {
                        next.push(path);
                    }
                }
            }
            dirs = next;
        }

        let mut files: Vec<PathBuf> = dirs
            .into_iter()
            .map(|day| day.join(&filename))
            .filter(|file| file.exists())
            .collect();
        files.sort();
        Ok(files)
    }
}

fn read_jsonl_gz(path: &Path) -> Result<Vec<Event>> {
    let file = std::fs::File::open(path).context("Failed to open event log")?;
    let reader = std::io::BufReader::new(GzDecoder::new(file));

    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line.context("Failed to read line from event log")?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(&line).context("Failed to parse event")?;
        events.push(event);
    }

    Ok(events)
}

async fn write_jsonl_gz(path: &Path, events: &[Event]) -> Result<()> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());

    for event in events {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        encoder
            .write_all(json.as_bytes())
            .context("Failed to write event")?;
        encoder.write_all(b"\n").context("Failed to write newline")?;
    }

    let compressed = encoder.finish().context("Failed to finish compression")?;
    tokio::fs::write(path, compressed)
        .await
        .context("Failed to write event log file")?;

    Ok(())
}

#[async_trait::async_trait]
impl EventLog for JsonlEventLog {
    async fn append(&self, event: Event) -> Result<()> {
        let run_id = event.run_id;
        let overflow = {
            let mut buffers = self.buffers.lock().await;
            let buffer = buffers.entry(run_id).or_default();
            buffer.push(event);
            buffer.len() > FLUSH_THRESHOLD
        };

        if overflow {
            self.flush(run_id).await?;
        }
        Ok(())
    }

    async fn flush(&self, run_id: RunId) -> Result<()> {
        let events = self.buffers.lock().await.remove(&run_id).unwrap_or_default();
        if events.is_empty() {
            return Ok(());
        }
        tracing::debug!("Flushing {} events for run {}", events.len(), run_id);
        self.write_events(run_id, events).await
    }

    async fn get_run_events(&self, run_id: RunId) -> Result<Vec<Event>> {
        self.flush(run_id).await?;

        let mut all_events = Vec::new();
        for file in self.log_files(run_id)? {
            all_events.extend(read_jsonl_gz(&file)?);
        }

        all_events.sort_by_key(|e| e.timestamp);
        Ok(all_events)
    }

    async fn get_run_events_range(
        &self,
        run_id: RunId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let all_events = self.get_run_events(run_id).await?;
        Ok(all_events
            .into_iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .collect())
    }
}
