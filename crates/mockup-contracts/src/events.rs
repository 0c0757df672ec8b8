use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// What happened to one image API call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageRequestEvent {
    ImageRequestRetry {
        endpoint: String,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    ImageRequestFailed {
        endpoint: String,
        attempts: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        timed_out: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        error: String,
    },
    ImageRequestSucceeded {
        endpoint: String,
        model: String,
        size: String,
        bytes: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

#[derive(Serialize)]
struct Line<'a> {
    session_id: &'a str,
    ts: String,
    #[serde(flatten)]
    event: &'a ImageRequestEvent,
}

/// JSONL log of image request events for one session. The file is opened
/// once in append mode; clones share the handle.
#[derive(Debug, Clone)]
pub struct EventLog {
    session_id: Arc<str>,
    file: Arc<Mutex<File>>,
}

impl EventLog {
    pub fn open(path: &Path, session_id: &str) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open event log {}", path.display()))?;
        Ok(Self {
            session_id: Arc::from(session_id),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn record(&self, event: &ImageRequestEvent) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(&Line {
            session_id: &self.session_id,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        })?;
        line.push(b'\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        file.write_all(&line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;

    use chrono::DateTime;
    use serde_json::Value;

    use super::*;

    fn read_lines(path: &Path) -> anyhow::Result<Vec<Value>> {
        fs::read_to_string(path)?
            .lines()
            .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
            .collect()
    }

    #[test]
    fn record_writes_tagged_line_with_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let log = EventLog::open(&path, "session-7")?;

        log.record(&ImageRequestEvent::ImageRequestSucceeded {
            endpoint: "images/generations".to_string(),
            model: "gpt-image-1.5".to_string(),
            size: "1024x1024".to_string(),
            bytes: 42,
            request_id: None,
        })?;

        let lines = read_lines(&path)?;
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line["type"], "image_request_succeeded");
        assert_eq!(line["session_id"], "session-7");
        assert_eq!(line["endpoint"], "images/generations");
        assert_eq!(line["bytes"], 42);
        assert!(line.get("request_id").is_none());
        DateTime::parse_from_rfc3339(line["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn reopening_appends() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let failed = ImageRequestEvent::ImageRequestFailed {
            endpoint: "images/edits".to_string(),
            attempts: 3,
            status: Some(503),
            timed_out: false,
            request_id: Some("req_1".to_string()),
            error: "status=503 message=busy".to_string(),
        };
        EventLog::open(&path, "first")?.record(&failed)?;
        EventLog::open(&path, "second")?.record(&failed)?;

        let lines = read_lines(&path)?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["session_id"], "first");
        assert_eq!(lines[1]["session_id"], "second");
        assert_eq!(lines[1]["status"], 503);
        assert_eq!(lines[1]["request_id"], "req_1");
        Ok(())
    }

    #[test]
    fn concurrent_writers_never_interleave_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::open(&path, "session-7")?;

        let handles = (0..4u32)
            .map(|worker| {
                let log = log.clone();
                thread::spawn(move || -> anyhow::Result<()> {
                    for attempt in 0..10 {
                        log.record(&ImageRequestEvent::ImageRequestRetry {
                            endpoint: format!("worker-{worker}"),
                            attempt,
                            delay_ms: 600,
                            reason: "HTTP 429".to_string(),
                        })?;
                    }
                    Ok(())
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("writer thread panicked"))??;
        }

        let lines = read_lines(&path)?;
        assert_eq!(lines.len(), 40);
        assert!(lines.iter().all(|line| line["type"] == "image_request_retry"));
        Ok(())
    }
}
