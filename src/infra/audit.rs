use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::audit::{AuditEvent, AuditSink};

/// Appends one JSON object per event to `audit.log`.
pub struct JsonlAuditSink {
    path: PathBuf,
}

#[derive(Serialize)]
struct Line<'e> {
    at: DateTime<Utc>,
    #[serde(flatten)]
    event: &'e AuditEvent,
}

impl JsonlAuditSink {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("audit.log"),
        }
    }

    fn append(&self, event: &AuditEvent) -> anyhow::Result<()> {
        let line = serde_json::to_string(&Line { at: Utc::now(), event })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: &AuditEvent) {
        info!(
            action = %event.action,
            actor = event.actor_id,
            target = event.target_id,
            summary = %event.summary,
            "audit"
        );
        // The mutation has already committed; a lost log line must not fail it.
        if let Err(e) = self.append(event) {
            warn!(path = %self.path.display(), error = %e, "failed to write audit log");
        }
    }
}
