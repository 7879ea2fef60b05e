//! Notification audit egress - JSONL append of dispatched records
//!
//! One JSON object per line, appended to the file named in config.

use crate::domain::region::ProximityNotification;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// Append-only audit writer
pub struct AuditLog {
    file_path: String,
}

impl AuditLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "audit_log_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Write one notification record
    /// Returns true if successful, false otherwise
    pub fn write(&self, record: &ProximityNotification) -> bool {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "audit_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                debug!(
                    notification_id = %record.id,
                    user_id = %record.user_id,
                    region_id = %record.region_id,
                    "audit_written"
                );
                true
            }
            Err(e) => {
                error!(
                    notification_id = %record.id,
                    error = %e,
                    "audit_write_failed"
                );
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
