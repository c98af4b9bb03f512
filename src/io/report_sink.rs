//! Report sinks - where ranked window reports go
//!
//! Sinks are shared by every consumer worker, so `emit` takes `&self` and
//! implementations synchronize internally.

use crate::domain::types::WindowReport;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Receives one report per closed window
pub trait ReportSink: Send + Sync {
    fn emit(&self, report: &WindowReport);
}

/// Renders reports as structured log lines
#[derive(Debug, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn emit(&self, report: &WindowReport) {
        info!(
            window = %report.key,
            closed_at = %report.closed_at,
            events = %report.events,
            top_n = %report.top.len(),
            is_final = %report.is_final,
            "top_congested_lights"
        );
        for (rank, entry) in report.top.iter().enumerate() {
            info!(
                window = %report.key,
                rank = rank + 1,
                light_id = %entry.light_id,
                cars = %entry.count,
                "congested_light"
            );
        }
    }
}

/// Appends reports to a file, one JSON object per line
pub struct JsonlSink {
    file_path: PathBuf,
    /// Serializes appends from concurrent consumers
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        info!(file_path = %file_path.display(), "report_file_initialized");
        Self { file_path, write_lock: Mutex::new(()) }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Write a report; returns true if successful
    pub fn write_report(&self, report: &WindowReport) -> bool {
        let json = match serde_json::to_string(report) {
            Ok(json) => json,
            Err(e) => {
                error!(window = %report.key, error = %e, "report_serialize_failed");
                return false;
            }
        };

        let _guard = self.write_lock.lock();
        match self.append_line(&json) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    window = %report.key,
                    file = %self.file_path.display(),
                    error = %e,
                    "report_write_failed"
                );
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        // Create parent directories if they don't exist
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path.display(), bytes = %line.len(), "report_written");
        Ok(())
    }
}

impl ReportSink for JsonlSink {
    fn emit(&self, report: &WindowReport) {
        self.write_report(report);
    }
}

/// Keeps every report in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<WindowReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the reports received so far, in emission order
    pub fn reports(&self) -> Vec<WindowReport> {
        self.reports.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl ReportSink for MemorySink {
    fn emit(&self, report: &WindowReport) {
        self.reports.lock().push(report.clone());
    }
}

/// Forwards every report to each inner sink in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ReportSink for FanoutSink {
    fn emit(&self, report: &WindowReport) {
        for sink in &self.sinks {
            sink.emit(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{parse_timestamp, LightId, RankedLight, WindowKey};
    use std::fs;
    use tempfile::tempdir;

    fn report(hour: u32) -> WindowReport {
        WindowReport {
            key: WindowKey::Hour(hour),
            closed_at: parse_timestamp("09:55:00").unwrap(),
            events: 3,
            is_final: false,
            top: vec![RankedLight::new(LightId(2), 40), RankedLight::new(LightId(1), 12)],
        }
    }

    #[test]
    fn test_write_report() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("reports.jsonl");
        let sink = JsonlSink::new(&file_path);

        assert!(sink.write_report(&report(9)));

        let content = fs::read_to_string(&file_path).unwrap();
        assert!(content.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["key"]["hour"], 9);
        assert_eq!(parsed["closed_at"], "09:55:00");
        assert_eq!(parsed["top"][0]["light_id"], 2);
        assert_eq!(parsed["top"][0]["count"], 40);
    }

    #[test]
    fn test_append_mode() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("reports.jsonl");
        fs::write(&file_path, "{\"existing\":\"data\"}\n").unwrap();

        let sink = JsonlSink::new(&file_path);
        sink.emit(&report(9));
        sink.emit(&report(10));

        let content = fs::read_to_string(&file_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("existing"));
        for line in &lines[1..] {
            let _parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        }
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("dir").join("reports.jsonl");
        let sink = JsonlSink::new(&nested);

        assert!(sink.write_report(&report(9)));
        assert!(nested.exists());
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        let fanout = FanoutSink::new().with(a.clone()).with(b.clone()).with(Arc::new(LogSink));
        assert_eq!(fanout.len(), 3);

        fanout.emit(&report(9));
        fanout.emit(&report(10));

        assert_eq!(a.len(), 2);
        assert_eq!(b.reports()[1].key, WindowKey::Hour(10));
    }
}
