//! Upload and report progress reporting.
//!
//! Reports observable progress during folder bulk uploads and report
//! polling so users see which file is moving and how far a job has come.
//! Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A bulk upload is starting file `index` of `total`.
    UploadStarted {
        filename: String,
        index: usize,
        total: usize,
    },
    /// A bulk-upload file finished (or failed).
    UploadFinished { filename: String, ok: bool },
    /// One report poll completed while the job was still running.
    ReportPolling {
        job_id: String,
        attempt: u32,
        progress_percent: u8,
    },
}

/// Reports progress events. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::UploadStarted {
                filename,
                index,
                total,
            } => {
                format!("upload {}/{}  {}\n", index, total, filename)
            }
            ProgressEvent::UploadFinished { filename, ok } => {
                let mark = if *ok { "ok" } else { "failed" };
                format!("upload {}  {}\n", filename, mark)
            }
            ProgressEvent::ReportPolling {
                job_id,
                attempt,
                progress_percent,
            } => {
                format!(
                    "report {}  poll {}  {}%\n",
                    job_id, attempt, progress_percent
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::UploadStarted {
                filename,
                index,
                total,
            } => serde_json::json!({
                "event": "upload_started",
                "filename": filename,
                "index": index,
                "total": total
            }),
            ProgressEvent::UploadFinished { filename, ok } => serde_json::json!({
                "event": "upload_finished",
                "filename": filename,
                "ok": ok
            }),
            ProgressEvent::ReportPolling {
                job_id,
                attempt,
                progress_percent,
            } => serde_json::json!({
                "event": "report_polling",
                "job_id": job_id,
                "attempt": attempt,
                "progress_percent": progress_percent
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
