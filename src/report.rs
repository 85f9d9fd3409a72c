//! Async report pipeline.
//!
//! Two stages. Stage A composes a prompt from the conversation transcript,
//! the in-scope documents, and an optional user directive, and asks the
//! model for a report configuration in raw-response mode; the reply is
//! parsed as JSON, falling back to the first balanced `{...}` substring.
//! Stage B submits `{config, filename}` for asynchronous rendering and
//! polls the job every five seconds, surfacing synthetic progress until
//! the server reports a terminal status or the attempt budget runs out.
//!
//! Once a job has begun, every outcome (success, render failure, parse
//! failure, timeout) is reported through the [`ReportJob`] record rather
//! than thrown.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::ReportConfig;
use crate::models::{ChatMessage, Document, JobStatus, ReportJob};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::transport::Transport;

/// Seam for the configuration-synthesis model call, so the pipeline can
/// be driven without a live AI endpoint.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Submit a transcript and return the assistant's raw text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Completion backed by the backend's agent endpoint.
pub struct AgentCompletion {
    transport: Transport,
    token: String,
}

impl AgentCompletion {
    pub fn new(transport: Transport, token: impl Into<String>) -> Self {
        Self {
            transport,
            token: token.into(),
        }
    }
}

#[async_trait]
impl CompletionClient for AgentCompletion {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let text = self.transport.run_agent(messages, &self.token).await?;
        Ok(text)
    }
}

/// Cooperative cancel handle for a running report job. Cancelling aborts
/// polling; it does not retract the server-side job.
#[derive(Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Everything a report is built from.
pub struct ReportRequest<'a> {
    pub transcript: &'a [ChatMessage],
    pub documents: &'a [Document],
    pub directive: Option<&'a str>,
    pub filename: Option<&'a str>,
}

pub struct ReportCoordinator {
    transport: Transport,
    config: ReportConfig,
}

impl ReportCoordinator {
    pub fn new(transport: Transport, config: ReportConfig) -> Self {
        Self { transport, config }
    }

    /// Run the full pipeline. Validation problems fail the job record
    /// immediately; nothing is raised asynchronously.
    pub async fn generate(
        &self,
        completion: &dyn CompletionClient,
        request: ReportRequest<'_>,
        cancel: &CancelHandle,
        progress: &dyn ProgressReporter,
    ) -> ReportJob {
        let filename = normalize_filename(request.filename);

        if request.transcript.is_empty()
            && request.documents.is_empty()
            && request.directive.map(str::trim).unwrap_or("").is_empty()
        {
            return failed_job(
                filename,
                "nothing to build a report from: transcript, documents, and directive are all empty",
            );
        }

        // Stage A: configuration synthesis.
        let messages = compose_prompt(request.transcript, request.documents, request.directive);
        let reply = match completion.complete(&messages).await {
            Ok(reply) => reply,
            Err(e) => return failed_job(filename, format!("configuration synthesis failed: {e}")),
        };

        let config = match extract_json_object(&reply) {
            Some(config) => config,
            None => {
                return failed_job(
                    filename,
                    "AI response did not contain a parseable JSON configuration",
                )
            }
        };

        // Stage B: submit and poll.
        let submitted = match self.transport.generate_excel_async(&config, &filename).await {
            Ok(resp) if resp.success => resp,
            Ok(_) => return failed_job(filename, "report generation was not accepted"),
            Err(e) => return failed_job(filename, format!("report submission failed: {e}")),
        };

        let mut job = ReportJob {
            job_id: submitted.job_id,
            filename: filename.clone(),
            status: JobStatus::Queued,
            progress_percent: 0,
            warnings: Vec::new(),
            error_message: None,
            download_url: None,
        };

        for attempt in 1..=self.config.max_poll_attempts {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)) => {}
                _ = cancel.cancelled() => {
                    job.warnings
                        .push("polling cancelled before the job finished".to_string());
                    return job;
                }
            }

            let status = match self.transport.get_job_status(&job.job_id).await {
                Ok(status) => status,
                // A flaky poll is not a failed job; the next tick retries.
                Err(_) => continue,
            };

            match status.status {
                JobStatus::Queued | JobStatus::Processing => {
                    job.status = status.status;
                    job.progress_percent =
                        synthetic_progress(attempt, self.config.max_poll_attempts);
                    progress.report(ProgressEvent::ReportPolling {
                        job_id: job.job_id.clone(),
                        attempt,
                        progress_percent: job.progress_percent,
                    });
                }
                JobStatus::Completed => {
                    job.status = JobStatus::Completed;
                    job.progress_percent = 100;
                    job.warnings = status.warnings;
                    job.download_url = Some(self.transport.build_download_url(&job.filename));
                    return job;
                }
                JobStatus::Failed => {
                    job.status = JobStatus::Failed;
                    job.error_message = Some(
                        status
                            .failure_message()
                            .unwrap_or_else(|| "report generation failed".to_string()),
                    );
                    job.warnings = status.warnings;
                    return job;
                }
            }
        }

        job.status = JobStatus::Failed;
        job.error_message = Some("report generation timed out".to_string());
        job
    }
}

fn failed_job(filename: String, message: impl Into<String>) -> ReportJob {
    ReportJob {
        job_id: String::new(),
        filename,
        status: JobStatus::Failed,
        progress_percent: 0,
        warnings: Vec::new(),
        error_message: Some(message.into()),
        download_url: None,
    }
}

/// Default and sanitize the artifact filename the way the server does.
fn normalize_filename(filename: Option<&str>) -> String {
    match filename {
        Some(name) if !name.trim().is_empty() => {
            let name = name.trim();
            if name.ends_with(".xlsx") {
                name.to_string()
            } else {
                format!("{name}.xlsx")
            }
        }
        _ => format!(
            "report_{}.xlsx",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ),
    }
}

/// Linear approximation of progress while the server only says
/// "processing", capped at 90 until a terminal status arrives.
fn synthetic_progress(attempt: u32, max_attempts: u32) -> u8 {
    let approx = (attempt as f64 / max_attempts as f64) * 400.0;
    approx.round().min(90.0) as u8
}

/// Compose the Stage A transcript: the conversation turns, a digest of
/// each in-scope document, and the closing instruction.
fn compose_prompt(
    transcript: &[ChatMessage],
    documents: &[Document],
    directive: Option<&str>,
) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = transcript.to_vec();

    let mut instruction = String::from(
        "Produce an Excel report configuration for the conversation above.\n",
    );

    if !documents.is_empty() {
        instruction.push_str("\nAvailable documents:\n");
        for doc in documents {
            instruction.push_str(&format!("--- {} ({}) ---\n", doc.name, doc.mime));
            if let Some(content) = &doc.content {
                instruction.push_str(content);
                instruction.push('\n');
            } else if let Some(processed) = &doc.processed_data {
                instruction.push_str(&processed.to_string());
                instruction.push('\n');
            }
        }
    }

    if let Some(directive) = directive {
        let directive = directive.trim();
        if !directive.is_empty() {
            instruction.push_str("\nUser directive: ");
            instruction.push_str(directive);
            instruction.push('\n');
        }
    }

    instruction.push_str(
        "\nRespond with a single JSON object describing the report sheets. \
         Do not include any other text.",
    );

    messages.push(ChatMessage::user(instruction));
    messages
}

/// Parse the model's reply as JSON. Accepts the full reply if it parses
/// to an object; otherwise extracts the first balanced `{...}` substring
/// and parses that. Anything stricter belongs to a future schema.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    let mut depth = 0usize;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if depth > 0 && in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start?..i + c.len_utf8()];
                        // Only the first balanced object is considered.
                        return serde_json::from_str::<Value>(candidate)
                            .ok()
                            .filter(Value::is_object);
                    }
                }
            }
            _ => {}
        }
    }

    None
}
