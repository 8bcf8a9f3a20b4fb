//! JSONL batch processing with resume.
//!
//! Each input line is `{"messages": [...], "options": {...}}` and produces
//! exactly one output line, so the number of lines already in the output file
//! is the number of input lines to skip when a run is restarted. Only
//! newline-terminated records count; a partial record left by an interrupted
//! write is cut off before appending.

use std::path::Path;

use manyllm_core::{
    ChatOptions, Error, Message, Orchestrator, OutcomeStatus, OutcomeSummary, Result,
};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// One input line.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    /// Conversation to send.
    pub messages: Vec<Message>,

    /// Per-line overrides of the batch defaults.
    #[serde(default)]
    pub options: Option<ChatOptions>,
}

/// One output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRecord {
    /// 1-based input line number.
    pub line_number: usize,

    /// Outcome of the line.
    #[serde(flatten)]
    pub summary: OutcomeSummary,
}

/// Counts for one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Lines in the input file.
    pub total: usize,
    /// Lines skipped because the output already had them.
    pub resumed_from: usize,
    /// Lines processed successfully in this run.
    pub succeeded: usize,
    /// Lines that failed in this run.
    pub failed: usize,
}

/// Number of complete records already written to `output`.
///
/// A trailing line without its newline is not counted.
pub async fn completed_lines(output: &Path) -> Result<usize> {
    Ok(count_records(&read_output(output).await?))
}

async fn read_output(output: &Path) -> Result<Vec<u8>> {
    match tokio::fs::read(output).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(Error::io_with_path(e, output)),
    }
}

/// Length of the newline-terminated prefix of `bytes`.
fn complete_len(bytes: &[u8]) -> usize {
    bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1)
}

fn count_records(bytes: &[u8]) -> usize {
    bytes[..complete_len(bytes)]
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .count()
}

/// Cut a partial trailing record so the next append starts on a fresh line.
async fn discard_partial_record(output: &Path, existing: &[u8]) -> Result<()> {
    let keep = complete_len(existing);
    if keep == existing.len() {
        return Ok(());
    }
    warn!(
        path = %output.display(),
        bytes = existing.len() - keep,
        "discarding partial record at end of output"
    );
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(output)
        .await
        .map_err(|e| Error::io_with_path(e, output))?;
    file.set_len(keep as u64)
        .await
        .map_err(|e| Error::io_with_path(e, output))
}

/// Run every pending line of `input` through `orchestrator`, appending one
/// record per line to `output`.
///
/// Each record is flushed as soon as it is written.
pub async fn run_batch(
    orchestrator: &Orchestrator,
    input: &Path,
    output: &Path,
    defaults: &ChatOptions,
) -> Result<BatchReport> {
    let text = tokio::fs::read_to_string(input)
        .await
        .map_err(|e| Error::io_with_path(e, input))?;
    let lines: Vec<&str> = text.lines().collect();

    let existing = read_output(output).await?;
    discard_partial_record(output, &existing).await?;

    let mut report = BatchReport {
        total: lines.len(),
        resumed_from: count_records(&existing),
        ..BatchReport::default()
    };

    if report.resumed_from >= report.total {
        info!(total = report.total, "all lines already processed");
        return Ok(report);
    }
    if report.resumed_from > 0 {
        info!(done = report.resumed_from, total = report.total, "resuming batch");
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io_with_path(e, parent))?;
    }
    let mut out = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(output)
        .await
        .map_err(|e| Error::io_with_path(e, output))?;

    for (index, line) in lines.iter().enumerate().skip(report.resumed_from) {
        let line_number = index + 1;
        let summary = process_line(orchestrator, line, defaults).await;
        match summary.status {
            OutcomeStatus::Success => report.succeeded += 1,
            OutcomeStatus::Error => {
                let reason = summary.message.as_deref().unwrap_or("");
                warn!(line = line_number, reason, "line failed");
                report.failed += 1;
            }
        }

        let record = BatchRecord { line_number, summary };
        let mut json = serde_json::to_string(&record)?;
        json.push('\n');
        out.write_all(json.as_bytes())
            .await
            .map_err(|e| Error::io_with_path(e, output))?;
        out.flush().await.map_err(|e| Error::io_with_path(e, output))?;

        info!(line = line_number, total = report.total, "line done");
    }

    Ok(report)
}

async fn process_line(
    orchestrator: &Orchestrator,
    line: &str,
    defaults: &ChatOptions,
) -> OutcomeSummary {
    let request: BatchRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return OutcomeSummary::error(format!("invalid input line: {e}")),
    };
    if request.messages.is_empty() {
        return OutcomeSummary::error("input line has no messages");
    }
    let options = request.options.unwrap_or_default().or(defaults);
    orchestrator.chat(&request.messages, &options).await.summary()
}
