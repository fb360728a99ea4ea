//! Feeds notifications recorded as JSON lines through the endpoint.
//!
//! Each line is one bus message, e.g.
//! `{"ctxt": {}, "publisher_id": "network.host1", "event_type": "port.delete.end",
//! "payload": {...}, "metadata": {}}`. One verdict line is written per input line.

use relay::{DispatchOutcome, Notification, NotificationEndpoint};
use std::fmt;
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

#[derive(thiserror::Error, Debug)]
pub enum ReplayError {
    #[error("replay I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default, PartialEq)]
pub struct ReplaySummary {
    pub handled: usize,
    pub requeued: usize,
    /// Rejected by the notification filter
    pub skipped: usize,
    /// Not a valid notification
    pub invalid: usize,
}

impl ReplaySummary {
    pub fn total(&self) -> usize {
        self.handled + self.requeued + self.skipped + self.invalid
    }
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} handled={} requeued={} skipped={} invalid={}",
            self.total(),
            self.handled,
            self.requeued,
            self.skipped,
            self.invalid
        )
    }
}

/// Replays `input`, or stdin when no file is given.
pub async fn replay_file<W: Write>(
    endpoint: &NotificationEndpoint,
    input: Option<&Path>,
    out: &mut W,
) -> Result<ReplaySummary, ReplayError> {
    match input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            replay(endpoint, BufReader::new(file), out).await
        }
        None => replay(endpoint, BufReader::new(tokio::io::stdin()), out).await,
    }
}

pub async fn replay<R, W>(
    endpoint: &NotificationEndpoint,
    input: R,
    out: &mut W,
) -> Result<ReplaySummary, ReplayError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut summary = ReplaySummary::default();
    let mut lines = input.lines();
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let notification: Notification = match serde_json::from_str(&line) {
            Ok(notification) => notification,
            Err(e) => {
                tracing::warn!("line {line_number}: not a notification: {e}");
                writeln!(out, "{line_number}: INVALID {e}")?;
                summary.invalid += 1;
                continue;
            }
        };

        if !endpoint.filter_rule().matches(&notification) {
            writeln!(out, "{line_number}: SKIPPED {}", notification.event_type)?;
            summary.skipped += 1;
            continue;
        }

        let outcome = endpoint.dispatch(&notification).await;
        match outcome {
            DispatchOutcome::Handled => summary.handled += 1,
            DispatchOutcome::Requeue => summary.requeued += 1,
        }
        writeln!(out, "{line_number}: {outcome} {}", notification.event_type)?;
    }

    Ok(summary)
}
