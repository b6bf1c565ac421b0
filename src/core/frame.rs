//! Classifies one line of the event stream.
//!
//! [`interpret`] is total: keep-alive comments, blank separators, malformed
//! JSON and frames without text all come back as [`Frame::Ignore`], so one bad
//! frame never ends the stream.

use tracing::debug;

use crate::api::ChatResponse;
use crate::core::constants::{DATA_PREFIX, DONE_SENTINEL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ignore,
    Terminate,
    TextDelta(String),
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX).map(str::trim_start)
}

pub fn interpret(line: &str) -> Frame {
    let line = line.trim();
    if line.is_empty() {
        return Frame::Ignore;
    }

    let Some(payload) = extract_data_payload(line) else {
        return Frame::Ignore;
    };

    if payload == DONE_SENTINEL {
        return Frame::Terminate;
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map_or(Frame::Ignore, Frame::TextDelta),
        Err(err) => {
            debug!(error = %err, payload_len = payload.len(), "Skipping malformed stream frame");
            Frame::Ignore
        }
    }
}
