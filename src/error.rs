//! Panel error taxonomy
//!
//! Every panel operation returns a [`PanelError`] on failure. Errors are
//! structured so collaborators can decide what to tell the user; nothing in
//! this crate renders user-facing text.

use std::fmt;

use thiserror::Error;

use crate::config::VendorFamily;
use crate::http::Encoding;
use crate::model::ClientRecord;

/// Longest response body kept in diagnostics
pub const MAX_DIAGNOSTIC_BODY: usize = 512;

// ============================================================================
// Probe Diagnostics
// ============================================================================

/// Why a single probe candidate did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The panel answered with a non-2xx status or a `success: false` envelope
    Rejected,
    /// The panel answered 2xx but the re-read did not show the mutation
    Unverified,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Rejected => write!(f, "rejected"),
            AttemptOutcome::Unverified => write!(f, "unverified"),
        }
    }
}

/// Diagnostics for one attempted candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub method: String,
    pub path: String,
    pub encoding: Encoding,
    pub status: u16,
    pub body: String,
    pub outcome: AttemptOutcome,
}

impl ProbeAttempt {
    pub fn new(
        method: &str,
        path: &str,
        encoding: Encoding,
        status: u16,
        body: &str,
        outcome: AttemptOutcome,
    ) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            encoding,
            status,
            body: truncate_body(body),
            outcome,
        }
    }
}

impl fmt::Display for ProbeAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}) -> {} {}",
            self.method, self.path, self.encoding, self.status, self.outcome
        )?;
        if !self.body.is_empty() {
            write!(f, ": {}", self.body)?;
        }
        Ok(())
    }
}

/// Cuts a response body down to [`MAX_DIAGNOSTIC_BODY`] characters
pub fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_DIAGNOSTIC_BODY {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(MAX_DIAGNOSTIC_BODY).collect();
    cut.push_str("...");
    cut
}

fn summarize(attempts: &[ProbeAttempt]) -> String {
    if attempts.is_empty() {
        return "no candidates".to_string();
    }
    attempts
        .iter()
        .enumerate()
        .map(|(i, a)| format!("[{}] {}", i + 1, a))
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Panel Error
// ============================================================================

/// Fieldless error classification for collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthFailure,
    NotFound,
    Unverified,
    Unsupported,
    Transport,
    ProbeExhausted,
    Rejected,
    Malformed,
    Config,
    Committed,
}

#[derive(Error, Debug)]
pub enum PanelError {
    /// Login was refused, or a request was still unauthorized after one re-login
    #[error("authentication failed for panel '{panel}': {reason}")]
    AuthFailure { panel: String, reason: String },

    /// An inbound or owner label does not exist on the panel
    #[error("not found: {0}")]
    NotFound(String),

    /// The panel accepted a mutation but re-reading shows it was not applied
    #[error("{operation} was accepted but not applied: {detail}")]
    Unverified { operation: String, detail: String },

    /// The vendor family has no such capability
    #[error("{capability} is not supported by {family} panels")]
    Unsupported {
        capability: &'static str,
        family: VendorFamily,
    },

    /// Timeout or connection failure
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Every candidate of a probed operation failed
    #[error(
        "{operation} failed on all {count} candidate(s): {summary}",
        count = .attempts.len(),
        summary = summarize(.attempts)
    )]
    ProbeExhausted {
        operation: String,
        attempts: Vec<ProbeAttempt>,
    },

    /// A single-endpoint call was answered with a non-2xx status, or a panel
    /// kept refusing every candidate value (409)
    #[error("{endpoint} responded with status {status}: {body}")]
    Rejected {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// A 2xx response whose body could not be understood
    #[error("unexpected response from {endpoint}: {reason}")]
    Malformed { endpoint: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// A mutation was applied and verified but a follow-up step failed.
    /// `record` is what the panel now holds; its owner label may differ
    /// from the one the caller passed in.
    #[error("{operation} applied to '{label}' but a follow-up step failed: {source}", label = .record.owner_label)]
    Committed {
        operation: String,
        record: Box<ClientRecord>,
        #[source]
        source: Box<PanelError>,
    },
}

impl PanelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PanelError::AuthFailure { .. } => ErrorKind::AuthFailure,
            PanelError::NotFound(_) => ErrorKind::NotFound,
            PanelError::Unverified { .. } => ErrorKind::Unverified,
            PanelError::Unsupported { .. } => ErrorKind::Unsupported,
            PanelError::Transport { .. } => ErrorKind::Transport,
            PanelError::ProbeExhausted { .. } => ErrorKind::ProbeExhausted,
            PanelError::Rejected { .. } => ErrorKind::Rejected,
            PanelError::Malformed { .. } => ErrorKind::Malformed,
            PanelError::Config(_) => ErrorKind::Config,
            PanelError::Committed { .. } => ErrorKind::Committed,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, PanelError::AuthFailure { .. })
    }

    /// Attempted candidates, for probed operations
    pub fn attempts(&self) -> &[ProbeAttempt] {
        match self {
            PanelError::ProbeExhausted { attempts, .. } => attempts,
            _ => &[],
        }
    }

    /// The client left on the panel by a partially completed operation
    pub fn committed_record(&self) -> Option<&ClientRecord> {
        match self {
            PanelError::Committed { record, .. } => Some(record.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn committed(operation: &str, record: ClientRecord, source: PanelError) -> Self {
        PanelError::Committed {
            operation: operation.to_string(),
            record: Box::new(record),
            source: Box::new(source),
        }
    }

    pub(crate) fn unsupported(capability: &'static str, family: VendorFamily) -> Self {
        PanelError::Unsupported { capability, family }
    }

    pub(crate) fn malformed(endpoint: &str, reason: impl Into<String>) -> Self {
        PanelError::Malformed {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = PanelError> = std::result::Result<T, E>;
