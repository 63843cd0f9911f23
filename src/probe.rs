//! Endpoint probing
//!
//! Vendors disagree on paths and body encodings, and some answer 2xx without
//! applying a mutation. A probe walks an ordered candidate list and accepts
//! the first candidate whose response is 2xx and whose verification (usually
//! a re-read of panel state) passes.

use std::future::Future;

use tracing::{debug, info, warn};

use crate::error::{AttemptOutcome, PanelError, ProbeAttempt, Result};
use crate::http::{PanelClient, PanelResponse, RequestSpec};

/// Tries `candidates` in order until one is accepted and verified.
///
/// `verify` runs only for 2xx responses with an ok envelope. Transport and
/// authentication errors abort the probe immediately; rejected or
/// unverified candidates are collected and returned together in
/// [`PanelError::ProbeExhausted`]. A lone candidate that was accepted but
/// not applied is reported as [`PanelError::Unverified`].
pub async fn probe<F, Fut>(
    client: &PanelClient,
    operation: &str,
    candidates: &[RequestSpec],
    verify: F,
) -> Result<PanelResponse>
where
    F: Fn(&PanelResponse) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let mut attempts = Vec::with_capacity(candidates.len());

    for (index, candidate) in candidates.iter().enumerate() {
        debug!(
            "{}: candidate {}/{} {} ({})",
            operation,
            index + 1,
            candidates.len(),
            candidate,
            candidate.encoding()
        );

        let response = client.execute(candidate).await?;

        if !response.is_success() || !response.envelope_ok() {
            warn!(
                "{}: {} rejected with status {}",
                operation, candidate, response.status
            );
            attempts.push(attempt(candidate, &response, AttemptOutcome::Rejected));
            continue;
        }

        if verify(&response).await? {
            info!("{}: accepted via {} ({})", operation, candidate, candidate.encoding());
            return Ok(response);
        }

        warn!(
            "{}: {} answered {} but verification failed",
            operation, candidate, response.status
        );
        attempts.push(attempt(candidate, &response, AttemptOutcome::Unverified));
    }

    Err(exhausted(operation, attempts))
}

fn exhausted(operation: &str, attempts: Vec<ProbeAttempt>) -> PanelError {
    if let [only] = attempts.as_slice()
        && only.outcome == AttemptOutcome::Unverified
    {
        return PanelError::Unverified {
            operation: operation.to_string(),
            detail: only.to_string(),
        };
    }
    PanelError::ProbeExhausted {
        operation: operation.to_string(),
        attempts,
    }
}

fn attempt(spec: &RequestSpec, response: &PanelResponse, outcome: AttemptOutcome) -> ProbeAttempt {
    ProbeAttempt::new(
        spec.method.as_str(),
        &spec.path,
        spec.encoding(),
        response.status,
        &response.body,
        outcome,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Encoding;

    #[test]
    fn test_attempt_records_candidate() {
        let spec = RequestSpec::post_form("/xui/API/inbounds/addClient", Vec::new());
        let response = PanelResponse {
            status: 404,
            body: "404 page not found".to_string(),
            set_cookies: Vec::new(),
        };
        let a = attempt(&spec, &response, AttemptOutcome::Rejected);
        assert_eq!(a.method, "POST");
        assert_eq!(a.path, "/xui/API/inbounds/addClient");
        assert_eq!(a.encoding, Encoding::Form);
        assert_eq!(a.status, 404);
        assert_eq!(a.body, "404 page not found");
    }

    #[test]
    fn test_single_unverified_candidate() {
        let spec = RequestSpec::put_json("/api/user/alice", serde_json::json!({}));
        let response = PanelResponse {
            status: 200,
            body: "{}".to_string(),
            set_cookies: Vec::new(),
        };
        let err = exhausted("renew user", vec![attempt(&spec, &response, AttemptOutcome::Unverified)]);
        assert_eq!(err.kind(), crate::error::ErrorKind::Unverified);
        assert!(err.to_string().contains("PUT /api/user/alice"));

        let rejected = PanelResponse {
            status: 422,
            ..response
        };
        let err = exhausted("renew user", vec![attempt(&spec, &rejected, AttemptOutcome::Rejected)]);
        assert_eq!(err.attempts().len(), 1);
    }
}
