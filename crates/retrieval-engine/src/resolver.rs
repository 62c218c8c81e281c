use std::future::Future;

use async_trait::async_trait;
use portal_core_types::{AttemptFailure, CandidateOperation, PortalError};
use serde::Serialize;
use tracing::{debug, info};

use crate::capture::Observation;

/// Executes one candidate against whatever backs the session.
#[async_trait]
pub trait OperationTransport: Send + Sync {
    async fn execute(&self, candidate: &CandidateOperation) -> Result<Observation, PortalError>;
}

/// Winning candidate plus everything tried before it.
#[derive(Clone, Debug, Serialize)]
pub struct Resolved<T> {
    pub value: T,
    pub which_succeeded: String,
    pub attempts: usize,
    pub failures: Vec<AttemptFailure>,
}

impl<T> Resolved<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
        Resolved {
            value: f(self.value),
            which_succeeded: self.which_succeeded,
            attempts: self.attempts,
            failures: self.failures,
        }
    }
}

/// Errors that say something about the session, not about one candidate.
fn is_structural(err: &PortalError) -> bool {
    matches!(
        err,
        PortalError::Authentication { .. }
            | PortalError::UnknownTarget(_)
            | PortalError::Configuration(_)
    )
}

/// Tries candidates in ascending priority (ties keep declared order) until one
/// succeeds.
#[derive(Clone, Copy, Debug, Default)]
pub struct MethodResolver;

impl MethodResolver {
    pub async fn resolve(
        candidates: Vec<CandidateOperation>,
        transport: &dyn OperationTransport,
    ) -> Result<Resolved<Observation>, PortalError> {
        Self::resolve_with(candidates, |candidate| async move {
            transport.execute(&candidate).await
        })
        .await
    }

    /// Same ordering and bookkeeping as [`MethodResolver::resolve`] with a
    /// caller-supplied attempt.
    pub async fn resolve_with<T, F, Fut>(
        mut candidates: Vec<CandidateOperation>,
        mut attempt: F,
    ) -> Result<Resolved<T>, PortalError>
    where
        F: FnMut(CandidateOperation) -> Fut,
        Fut: Future<Output = Result<T, PortalError>>,
    {
        candidates.sort_by_key(|candidate| candidate.priority);

        let mut failures: Vec<AttemptFailure> = Vec::new();
        for candidate in &candidates {
            match attempt(candidate.clone()).await {
                Ok(value) => {
                    let attempts = failures.len() + 1;
                    info!(
                        target: "retrieval",
                        candidate = %candidate.name,
                        attempts,
                        "candidate succeeded"
                    );
                    return Ok(Resolved {
                        value,
                        which_succeeded: candidate.name.clone(),
                        attempts,
                        failures,
                    });
                }
                Err(err) if is_structural(&err) => return Err(err),
                Err(err) => {
                    debug!(target: "retrieval", candidate = %candidate.name, %err, "candidate failed");
                    failures.push(AttemptFailure {
                        candidate: candidate.name.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        let last_error = failures
            .last()
            .map(|failure| failure.error.clone())
            .unwrap_or_else(|| "no candidate operations available".to_string());
        Err(PortalError::OperationExhausted {
            attempts: failures.len(),
            last_error,
            failures,
        })
    }
}
