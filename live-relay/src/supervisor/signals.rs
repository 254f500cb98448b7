//! In-process stop signals for running jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Maps running job ids to the token their worker listens on.
///
/// The persisted stop intent stays the durable channel; this registry only
/// shortens the latency when the stop request lands in the same process.
#[derive(Debug, Clone, Default)]
pub struct StopSignals {
    tokens: Arc<DashMap<String, (u64, CancellationToken)>>,
    generation: Arc<AtomicU64>,
}

impl StopSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job and return the token its worker should watch.
    pub fn register(&self, job_id: &str) -> StopRegistration {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.tokens
            .insert(job_id.to_string(), (generation, token.clone()));
        StopRegistration {
            signals: self.clone(),
            job_id: job_id.to_string(),
            generation,
            token,
        }
    }

    /// Cancel the token of a running job. Returns whether one was registered.
    pub fn signal(&self, job_id: &str) -> bool {
        match self.tokens.get(job_id) {
            Some(entry) => {
                entry.1.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, job_id: &str) -> bool {
        self.tokens.contains_key(job_id)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Unregisters its job when dropped.
#[derive(Debug)]
pub struct StopRegistration {
    signals: StopSignals,
    job_id: String,
    generation: u64,
    token: CancellationToken,
}

impl StopRegistration {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for StopRegistration {
    fn drop(&mut self) {
        // A later registration for the same id owns the slot now.
        self.signals
            .tokens
            .remove_if(&self.job_id, |_, (generation, _)| *generation == self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_cancels_registered_token() {
        let signals = StopSignals::new();
        let registration = signals.register("job-1");

        assert!(signals.signal("job-1"));
        assert!(registration.token().is_cancelled());
        assert!(!signals.signal("job-2"));
    }

    #[test]
    fn test_drop_unregisters() {
        let signals = StopSignals::new();
        {
            let _registration = signals.register("job-1");
            assert!(signals.is_registered("job-1"));
        }
        assert!(signals.is_empty());
    }

    #[test]
    fn test_stale_registration_leaves_newer_one() {
        let signals = StopSignals::new();
        let stale = signals.register("job-1");
        let fresh = signals.register("job-1");

        drop(stale);
        assert!(signals.is_registered("job-1"));
        assert!(signals.signal("job-1"));
        assert!(fresh.token().is_cancelled());
    }
}
