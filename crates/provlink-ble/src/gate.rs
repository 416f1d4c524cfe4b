//! Transport gate serializing request/response exchanges
//!
//! The radio layer allows only one write/read pair to be outstanding per
//! connection. The gate is a single-permit semaphore enforcing that rule:
//! a caller issuing a second exchange blocks until the first completes.
//! Acquire/release counters are kept so tests can assert the balance
//! property directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use provlink_core::{Result, TransportError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

// ----------------------------------------------------------------------------
// Transport Gate
// ----------------------------------------------------------------------------

/// Single-permit gate serializing exchanges on one connection
#[derive(Debug)]
pub struct TransportGate {
    semaphore: Arc<Semaphore>,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl TransportGate {
    /// Create a gate with its single permit available
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(1)),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        })
    }

    /// Acquire the permit, waiting until the current holder releases it
    pub async fn acquire(self: &Arc<Self>) -> Result<GatePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransportError::Shutdown)?;
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(GatePermit {
            gate: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Total times the permit has been handed out
    pub fn acquired_count(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Total times the permit has been returned
    pub fn released_count(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Whether no exchange currently holds the permit
    pub fn is_idle(&self) -> bool {
        self.semaphore.available_permits() == 1
    }
}

/// Permit held for the duration of one exchange; released on drop
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<TransportGate>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn permit_serializes_and_counts_balance() {
        let gate = TransportGate::new();

        let permit = gate.acquire().await.unwrap();
        assert_eq!(gate.acquired_count(), 1);
        assert_eq!(gate.released_count(), 0);
        assert!(!gate.is_idle());

        // Second acquire must block while the first permit is held
        assert!(timeout(Duration::from_millis(20), gate.acquire())
            .await
            .is_err());

        drop(permit);
        assert_eq!(gate.released_count(), 1);
        assert!(gate.is_idle());

        let second = gate.acquire().await.unwrap();
        drop(second);
        assert_eq!(gate.acquired_count(), 2);
        assert_eq!(gate.released_count(), 2);
    }
}
