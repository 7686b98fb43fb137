// Admission gate: system-wide bound on in-flight event submissions
//
// Producers acquire one permit per event before it enters the queue; the
// batcher returns permits once events have left the pipeline. Slow
// persistence therefore backpressures fast producers instead of letting
// the queue grow without bound.

use std::sync::Arc;

use tokio::sync::Semaphore;

use botfleet_core::FleetError;

/// Counting-semaphore limiter shared by all producers
#[derive(Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl AdmissionGate {
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Take one permit, waiting while the system-wide limit is reached.
    ///
    /// The permit is detached from the caller; it comes back through
    /// `release` once the event has been consumed.
    pub async fn acquire(&self) -> Result<(), FleetError> {
        match self.semaphore.acquire().await {
            Ok(permit) => {
                permit.forget();
                Ok(())
            }
            Err(_) => Err(FleetError::ShuttingDown),
        }
    }

    /// Return `n` permits after their events left the pipeline
    pub fn release(&self, n: usize) {
        self.semaphore.add_permits(n);
    }

    /// Refuse further admissions; blocked acquirers are woken with
    /// `ShuttingDown`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Permits currently held by in-flight events
    pub fn in_flight(&self) -> usize {
        self.limit.saturating_sub(self.semaphore.available_permits())
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_blocks_at_the_limit() {
        let gate = AdmissionGate::new(2);
        gate.acquire().await.unwrap();
        gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 2);

        let blocked = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        gate.release(1);
        blocked.await.unwrap().unwrap();
        assert_eq!(gate.in_flight(), 2);
    }

    #[tokio::test]
    async fn close_wakes_blocked_acquirers() {
        let gate = AdmissionGate::new(1);
        gate.acquire().await.unwrap();

        let blocked = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.close();

        assert!(matches!(
            blocked.await.unwrap(),
            Err(FleetError::ShuttingDown)
        ));
        assert!(matches!(gate.acquire().await, Err(FleetError::ShuttingDown)));
    }
}
