//! Single-resolution acknowledgement waits.
//!
//! A surface that loads content asynchronously acknowledges it later. The
//! wait and the acknowledgement race a timeout; whichever takes the pending
//! sender first resolves the wait, and the loser finds nothing to resolve.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged,
    TimedOut,
    /// The pending wait was cleared, e.g. by a watchdog reset.
    Abandoned,
}

#[derive(Debug)]
pub struct PendingAck {
    ticket: u64,
    receiver: oneshot::Receiver<()>,
}

#[derive(Debug, Default)]
pub struct AckSlot {
    pending: Mutex<Option<(u64, oneshot::Sender<()>)>>,
    issued: Mutex<u64>,
}

impl AckSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new wait, abandoning any previous one.
    pub fn arm(&self) -> PendingAck {
        let ticket = {
            let mut issued = self.issued.lock();
            *issued += 1;
            *issued
        };
        let (sender, receiver) = oneshot::channel();
        if self.pending.lock().replace((ticket, sender)).is_some() {
            debug!(ticket, "replaced an unresolved acknowledgement wait");
        }
        PendingAck { ticket, receiver }
    }

    /// Resolves the pending wait. False when there is none, such as after
    /// it already timed out.
    pub fn acknowledge(&self) -> bool {
        match self.pending.lock().take() {
            Some((ticket, sender)) => {
                debug!(ticket, "content acknowledged");
                sender.send(()).is_ok()
            }
            None => {
                debug!("late or unexpected acknowledgement ignored");
                false
            }
        }
    }

    /// Drops the pending wait, if any.
    pub fn clear(&self) {
        self.pending.lock().take();
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    pub async fn wait(&self, pending: PendingAck, timeout: Duration) -> AckOutcome {
        let PendingAck { ticket, mut receiver } = pending;
        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(())) => AckOutcome::Acknowledged,
            Ok(Err(_)) => AckOutcome::Abandoned,
            Err(_) => self.expire(ticket, &mut receiver, timeout),
        }
    }

    /// Settles a wait whose timer fired. The slot may have changed hands
    /// before the lock was taken, so only this ticket's own sender decides.
    fn expire(
        &self,
        ticket: u64,
        receiver: &mut oneshot::Receiver<()>,
        timeout: Duration,
    ) -> AckOutcome {
        let mut slot = self.pending.lock();
        if slot.as_ref().is_some_and(|(pending, _)| *pending == ticket) {
            slot.take();
            warn!(ticket, timeout_ms = timeout.as_millis() as u64, "acknowledgement timed out");
            return AckOutcome::TimedOut;
        }
        // `acknowledge` sends while holding the lock, so the receiver is final here.
        match receiver.try_recv() {
            Ok(()) => AckOutcome::Acknowledged,
            Err(_) => AckOutcome::Abandoned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test(start_paused = true)]
    async fn acknowledgement_resolves_the_wait() {
        let slot = Arc::new(AckSlot::new());
        let pending = slot.arm();
        let acker = slot.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(acker.acknowledge());
        });
        assert_eq!(slot.wait(pending, TIMEOUT).await, AckOutcome::Acknowledged);
        assert!(!slot.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn late_acknowledgement_finds_nothing() {
        let slot = AckSlot::new();
        let pending = slot.arm();
        assert_eq!(slot.wait(pending, TIMEOUT).await, AckOutcome::TimedOut);
        assert!(!slot.acknowledge());
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_wait_is_abandoned() {
        let slot = AckSlot::new();
        let pending = slot.arm();
        slot.clear();
        assert_eq!(slot.wait(pending, TIMEOUT).await, AckOutcome::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_abandons_the_older_wait() {
        let slot = AckSlot::new();
        let first = slot.arm();
        let second = slot.arm();
        assert_eq!(slot.wait(first, TIMEOUT).await, AckOutcome::Abandoned);
        assert!(slot.acknowledge());
        assert_eq!(slot.wait(second, TIMEOUT).await, AckOutcome::Acknowledged);
    }

    #[test]
    fn expired_wait_reports_what_happened_to_its_ticket() {
        let slot = AckSlot::new();

        let PendingAck { ticket, mut receiver } = slot.arm();
        assert!(slot.acknowledge());
        assert_eq!(slot.expire(ticket, &mut receiver, TIMEOUT), AckOutcome::Acknowledged);

        let PendingAck { ticket, mut receiver } = slot.arm();
        slot.clear();
        assert_eq!(slot.expire(ticket, &mut receiver, TIMEOUT), AckOutcome::Abandoned);

        let PendingAck { ticket, mut receiver } = slot.arm();
        let newer = slot.arm();
        assert_eq!(slot.expire(ticket, &mut receiver, TIMEOUT), AckOutcome::Abandoned);
        assert!(slot.is_pending());

        let PendingAck { ticket, mut receiver } = newer;
        assert_eq!(slot.expire(ticket, &mut receiver, TIMEOUT), AckOutcome::TimedOut);
        assert!(!slot.is_pending());
    }
}
