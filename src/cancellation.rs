// Cooperative cancellation shared between a query and the collaborators it calls

use tokio::sync::watch;

/// Cloneable cancellation flag
///
/// All clones observe the same state. Once cancelled, a signal stays cancelled.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    sender: std::sync::Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancellationSignal {
    #[inline]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: std::sync::Arc::new(sender),
            receiver,
        }
    }

    /// Mark the signal as cancelled and wake every waiter
    #[inline]
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once the signal has been cancelled
    #[inline]
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any clone of the signal, so this only
        // errors if the signal itself was dropped mid-wait.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationSignal {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
