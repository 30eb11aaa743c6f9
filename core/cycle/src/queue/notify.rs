//! Wake-up channel between enqueuers and queue workers. Enqueues happen
//! inside store transactions; after commit the service pokes this notifier
//! so due jobs don't wait out the fallback poll interval.

use std::time::Duration;

use tokio::sync::broadcast::{channel, Receiver, Sender};

#[derive(Clone)]
pub struct EnqueueNotifier {
    sender: Sender<()>,
}

pub struct EnqueueListener {
    receiver: Receiver<()>,
}

impl EnqueueNotifier {
    pub fn new() -> EnqueueNotifier {
        // Receivers are created on demand by the workers.
        let (sender, _receiver) = channel(16);
        EnqueueNotifier { sender }
    }

    pub fn notify(&self) {
        // No receivers just means no idle workers; nothing to do.
        let _ = self.sender.send(());
    }

    pub fn listen(&self) -> EnqueueListener {
        EnqueueListener {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for EnqueueNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EnqueueListener {
    /// Waits for a wake-up or until the fallback interval elapses. A lagged
    /// receiver is fine: spurious wake-ups only cause one extra poll.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.receiver.recv()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn notify_wakes_listener_early() {
        let notifier = EnqueueNotifier::new();
        let mut listener = notifier.listen();
        notifier.notify();

        let start = Instant::now();
        listener.wait_with_timeout(Duration::from_secs(5)).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn wait_falls_back_to_timeout() {
        let notifier = EnqueueNotifier::new();
        let mut listener = notifier.listen();

        let start = Instant::now();
        listener.wait_with_timeout(Duration::from_millis(50)).await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
