use std::time::Duration;
use tokio::time::Instant;

/// Restartable one-shot timer.
///
/// Each [`arm`](Debouncer::arm) pushes the deadline out to `now + window`, so
/// a burst of calls fires once, `window` after the last one.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Restart the timer. Returns true if it was already pending.
    pub fn arm(&mut self) -> bool {
        self.deadline.replace(Instant::now() + self.window).is_some()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves when the pending deadline passes, and disarms.
    ///
    /// Never resolves while disarmed, which makes it safe as a `select!` arm.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}
