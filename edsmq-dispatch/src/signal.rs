use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Resettable wake-up flag used to cut throttle waits short.
///
/// `wait` parks until the timeout elapses or [`Interrupt::raise`] is called.
/// Raising is idempotent and sticky: waits started while the flag is up
/// return at once until [`Interrupt::reset`].
///
/// ```
/// use edsmq_dispatch::Interrupt;
/// use std::time::Duration;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let interrupt = Interrupt::new();
/// assert!(!interrupt.wait(Duration::from_millis(5)).await);
/// interrupt.raise();
/// assert!(interrupt.wait(Duration::from_secs(60)).await);
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Returns `true` when woken by [`Interrupt::raise`], `false` on timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|raised| *raised))
            .await
            .map(|res| res.is_ok())
            .unwrap_or(false)
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }
}
