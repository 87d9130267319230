//! Self-driving delayed command queue.
//!
//! Used to pace `JOIN` commands after the handshake so the server's join
//! rate limiter does not reject a burst. One `advance()` call runs the item
//! under the cursor immediately and hands the rest of the sequence to a
//! driver task that sleeps between items.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Delay used when the queue is built with a zero default.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);

/// A deferred zero-argument action.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

struct QueueItem {
    /// Taken when the item runs; the slot itself is never removed.
    action: Option<Action>,
    delay: Option<Duration>,
}

#[derive(Default)]
struct Inner {
    items: Vec<QueueItem>,
    cursor: usize,
    /// A driver task owns the cursor while this is set.
    driving: bool,
    driver: Option<JoinHandle<()>>,
}

/// Ordered list of actions executed one at a time with a delay in between.
#[derive(Clone)]
pub struct DelayedQueue {
    inner: Arc<Mutex<Inner>>,
    default_delay: Duration,
}

impl DelayedQueue {
    pub fn new(default_delay: Duration) -> Self {
        let default_delay = if default_delay.is_zero() {
            DEFAULT_DELAY
        } else {
            default_delay
        };
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            default_delay,
        }
    }

    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    /// Append an action paced by the default delay.
    pub fn add<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(action), None);
    }

    /// Append an action that waits `delay` after its predecessor instead of
    /// the default. A zero delay falls back to the default.
    pub fn add_with_delay<F>(&self, action: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(Box::new(action), Some(delay).filter(|d| !d.is_zero()));
    }

    fn push(&self, action: Action, delay: Option<Duration>) {
        self.inner.lock().items.push(QueueItem {
            action: Some(action),
            delay,
        });
    }

    /// Run the item under the cursor now and schedule the remainder.
    ///
    /// No-op once the cursor has reached the end, and while a driver task is
    /// already pacing the queue.
    pub fn advance(&self) {
        let action = {
            let mut inner = self.inner.lock();
            if inner.driving {
                return;
            }
            take_next(&mut inner)
        };
        let Some(action) = action else {
            return;
        };
        action();
        self.schedule();
    }

    fn schedule(&self) {
        let mut inner = self.inner.lock();
        if inner.driving || inner.cursor >= inner.items.len() {
            return;
        }
        inner.driving = true;
        let queue = self.clone();
        inner.driver = Some(tokio::spawn(async move { queue.drive().await }));
    }

    async fn drive(self) {
        loop {
            let delay = {
                let mut inner = self.inner.lock();
                match inner.items.get(inner.cursor) {
                    Some(item) => item.delay.unwrap_or(self.default_delay),
                    None => {
                        inner.driving = false;
                        return;
                    }
                }
            };
            tokio::time::sleep(delay).await;
            let action = take_next(&mut self.inner.lock());
            if let Some(action) = action {
                action();
            }
        }
    }

    /// Stop the driver task. Items already passed stay passed; the next
    /// `advance()` resumes from the cursor.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if let Some(driver) = inner.driver.take() {
            driver.abort();
        }
        inner.driving = false;
    }

    /// Total number of items ever added.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the next item to run.
    pub fn position(&self) -> usize {
        self.inner.lock().cursor
    }

    /// Whether every added item has run.
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock();
        inner.cursor >= inner.items.len()
    }
}

impl std::fmt::Debug for DelayedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("DelayedQueue")
            .field("len", &inner.items.len())
            .field("cursor", &inner.cursor)
            .field("driving", &inner.driving)
            .field("default_delay", &self.default_delay)
            .finish()
    }
}

fn take_next(inner: &mut Inner) -> Option<Action> {
    let item = inner.items.get_mut(inner.cursor)?;
    let action = item.action.take();
    inner.cursor += 1;
    action
}
