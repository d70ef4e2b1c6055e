//! Long-lived external event registrations and their teardown discipline.
//!
//! A [`Subscription`] is created already active and stays active until
//! [`teardown`](Subscription::teardown) is called. The driver tears down the
//! current subscription and asks its generator for a new one after every
//! transition, so no two generations are ever active at once.
//!
//! # Idempotence
//!
//! Teardown may be reached more than once (explicit teardown followed by drop,
//! or a batch torn down twice). Every implementation in this module releases
//! its resources exactly once; custom implementations must do the same.
//!
//! # Example
//!
//! ```ignore
//! let generator = |driver: &WeakDriver<Profile>, profile: &Profile| {
//!     profile
//!         .saves
//!         .iter()
//!         .map(|id| registry.observe(id, driver.clone()))
//!         .collect::<BatchSubscription>()
//! };
//! ```

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use futures::{Stream, StreamExt};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, trace, warn};

use crate::driver::WeakDriver;
use crate::error::{MemberFailure, TeardownError};
use crate::model::Model;

/// An active external event registration.
pub trait Subscription: Send + 'static {
    /// Release everything this subscription holds.
    ///
    /// Must be idempotent: calls after the first succeed without side effects.
    fn teardown(&mut self) -> Result<(), TeardownError>;
}

impl<S: Subscription + ?Sized> Subscription for Box<S> {
    fn teardown(&mut self) -> Result<(), TeardownError> {
        (**self).teardown()
    }
}

type Release = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Closure-backed subscription.
///
/// The release closure runs at most once, on the first teardown or on drop.
pub struct Teardown {
    release: Option<Release>,
}

impl Teardown {
    /// Subscription released by an infallible closure.
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::fallible(move || {
            release();
            Ok(())
        })
    }

    /// Subscription released by a closure that may fail.
    pub fn fallible<F>(release: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Subscription holding nothing.
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Whether the release closure has yet to run.
    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }
}

impl Subscription for Teardown {
    fn teardown(&mut self) -> Result<(), TeardownError> {
        match self.release.take() {
            Some(release) => release().map_err(TeardownError::Failed),
            None => Ok(()),
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if self.is_active() {
            if let Err(e) = self.teardown() {
                warn!(error = %e, "subscription teardown failed on drop");
            }
        }
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("active", &self.is_active())
            .finish()
    }
}

/// An ordered set of subscriptions torn down together.
///
/// Teardown visits members in the order they were supplied. A member that
/// returns an error or panics does not stop the members after it; failures are
/// reported together as [`TeardownError::Batch`].
#[derive(Default)]
pub struct BatchSubscription {
    members: Vec<Box<dyn Subscription>>,
    torn_down: bool,
}

impl BatchSubscription {
    /// Batch over `members`, in iteration order.
    pub fn new<I>(members: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn Subscription>>,
    {
        Self {
            members: members.into_iter().collect(),
            torn_down: false,
        }
    }

    /// Batch with no members.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a member.
    pub fn push<S: Subscription>(&mut self, member: S) {
        self.members.push(Box::new(member));
    }

    /// Append a member, builder style.
    pub fn with<S: Subscription>(mut self, member: S) -> Self {
        self.push(member);
        self
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the batch has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether teardown has yet to run.
    pub fn is_active(&self) -> bool {
        !self.torn_down
    }
}

impl FromIterator<Box<dyn Subscription>> for BatchSubscription {
    fn from_iter<I: IntoIterator<Item = Box<dyn Subscription>>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl Subscription for BatchSubscription {
    fn teardown(&mut self) -> Result<(), TeardownError> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        let total = self.members.len();
        let mut failures = Vec::new();

        for (index, member) in self.members.iter_mut().enumerate() {
            let error = match catch_unwind(AssertUnwindSafe(|| member.teardown())) {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(payload) => TeardownError::from_panic(payload),
            };
            warn!(index, total, error = %error, "batch member teardown failed");
            failures.push(MemberFailure { index, error });
        }

        trace!(total, failed = failures.len(), "batch torn down");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError::Batch { total, failures })
        }
    }
}

impl Drop for BatchSubscription {
    fn drop(&mut self) {
        if !self.torn_down {
            if let Err(e) = self.teardown() {
                warn!(error = %e, "batch teardown failed on drop");
            }
        }
    }
}

impl fmt::Debug for BatchSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchSubscription")
            .field("members", &self.members.len())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Subscription that forwards every item of a stream into a driver.
///
/// Runs as a task on the ambient tokio runtime. The task ends on its own once
/// the driver is gone; teardown aborts it.
pub struct StreamSubscription {
    task: Option<JoinHandle<()>>,
}

impl StreamSubscription {
    /// Spawn a forwarding task for `stream`.
    ///
    /// Without a runtime the subscription is created inactive and an error is
    /// logged.
    pub fn spawn<M, S>(driver: &WeakDriver<M>, stream: S) -> Self
    where
        M: Model,
        S: Stream<Item = M::Message> + Send + 'static,
    {
        let driver = driver.clone();
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "no tokio runtime available, stream subscription inactive");
                return Self { task: None };
            }
        };

        let task = handle.spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(message) = stream.next().await {
                if !driver.send(message) {
                    trace!("driver gone, stopping stream subscription");
                    break;
                }
            }
        });

        Self { task: Some(task) }
    }

    /// Whether the forwarding task is still running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Subscription for StreamSubscription {
    fn teardown(&mut self) -> Result<(), TeardownError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for StreamSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSubscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::command::Command;
    use crate::driver::Driver;

    fn counted(count: &Arc<AtomicUsize>) -> Teardown {
        let count = count.clone();
        Teardown::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn ordered(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Box<dyn Subscription> {
        let log = log.clone();
        Box::new(Teardown::new(move || log.lock().unwrap().push(name)))
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut sub = counted(&count);

        assert!(sub.is_active());
        sub.teardown().unwrap();
        sub.teardown().unwrap();
        drop(sub);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_teardown_runs_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        drop(counted(&count));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fallible_teardown_reports_error_once() {
        let mut sub = Teardown::fallible(|| Err(anyhow::anyhow!("observer missing")));

        let err = sub.teardown().unwrap_err();
        assert!(matches!(err, TeardownError::Failed(_)));
        assert!(sub.teardown().is_ok());
    }

    #[test]
    fn test_noop_is_inactive() {
        let mut sub = Teardown::noop();
        assert!(!sub.is_active());
        assert!(sub.teardown().is_ok());
    }

    #[test]
    fn test_batch_tears_down_each_member_once_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut batch = BatchSubscription::new(vec![
            ordered(&log, "s1"),
            ordered(&log, "s2"),
            ordered(&log, "s3"),
        ]);

        batch.teardown().unwrap();
        batch.teardown().unwrap();
        drop(batch);

        assert_eq!(*log.lock().unwrap(), vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn test_batch_isolates_failing_and_panicking_members() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut batch = BatchSubscription::empty()
            .with(Teardown::fallible(|| Err(anyhow::anyhow!("first fails"))))
            .with(Teardown::new(|| panic!("second panics")));
        batch.push(ordered(&log, "third"));

        let err = batch.teardown().unwrap_err();

        assert_eq!(err.failed_members(), vec![0, 1]);
        assert_eq!(*log.lock().unwrap(), vec!["third"]);
        assert!(!batch.is_active());
    }

    #[test]
    fn test_batch_from_iterator() {
        let count = Arc::new(AtomicUsize::new(0));
        let batch: BatchSubscription = (0..4)
            .map(|_| Box::new(counted(&count)) as Box<dyn Subscription>)
            .collect();

        assert_eq!(batch.len(), 4);
        drop(batch);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_empty_batch() {
        let mut batch = BatchSubscription::empty();
        assert!(batch.is_empty());
        assert!(batch.teardown().is_ok());
    }

    #[derive(Debug, Default)]
    struct Sink {
        seen: Vec<u32>,
    }

    impl Model for Sink {
        type Message = u32;

        fn send(&mut self, message: u32) -> Vec<Command<u32>> {
            self.seen.push(message);
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_stream_subscription_forwards_items() {
        let driver = Driver::new(Sink::default());
        let _sub = StreamSubscription::spawn(&driver.handle(), futures::stream::iter(vec![1, 2, 3]));

        driver
            .wait_until(|sink| sink.seen.len() == 3, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(driver.with_state(|sink| sink.seen.clone()), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stream_subscription_teardown_stops_forwarding() {
        let driver = Driver::new(Sink::default());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<u32>();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let mut sub = StreamSubscription::spawn(&driver.handle(), stream);

        tx.send(1).unwrap();
        driver
            .wait_until(|sink| sink.seen == vec![1], Duration::from_secs(1))
            .await
            .unwrap();

        sub.teardown().unwrap();
        sub.teardown().unwrap();
        tokio::task::yield_now().await;
        let _ = tx.send(2);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!sub.is_active());
        assert_eq!(driver.with_state(|sink| sink.seen.clone()), vec![1]);
    }
}
