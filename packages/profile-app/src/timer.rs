//! Periodic subscriptions.
//!
//! Subscriptions are regenerated after every transition. A ticker that
//! started a fresh period on each regeneration would never fire while other
//! messages arrive faster than its period, so [`Ticker`] keeps its schedule
//! outside the subscription and each regenerated subscription resumes at the
//! first boundary not yet delivered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::warn;
use uniflow::{Model, StreamSubscription, Subscription, Teardown, WeakDriver};

/// A fixed schedule of boundaries `epoch + n * period`, shared by clones.
#[derive(Debug, Clone)]
pub struct Ticker {
    period: Duration,
    epoch: Instant,
    delivered: Arc<AtomicU64>,
}

impl Ticker {
    /// Schedule whose first boundary is one `period` from now.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            epoch: Instant::now(),
            delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Index of the last boundary delivered, 0 before the first.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    fn boundary(&self, index: u64) -> Instant {
        let nanos = self.period.as_nanos().saturating_mul(u128::from(index));
        let offset = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
        self.epoch
            .checked_add(offset)
            .unwrap_or_else(|| Instant::now() + self.period)
    }

    fn reached(&self) -> u64 {
        let elapsed = Instant::now().saturating_duration_since(self.epoch);
        let index = elapsed.as_nanos() / self.period.as_nanos();
        u64::try_from(index).unwrap_or(u64::MAX)
    }

    /// Deliver `message()` to `driver` at every remaining boundary.
    ///
    /// A zero period, or no tokio runtime, yields an inert subscription.
    pub fn subscribe<M, F>(&self, driver: &WeakDriver<M>, message: F) -> Box<dyn Subscription>
    where
        M: Model,
        F: Fn() -> M::Message + Send + 'static,
    {
        if self.period.is_zero() {
            warn!("ticker period is zero, ticker disabled");
            return Box::new(Teardown::noop());
        }
        if Handle::try_current().is_err() {
            warn!("no tokio runtime, ticker disabled");
            return Box::new(Teardown::noop());
        }

        // A boundary already in the past fires immediately
        let next = self.boundary(self.delivered() + 1);
        let mut interval = interval_at(next, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let ticker = self.clone();
        let ticks = IntervalStream::new(interval).map(move |_| {
            ticker
                .delivered
                .fetch_max(ticker.reached().max(1), Ordering::AcqRel);
            message()
        });
        Box::new(StreamSubscription::spawn(driver, ticks))
    }
}

/// Deliver `message()` to `driver` every `period`, starting one period from now.
///
/// The schedule belongs to the returned subscription alone. Generators that
/// run after every transition should hold a [`Ticker`] and call
/// [`Ticker::subscribe`] instead, or ticks starve under frequent messages.
pub fn every<M, F>(period: Duration, driver: &WeakDriver<M>, message: F) -> Box<dyn Subscription>
where
    M: Model,
    F: Fn() -> M::Message + Send + 'static,
{
    Ticker::new(period).subscribe(driver, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uniflow::{Command, Driver};

    #[derive(Debug, Clone, PartialEq)]
    enum Msg {
        Tick,
        Noise,
    }

    #[derive(Debug, Default)]
    struct Counter {
        ticks: u64,
        noise: u64,
    }

    impl Model for Counter {
        type Message = Msg;

        fn send(&mut self, message: Msg) -> Vec<Command<Msg>> {
            match message {
                Msg::Tick => self.ticks += 1,
                Msg::Noise => self.noise += 1,
            }
            Vec::new()
        }
    }

    #[test]
    fn test_zero_period_is_inert() {
        let driver = Driver::builder(Counter::default())
            .with_subscriptions(|driver, _counter: &Counter| {
                every(Duration::ZERO, driver, || Msg::Tick)
            })
            .build();

        driver.send(Msg::Noise);

        assert_eq!(driver.with_state(|c| (c.ticks, c.noise)), (0, 1));
        assert!(driver.has_subscription());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_ticks_on_idle_driver() {
        let driver = Driver::builder(Counter::default())
            .with_subscriptions(|driver, _counter: &Counter| {
                every(Duration::from_millis(100), driver, || Msg::Tick)
            })
            .build();

        driver
            .wait_until(|c| c.ticks >= 3, Duration::from_secs(10))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_frequent_regeneration_does_not_starve_ticker() {
        let ticker = Ticker::new(Duration::from_millis(100));
        let schedule = ticker.clone();
        let driver = Driver::builder(Counter::default())
            .with_subscriptions(move |driver, _counter: &Counter| {
                schedule.subscribe(driver, || Msg::Tick)
            })
            .build();

        // Regenerate three times per period
        let handle = driver.handle();
        let noise = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(30)).await;
                if !handle.send(Msg::Noise) {
                    break;
                }
            }
        });

        driver
            .wait_until(|c| c.ticks >= 3, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(ticker.delivered() >= 3);
        assert!(driver.with_state(|c| c.noise) >= 6);

        drop(driver);
        tokio::time::timeout(Duration::from_secs(1), noise)
            .await
            .unwrap()
            .unwrap();
    }
}
