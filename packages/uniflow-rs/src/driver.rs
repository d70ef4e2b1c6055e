//! The driver: single owner of a model, its subscription, and its mailbox.
//!
//! ```text
//! send(msg) ──► mailbox (FIFO) ──► Model::send ──► teardown old subscription
//!    ▲                                  │          generator(driver, &model)
//!    │                                  ▼
//!    └──── Callback / Subscription ◄── Command::interpret (list order)
//! ```
//!
//! # Serialization
//!
//! Every message goes through one FIFO mailbox. Whoever finds the mailbox idle
//! becomes its drainer and applies queued messages one at a time until it is
//! empty; everyone else only enqueues. This gives:
//!
//! - **One transition at a time**, whichever thread the message came from.
//! - **No re-entrant transitions**: a command that delivers during
//!   interpretation, or a subscription that fires while being generated, has
//!   its message queued behind the current transition.
//! - **Synchronous sends when idle**: `driver.send(msg)` on an idle driver has
//!   applied the transition by the time it returns.
//!
//! # Lifecycle
//!
//! Command callbacks and subscriptions hold a [`WeakDriver`], never the driver
//! itself. Dropping the [`Driver`] disposes it: the active subscription is torn
//! down synchronously, queued messages are discarded, and every later delivery
//! through a `WeakDriver` is a silent no-op.
//!
//! # Subscription churn
//!
//! Subscriptions are regenerated in full after every transition, which costs
//! O(active subscriptions) per message. Collaborators whose registration has
//! side effects will see a teardown and re-registration for every message,
//! including ones that leave the subscribed set unchanged.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, debug_span, error, trace, warn};

use crate::command::{Callback, Command};
use crate::error::{panic_message, DriverError, TeardownError};
use crate::inflight::{Inflight, InflightGuard};
use crate::model::Model;
use crate::subscription::Subscription;

type Generator<M> = Box<dyn Fn(&WeakDriver<M>, &M) -> Box<dyn Subscription> + Send + Sync>;

/// Lock a mutex, recovering the guard if a contained panic poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Mailbox<Msg> {
    queue: VecDeque<(Msg, InflightGuard)>,
    draining: bool,
}

struct Shared<M: Model> {
    name: Arc<str>,
    model: Mutex<M>,
    mailbox: Mutex<Mailbox<M::Message>>,
    subscription: Mutex<Option<Box<dyn Subscription>>>,
    generator: Option<Generator<M>>,
    runtime: Option<Handle>,
    inflight: Arc<Inflight>,
    generation: watch::Sender<u64>,
    disposed: AtomicBool,
    this: Weak<Shared<M>>,
}

impl<M: Model> Shared<M> {
    fn weak(&self) -> WeakDriver<M> {
        WeakDriver {
            shared: self.this.clone(),
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Queue a message and drain if nobody else is. Returns false once disposed.
    fn enqueue(&self, message: M::Message) -> bool {
        if self.is_disposed() {
            trace!(driver = %self.name, ?message, "driver disposed, dropping message");
            return false;
        }

        let slot = self.inflight.track();
        {
            let mut mailbox = lock(&self.mailbox);
            mailbox.queue.push_back((message, slot));
            if mailbox.draining {
                trace!(
                    driver = %self.name,
                    queued = mailbox.queue.len(),
                    "transition in progress, message queued"
                );
                return true;
            }
            mailbox.draining = true;
        }

        self.drain();
        true
    }

    /// Apply queued messages until the mailbox is empty.
    ///
    /// Caller must have set `draining`; it is cleared under the mailbox lock
    /// when the queue is observed empty, so no message is ever stranded.
    fn drain(&self) {
        loop {
            let (message, _slot) = {
                let mut mailbox = lock(&self.mailbox);
                match mailbox.queue.pop_front() {
                    Some(next) => next,
                    None => {
                        mailbox.draining = false;
                        return;
                    }
                }
            };

            if self.is_disposed() {
                continue;
            }

            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.transition(message))) {
                error!(
                    driver = %self.name,
                    panic = %panic_message(payload.as_ref()),
                    "transition panicked, state may be inconsistent"
                );
            }
        }
    }

    fn transition(&self, message: M::Message) {
        let span = debug_span!(
            "transition",
            driver = %self.name,
            generation = *self.generation.borrow() + 1
        );
        let _span = span.enter();
        let _runtime = self.runtime.as_ref().map(Handle::enter);

        trace!(?message, "applying message");
        let commands = {
            let mut model = lock(&self.model);
            let commands = model.send(message);
            self.resubscribe(&model);
            commands
        };
        self.generation.send_modify(|generation| *generation += 1);

        debug!(commands = commands.len(), "transition applied");
        for command in commands {
            self.start(command);
        }
    }

    /// Tear down the active subscription, then ask the generator for the next.
    fn resubscribe(&self, model: &M) {
        let Some(generator) = self.generator.as_ref() else {
            return;
        };

        let mut slot = lock(&self.subscription);
        if let Some(mut previous) = slot.take() {
            if let Err(e) = previous.teardown() {
                warn!(driver = %self.name, error = %e, "subscription teardown failed");
            }
        }

        if self.is_disposed() {
            return;
        }
        *slot = Some(generator(&self.weak(), model));
        trace!("subscriptions regenerated");
    }

    /// Interpret one command, wiring its callback back into the mailbox.
    fn start(&self, command: Command<M::Message>) {
        let label = command.label();
        let slot = self.inflight.track();
        let driver = self.weak();

        command.interpret(Callback::on_complete(move |message| {
            match message {
                Some(message) => {
                    if !driver.send(message) {
                        debug!(command = label, "driver gone, discarding command result");
                    }
                }
                None => debug!(command = label, "command finished without a message"),
            }
            drop(slot);
        }));
    }

    /// Generate the first subscription against the initial state.
    fn subscribe_initial(&self) {
        if self.generator.is_none() {
            return;
        }

        // Hold the mailbox so a subscription that fires while being
        // generated queues instead of re-entering the model lock.
        lock(&self.mailbox).draining = true;
        let generated = catch_unwind(AssertUnwindSafe(|| {
            let _runtime = self.runtime.as_ref().map(Handle::enter);
            let model = lock(&self.model);
            self.resubscribe(&model);
        }));
        if let Err(payload) = generated {
            error!(
                driver = %self.name,
                panic = %panic_message(payload.as_ref()),
                "initial subscription panicked, starting without one"
            );
        }
        self.drain();
    }

    fn dispose(&self) {
        let mut slot = lock(&self.subscription);
        self.disposed.store(true, Ordering::Release);

        if let Some(mut subscription) = slot.take() {
            let result = catch_unwind(AssertUnwindSafe(|| subscription.teardown()))
                .unwrap_or_else(|payload| Err(TeardownError::from_panic(payload)));
            if let Err(e) = result {
                warn!(driver = %self.name, error = %e, "subscription teardown failed on dispose");
            }
        }
        drop(slot);

        let discarded = lock(&self.mailbox).queue.drain(..).count();
        debug!(driver = %self.name, discarded, "driver disposed");
    }
}

/// Owner of a model. See the [module docs](self) for ordering guarantees.
///
/// # Example
///
/// ```ignore
/// let driver = Driver::builder(Profile::new("Matt", deps))
///     .with_subscriptions(|driver, profile: &Profile| profile.subscriptions(driver))
///     .build();
///
/// driver.send(Message::MakeAndrew);
/// assert_eq!(driver.with_state(|p| p.state.title.clone()), "loading name");
///
/// driver.settle().await;
/// assert_eq!(driver.with_state(|p| p.state.title.clone()), "Andrew");
/// ```
pub struct Driver<M: Model> {
    shared: Arc<Shared<M>>,
}

impl<M: Model> Driver<M> {
    /// Driver with no subscription generator.
    pub fn new(initial: M) -> Self {
        Self::builder(initial).build()
    }

    /// Start configuring a driver.
    pub fn builder(initial: M) -> DriverBuilder<M> {
        DriverBuilder::new(initial)
    }

    /// Deliver a message.
    ///
    /// Applied before returning if the driver is idle; queued behind the
    /// current transition otherwise.
    pub fn send(&self, message: M::Message) {
        self.shared.enqueue(message);
    }

    /// Non-owning handle for callbacks and subscriptions.
    pub fn handle(&self) -> WeakDriver<M> {
        self.shared.weak()
    }

    /// Read the current state.
    ///
    /// Blocks while a transition is being applied on another thread. Do not
    /// call [`send`](Self::send) from inside `f`.
    pub fn with_state<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        f(&lock(&self.shared.model))
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> M
    where
        M: Clone,
    {
        self.with_state(M::clone)
    }

    /// Number of completed transitions.
    pub fn generation(&self) -> u64 {
        *self.shared.generation.borrow()
    }

    /// Whether a subscription is currently active.
    pub fn has_subscription(&self) -> bool {
        lock(&self.shared.subscription).is_some()
    }

    /// Queued messages plus in-flight commands.
    pub fn pending(&self) -> usize {
        self.shared.inflight.pending()
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Wait until no message is queued and no command is in flight.
    ///
    /// Messages produced by subscriptions count while queued, so a driver
    /// with a busy subscription may never settle; use
    /// [`wait_until`](Self::wait_until) there.
    pub async fn settle(&self) {
        self.shared.inflight.wait_zero().await;
    }

    /// [`settle`](Self::settle) with a deadline.
    pub async fn settle_timeout(&self, timeout: Duration) -> Result<(), DriverError> {
        tokio::time::timeout(timeout, self.settle())
            .await
            .map_err(|_| DriverError::SettleTimeout {
                timeout,
                pending: self.pending(),
            })
    }

    /// Wait until `predicate` holds for the current state.
    ///
    /// Re-checked after every transition.
    pub async fn wait_until<F>(&self, predicate: F, timeout: Duration) -> Result<(), DriverError>
    where
        F: Fn(&M) -> bool,
    {
        let mut changes = self.shared.generation.subscribe();
        let wait = async {
            loop {
                changes.borrow_and_update();
                if self.with_state(&predicate) {
                    return Ok(());
                }
                // The sender lives in `Shared`, which outlives `&self`
                let _ = changes.changed().await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::ConditionTimeout {
                timeout,
                generation: self.generation(),
            }),
        }
    }
}

impl<M: Model> Drop for Driver<M> {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

impl<M: Model> fmt::Debug for Driver<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.shared.name)
            .field("generation", &self.generation())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Driver`].
pub struct DriverBuilder<M: Model> {
    initial: M,
    generator: Option<Generator<M>>,
    runtime: Option<Handle>,
    name: Option<String>,
}

impl<M: Model> DriverBuilder<M> {
    /// Builder with the initial state.
    pub fn new(initial: M) -> Self {
        Self {
            initial,
            generator: None,
            runtime: None,
            name: None,
        }
    }

    /// Derive the active subscription from the driver and current state.
    ///
    /// Called once at build time and again after every transition. The
    /// generator runs with the model locked; it must not block.
    pub fn with_subscriptions<F, S>(mut self, generator: F) -> Self
    where
        F: Fn(&WeakDriver<M>, &M) -> S + Send + Sync + 'static,
        S: Subscription,
    {
        self.generator = Some(Box::new(
            move |driver: &WeakDriver<M>, model: &M| -> Box<dyn Subscription> {
                Box::new(generator(driver, model))
            },
        ));
        self
    }

    /// Runtime that commands and subscriptions spawn onto.
    ///
    /// Defaults to the runtime current at build time, if any.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Name used in logs. Defaults to the model's type name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build the driver and generate its first subscription.
    pub fn build(self) -> Driver<M> {
        let name: Arc<str> = match self.name {
            Some(name) => name.into(),
            None => std::any::type_name::<M>().into(),
        };
        let runtime = self.runtime.or_else(|| Handle::try_current().ok());
        if runtime.is_none() {
            debug!(driver = %name, "no tokio runtime at build time, async commands will be dropped");
        }
        let (generation, _) = watch::channel(0);

        let shared = Arc::new_cyclic(|this| Shared {
            name,
            model: Mutex::new(self.initial),
            mailbox: Mutex::new(Mailbox {
                queue: VecDeque::new(),
                draining: false,
            }),
            subscription: Mutex::new(None),
            generator: self.generator,
            runtime,
            inflight: Arc::new(Inflight::new()),
            generation,
            disposed: AtomicBool::new(false),
            this: this.clone(),
        });

        shared.subscribe_initial();
        debug!(
            driver = %shared.name,
            subscriptions = shared.generator.is_some(),
            "driver created"
        );

        Driver { shared }
    }
}

/// Non-owning back-reference to a [`Driver`].
///
/// Deliveries after the driver is dropped are silent no-ops.
pub struct WeakDriver<M: Model> {
    shared: Weak<Shared<M>>,
}

impl<M: Model> WeakDriver<M> {
    /// Deliver a message if the driver still exists.
    ///
    /// Returns false when the driver is gone or disposed.
    pub fn send(&self, message: M::Message) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.enqueue(message),
            None => {
                trace!(?message, "driver dropped, ignoring message");
                false
            }
        }
    }

    /// Whether the driver can still accept messages.
    pub fn is_alive(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| !shared.is_disposed())
    }
}

impl<M: Model> Clone for WeakDriver<M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<M: Model> fmt::Debug for WeakDriver<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDriver")
            .field("alive", &self.is_alive())
            .finish()
    }
}
