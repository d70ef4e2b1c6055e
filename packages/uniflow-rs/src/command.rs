//! One-shot asynchronous effects and the callbacks they deliver through.
//!
//! A [`Command`] describes work; it does nothing until a driver interprets it.
//! Interpretation hands the command a [`Callback`], and the command arranges for
//! that callback to receive at most one message, at some later time, on any
//! thread.
//!
//! # Key Properties
//!
//! - **At most once**: [`Callback::call`] consumes the callback, so a second
//!   delivery does not compile.
//! - **Zero is allowed**: a callback dropped without being called reports a
//!   completion with no message. The runtime logs it and moves on.
//! - **No error channel**: failures are encoded as messages by the command
//!   author (`Msg::LoadFailed(..)`).
//! - **No cancellation**: once interpreted, a command runs to completion or is
//!   abandoned silently.

use std::fmt;
use std::future::Future;

use tokio::runtime::Handle;
use tracing::{error, trace};

const DEFAULT_LABEL: &str = "command";

type Deliver<M> = Box<dyn FnOnce(Option<M>) + Send>;

/// One-shot continuation handed to a command during interpretation.
///
/// Calling it delivers a message. Dropping it without calling reports that the
/// command finished without one.
pub struct Callback<M> {
    deliver: Option<Deliver<M>>,
}

impl<M: Send + 'static> Callback<M> {
    /// Callback that only observes delivered messages.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(M) + Send + 'static,
    {
        Self::on_complete(move |message| {
            if let Some(message) = message {
                f(message);
            }
        })
    }

    /// Callback that also observes completion without a message (`None`).
    ///
    /// `f` runs exactly once: on [`call`](Self::call) or on drop.
    pub fn on_complete<F>(f: F) -> Self
    where
        F: FnOnce(Option<M>) + Send + 'static,
    {
        Self {
            deliver: Some(Box::new(f)),
        }
    }

    /// Deliver the command's result.
    pub fn call(mut self, message: M) {
        if let Some(deliver) = self.deliver.take() {
            deliver(Some(message));
        }
    }
}

impl<M> Drop for Callback<M> {
    fn drop(&mut self) {
        if let Some(deliver) = self.deliver.take() {
            deliver(None);
        }
    }
}

impl<M> fmt::Debug for Callback<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("pending", &self.deliver.is_some())
            .finish()
    }
}

/// A description of a one-shot asynchronous effect producing at most one `M`.
///
/// # Example
///
/// ```ignore
/// fn fetch_name(service: Arc<dyn NameService>) -> Command<Msg> {
///     Command::perform(
///         async move { service.fetch().await },
///         |result| match result {
///             Ok(name) => Msg::NameChange(name),
///             Err(e) => Msg::NameFailed(e.to_string()),
///         },
///     )
///     .named("fetch_name")
/// }
/// ```
pub struct Command<M> {
    run: Box<dyn FnOnce(Callback<M>) + Send>,
    label: &'static str,
}

impl<M: Send + 'static> Command<M> {
    /// Command from a raw interpretation procedure.
    ///
    /// The procedure must not block; long work belongs on a task or thread.
    pub fn new<F>(interpret: F) -> Self
    where
        F: FnOnce(Callback<M>) + Send + 'static,
    {
        Self {
            run: Box::new(interpret),
            label: DEFAULT_LABEL,
        }
    }

    /// Command that delivers `message` as soon as it is interpreted.
    ///
    /// Delivery still goes through the driver's queue, so the message is
    /// processed after the transition that emitted it.
    pub fn ready(message: M) -> Self {
        Self::new(move |callback| callback.call(message)).named("ready")
    }

    /// Command that spawns `future` and delivers its output.
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = M> + Send + 'static,
    {
        Self::new(move |callback| {
            spawn_effect(async move {
                callback.call(future.await);
            });
        })
    }

    /// Command that spawns `future` and delivers `map(output)`.
    pub fn perform<F, T, G>(future: F, map: G) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        G: FnOnce(T) -> M + Send + 'static,
    {
        Self::future(async move { map(future.await) })
    }

    /// Command whose future may decide to deliver nothing.
    pub fn optional<F>(future: F) -> Self
    where
        F: Future<Output = Option<M>> + Send + 'static,
    {
        Self::new(move |callback| {
            spawn_effect(async move {
                if let Some(message) = future.await {
                    callback.call(message);
                }
            });
        })
    }

    /// Transform the delivered message.
    pub fn map<N, F>(self, f: F) -> Command<N>
    where
        N: Send + 'static,
        F: FnOnce(M) -> N + Send + 'static,
    {
        let label = self.label;
        Command {
            run: Box::new(move |callback: Callback<N>| {
                self.interpret(Callback::on_complete(move |message| {
                    if let Some(message) = message {
                        callback.call(f(message));
                    }
                }));
            }),
            label,
        }
    }

    /// Attach a static label used in logs and tests.
    pub fn named(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// The command's label.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Start the effect. `callback` receives at most one message.
    pub fn interpret(self, callback: Callback<M>) {
        trace!(command = self.label, "interpreting command");
        (self.run)(callback);
    }
}

impl<M> fmt::Debug for Command<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Spawn effect work on the ambient runtime.
///
/// Without a runtime the task (and the callback it owns) is dropped, which
/// reports a completion with no message.
fn spawn_effect<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(e) => {
            error!(error = %e, "no tokio runtime available, dropping command");
        }
    }
}
