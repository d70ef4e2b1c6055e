//! Testing utilities for models, commands and subscriptions.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! uniflow = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ## Fluent transition tests
//!
//! ```ignore
//! use uniflow::testing::ModelTestExt;
//!
//! Profile::new("Matt", deps)
//!     .test()
//!     .given(Message::MakeAndrew)
//!     .expect_labels(&["fetch_name"])
//!     .assert_state(|p| p.state.title == "loading name")
//!     .then(Message::NameChange("Andrew".into()))
//!     .expect_none()
//!     .assert_state(|p| p.state.title == "Andrew");
//! ```
//!
//! ## Running a command by hand
//!
//! ```ignore
//! let command = fetch_name(service);
//! assert_eq!(run_command(command).await, Some(Message::NameChange("Andrew".into())));
//! ```
//!
//! ## Counting teardowns
//!
//! ```ignore
//! let probe = TeardownProbe::new();
//! let mut batch = BatchSubscription::empty()
//!     .with(probe.subscription())
//!     .with(probe.subscription());
//! batch.teardown()?;
//! assert_eq!(probe.torn_down(), 2);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::command::{Callback, Command};
use crate::model::Model;
use crate::subscription::Teardown;

/// Fluent builder for exercising a model's transitions without a driver.
pub struct TransitionTest<M: Model> {
    model: M,
    commands: Vec<Command<M::Message>>,
}

impl<M: Model> TransitionTest<M> {
    /// Create a transition test around `model`.
    pub fn new(model: M) -> Self {
        Self {
            model,
            commands: Vec::new(),
        }
    }

    /// Apply the first message and capture its commands.
    pub fn given(mut self, message: M::Message) -> Self {
        self.commands = self.model.send(message);
        self
    }

    /// Apply a subsequent message and capture its commands.
    pub fn then(mut self, message: M::Message) -> Self {
        self.commands = self.model.send(message);
        self
    }

    /// Assert how many commands the last transition emitted.
    pub fn expect_commands(self, expected: usize) -> Self {
        assert_eq!(
            self.commands.len(),
            expected,
            "Command count mismatch, got {:?}",
            self.labels()
        );
        self
    }

    /// Assert the last transition emitted nothing.
    pub fn expect_none(self) -> Self {
        assert!(
            self.commands.is_empty(),
            "Expected no commands, got {:?}",
            self.labels()
        );
        self
    }

    /// Assert the labels of the last transition's commands, in order.
    pub fn expect_labels(self, expected: &[&str]) -> Self {
        assert_eq!(self.labels(), expected, "Command labels mismatch");
        self
    }

    /// Assert the model state matches a predicate.
    pub fn assert_state<F>(self, predicate: F) -> Self
    where
        F: FnOnce(&M) -> bool,
    {
        assert!(predicate(&self.model), "State predicate failed");
        self
    }

    /// Labels of the last transition's commands.
    pub fn labels(&self) -> Vec<&'static str> {
        self.commands.iter().map(Command::label).collect()
    }

    /// Get a reference to the model for custom assertions.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Take the last transition's commands, e.g. to interpret them.
    pub fn take_commands(&mut self) -> Vec<Command<M::Message>> {
        std::mem::take(&mut self.commands)
    }

    /// Consume the test and return the model.
    pub fn into_model(self) -> M {
        self.model
    }
}

/// Extension trait for models to enable fluent testing.
pub trait ModelTestExt: Model + Sized {
    /// Create a transition test builder for this model.
    fn test(self) -> TransitionTest<Self> {
        TransitionTest::new(self)
    }
}

impl<M: Model> ModelTestExt for M {}

/// Interpret `command` and return what it delivered.
///
/// `None` means the command finished without a message.
pub async fn run_command<M: Send + 'static>(command: Command<M>) -> Option<M> {
    let (tx, rx) = oneshot::channel();
    command.interpret(Callback::on_complete(move |message| {
        let _ = tx.send(message);
    }));
    rx.await.ok().flatten()
}

/// Hands out subscriptions and counts how many have been torn down.
#[derive(Debug, Default)]
pub struct TeardownProbe {
    issued: AtomicUsize,
    torn_down: Arc<AtomicUsize>,
}

impl TeardownProbe {
    /// Create a new probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh subscription whose teardown is counted.
    pub fn subscription(&self) -> Teardown {
        self.issued.fetch_add(1, Ordering::AcqRel);
        let torn_down = self.torn_down.clone();
        Teardown::new(move || {
            torn_down.fetch_add(1, Ordering::AcqRel);
        })
    }

    /// Subscriptions handed out so far.
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::Acquire)
    }

    /// Teardown closures that have run.
    pub fn torn_down(&self) -> usize {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Subscriptions handed out and not yet torn down.
    pub fn active(&self) -> usize {
        self.issued() - self.torn_down()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::{BatchSubscription, Subscription};

    #[derive(Debug, Clone, PartialEq)]
    enum Msg {
        Ping,
        Pong,
    }

    #[derive(Debug, Default)]
    struct PingPong {
        pongs: usize,
    }

    impl Model for PingPong {
        type Message = Msg;

        fn send(&mut self, message: Msg) -> Vec<Command<Msg>> {
            match message {
                Msg::Ping => vec![Command::ready(Msg::Pong).named("pong")],
                Msg::Pong => {
                    self.pongs += 1;
                    Vec::new()
                }
            }
        }
    }

    #[test]
    fn test_transition_test_chain() {
        let model = PingPong::default()
            .test()
            .given(Msg::Ping)
            .expect_commands(1)
            .expect_labels(&["pong"])
            .then(Msg::Pong)
            .expect_none()
            .assert_state(|m| m.pongs == 1)
            .into_model();

        assert_eq!(model.pongs, 1);
    }

    #[test]
    #[should_panic(expected = "Command labels mismatch")]
    fn test_expect_labels_panics_on_mismatch() {
        PingPong::default()
            .test()
            .given(Msg::Ping)
            .expect_labels(&["ping"]);
    }

    #[tokio::test]
    async fn test_run_command_returns_delivery() {
        let mut test = PingPong::default().test().given(Msg::Ping);
        let command = test.take_commands().pop().unwrap();

        assert_eq!(run_command(command).await, Some(Msg::Pong));
    }

    #[tokio::test]
    async fn test_run_command_none_when_dropped() {
        let command = Command::<Msg>::new(drop);
        assert_eq!(run_command(command).await, None);
    }

    #[test]
    fn test_probe_counts_teardowns() {
        let probe = TeardownProbe::new();
        let mut batch = BatchSubscription::empty()
            .with(probe.subscription())
            .with(probe.subscription())
            .with(probe.subscription());
        assert_eq!(probe.active(), 3);

        batch.teardown().unwrap();
        batch.teardown().unwrap();

        assert_eq!(probe.issued(), 3);
        assert_eq!(probe.torn_down(), 3);
        assert_eq!(probe.active(), 0);
    }
}
