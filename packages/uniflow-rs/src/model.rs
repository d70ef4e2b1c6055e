//! The model contract: owned state plus a pure transition function.
//!
//! # Key Properties
//!
//! - **State is internal**: a model owns its state and updates it in place via
//!   `&mut self`.
//! - **Pure transitions**: no IO, no async. All IO is described by the returned
//!   [`Command`]s.
//! - **Total**: every message variant is handled. Write transitions as an
//!   exhaustive `match` with no wildcard arm so a new variant fails to compile.
//! - **Initiation order**: the returned commands are started in list order.
//!   Their completion order is unspecified.

use std::fmt;

use crate::command::Command;

/// Application state and its transition function.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq)]
/// enum Msg {
///     Refresh,
///     Loaded(String),
/// }
///
/// struct Page {
///     body: String,
/// }
///
/// impl Model for Page {
///     type Message = Msg;
///
///     fn send(&mut self, message: Msg) -> Vec<Command<Msg>> {
///         match message {
///             Msg::Refresh => vec![load_body()],
///             Msg::Loaded(body) => {
///                 self.body = body;
///                 Vec::new()
///             }
///         }
///     }
/// }
/// ```
pub trait Model: Send + 'static {
    /// Closed set of state-changing events.
    type Message: Clone + PartialEq + fmt::Debug + Send + 'static;

    /// Apply `message` and return the effects to start.
    ///
    /// # Guarantees
    ///
    /// - Called synchronously
    /// - Called serially (never two transitions at once)
    fn send(&mut self, message: Self::Message) -> Vec<Command<Self::Message>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum CounterMsg {
        Increment,
        Decrement,
        Reset,
        Announce,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        count: i32,
    }

    impl Model for Counter {
        type Message = CounterMsg;

        fn send(&mut self, message: CounterMsg) -> Vec<Command<CounterMsg>> {
            match message {
                CounterMsg::Increment => {
                    self.count += 1;
                    Vec::new()
                }
                CounterMsg::Decrement => {
                    self.count -= 1;
                    Vec::new()
                }
                CounterMsg::Reset => {
                    self.count = 0;
                    vec![Command::ready(CounterMsg::Announce).named("announce")]
                }
                CounterMsg::Announce => Vec::new(),
            }
        }
    }

    #[test]
    fn test_model_state_updates() {
        let mut counter = Counter { count: 0 };

        counter.send(CounterMsg::Increment);
        counter.send(CounterMsg::Increment);
        counter.send(CounterMsg::Decrement);
        assert_eq!(counter.count, 1);

        counter.send(CounterMsg::Reset);
        assert_eq!(counter.count, 0);
    }

    #[test]
    fn test_transition_is_deterministic() {
        let start = Counter { count: 5 };

        for message in [
            CounterMsg::Increment,
            CounterMsg::Decrement,
            CounterMsg::Reset,
            CounterMsg::Announce,
        ] {
            let mut a = start.clone();
            let mut b = start.clone();
            let labels_a: Vec<_> = a.send(message.clone()).iter().map(|c| c.label()).collect();
            let labels_b: Vec<_> = b.send(message.clone()).iter().map(|c| c.label()).collect();

            assert_eq!(a, b, "state diverged for {:?}", message);
            assert_eq!(labels_a, labels_b, "commands diverged for {:?}", message);
        }
    }

    #[test]
    fn test_model_returns_commands() {
        let mut counter = Counter { count: 3 };

        assert!(counter.send(CounterMsg::Increment).is_empty());

        let commands = counter.send(CounterMsg::Reset);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].label(), "announce");
    }
}
