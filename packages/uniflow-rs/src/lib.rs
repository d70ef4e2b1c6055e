//! # Uniflow
//!
//! A single-owner runtime where models decide, commands execute, and
//! subscriptions feed the loop.
//!
//! ## Core Concepts
//!
//! - [`Model`] = owned state plus a pure transition function
//! - [`Command`] = a one-shot asynchronous effect that yields at most one message
//! - [`Subscription`] = a long-lived external event source with idempotent teardown
//! - [`Driver`] = the owner that serializes transitions, starts commands, and
//!   regenerates subscriptions
//!
//! ## Architecture
//!
//! ```text
//! Edge (UI, socket, timer)
//!     │
//!     ▼ send()
//! Driver mailbox (FIFO) ◄──────────────────────────────┐
//!     │                                                │
//!     ▼ one at a time                                  │
//! Model.send(msg) ─► Vec<Command>                      │
//!     │                                                │
//!     ├─► teardown old subscription                    │
//!     ├─► generator(driver, &model) ─► Subscription ───┤
//!     │                                                │
//!     └─► Command.interpret(callback) ─► callback ─────┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One transition at a time** - the model is never mutated concurrently
//! 2. **No re-entrant transitions** - messages arriving mid-transition are queued
//! 3. **FIFO mailbox** - queued messages are applied in arrival order
//! 4. **At-most-once commands** - a command's callback is consumed by delivery
//! 5. **One active subscription** - the old one is torn down before the next is
//!    generated
//! 6. **Weak back-references** - deliveries to a dropped driver are no-ops
//!
//! ## Guarantees
//!
//! - **No error channel for commands**: failures are ordinary messages
//! - **No cancellation**: in-flight commands run to completion or are abandoned
//! - **No ordering across commands**: independent commands land in any order
//!
//! ## Example
//!
//! ```ignore
//! use uniflow::{Command, Driver, Model};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! enum Msg {
//!     Refresh,
//!     Loaded(Result<String, String>),
//! }
//!
//! struct Page {
//!     body: String,
//! }
//!
//! impl Model for Page {
//!     type Message = Msg;
//!
//!     fn send(&mut self, message: Msg) -> Vec<Command<Msg>> {
//!         match message {
//!             Msg::Refresh => vec![Command::perform(load_body(), Msg::Loaded)],
//!             Msg::Loaded(Ok(body)) => {
//!                 self.body = body;
//!                 Vec::new()
//!             }
//!             Msg::Loaded(Err(e)) => {
//!                 self.body = format!("failed: {e}");
//!                 Vec::new()
//!             }
//!         }
//!     }
//! }
//!
//! let driver = Driver::new(Page { body: String::new() });
//! driver.send(Msg::Refresh);
//! driver.settle().await;
//! ```
//!
//! ## What This Is Not
//!
//! Uniflow is **not**:
//! - A history or replay store
//! - A distributed coordinator
//! - A back-pressure scheduler

// Core modules
mod command;
mod driver;
mod error;
mod inflight;
mod model;
mod subscription;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export command types
pub use command::{Callback, Command};

// Re-export model trait
pub use model::Model;

// Re-export subscription types
pub use subscription::{BatchSubscription, StreamSubscription, Subscription, Teardown};

// Re-export driver types
pub use driver::{Driver, DriverBuilder, WeakDriver};

// Re-export error types
pub use error::{DriverError, MemberFailure, TeardownError};
