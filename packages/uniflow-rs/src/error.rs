//! Structured error types for the driver and for subscription teardown.
//!
//! Commands have no error channel. A failing effect encodes its failure as an
//! ordinary message, so the only errors the runtime itself surfaces are:
//!
//! - [`DriverError`]: waiting on a driver that never settles, or that is gone.
//! - [`TeardownError`]: a subscription that failed to release its resources.
//!
//! # Example
//!
//! ```ignore
//! use uniflow::{DriverError, TeardownError};
//!
//! match driver.settle_timeout(Duration::from_secs(1)).await {
//!     Ok(()) => {}
//!     Err(DriverError::SettleTimeout { pending, .. }) => {
//!         tracing::warn!(pending, "commands still running");
//!     }
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors returned by [`Driver`](crate::Driver) wait operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Work was still queued or in flight when the deadline passed.
    #[error("driver did not settle within {timeout:?} ({pending} items pending)")]
    SettleTimeout {
        /// How long the caller waited.
        timeout: Duration,
        /// Queued messages plus in-flight commands at the deadline.
        pending: usize,
    },

    /// The state predicate never held before the deadline passed.
    #[error("state condition not reached within {timeout:?} (generation {generation})")]
    ConditionTimeout {
        /// How long the caller waited.
        timeout: Duration,
        /// Last generation observed.
        generation: u64,
    },
}

/// A single batch member that failed to tear down.
#[derive(Debug)]
pub struct MemberFailure {
    /// Position of the member in the batch, in supplied order.
    pub index: usize,
    /// What went wrong.
    pub error: TeardownError,
}

impl fmt::Display for MemberFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member {}: {}", self.index, self.error)
    }
}

/// Errors returned by [`Subscription::teardown`](crate::Subscription::teardown).
///
/// Teardown is expected to succeed. Implementations that can fail report it
/// here; [`BatchSubscription`](crate::BatchSubscription) collects member
/// failures without skipping the remaining members.
#[derive(Debug, Error)]
pub enum TeardownError {
    /// The subscription could not release a resource.
    #[error("subscription teardown failed: {0}")]
    Failed(#[from] anyhow::Error),

    /// The teardown code panicked.
    #[error("subscription teardown panicked: {0}")]
    Panicked(String),

    /// One or more members of a batch failed; all members were still visited.
    #[error("{} of {total} batch members failed to tear down", failures.len())]
    Batch {
        /// Number of members in the batch.
        total: usize,
        /// Failed members in batch order.
        failures: Vec<MemberFailure>,
    },
}

impl TeardownError {
    /// Build a [`TeardownError::Panicked`] from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        TeardownError::Panicked(panic_message(payload.as_ref()))
    }

    /// Indices of failed batch members, or empty for non-batch errors.
    pub fn failed_members(&self) -> Vec<usize> {
        match self {
            TeardownError::Batch { failures, .. } => failures.iter().map(|f| f.index).collect(),
            _ => Vec::new(),
        }
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
