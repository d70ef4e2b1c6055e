//! Profile screen driven by [`uniflow`].
//!
//! The model in [`app`] owns the profile state. Name lookups and save toggles
//! run as commands from [`effects`]; the shared [`registry`] and the
//! [`timer`] feed changes back through subscriptions.

pub mod app;
pub mod config;
pub mod effects;
pub mod name_service;
pub mod registry;
pub mod timer;

pub use app::{Deps, Message, Profile, ProfileState, LOADING_TITLE};
pub use config::Config;
pub use name_service::{HttpNameService, NameService, NameServiceError, StaticNameService};
pub use registry::{InMemorySaveRegistry, Observer, SaveRegistry};
pub use timer::Ticker;

use uniflow::Driver;

/// Start a driver for `profile`, wired to its subscriptions.
pub fn start(profile: Profile) -> Driver<Profile> {
    Driver::builder(profile)
        .with_name("profile")
        .with_subscriptions(|driver, profile: &Profile| profile.subscriptions(driver))
        .build()
}
