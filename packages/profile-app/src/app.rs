//! The profile model.
//!
//! A profile shows a title, the ids the user has saved, and a tick counter.
//! Loading the name and toggling saves are commands. Each saved id is watched
//! in the shared registry so changes made elsewhere flow back in.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;
use uniflow::{BatchSubscription, Command, Model, WeakDriver};

use crate::effects;
use crate::name_service::NameService;
use crate::registry::{Observer, SaveRegistry};
use crate::timer::Ticker;

/// Title shown while the name lookup is in flight.
pub const LOADING_TITLE: &str = "loading name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Start loading the name.
    MakeAndrew,
    NameChange(String),
    NameFailed(String),
    Save(String),
    Unsave(String),
    /// The registry reports `id` as saved or not.
    SaveChanged(String, bool),
    Tick,
}

/// Plain profile state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileState {
    pub title: String,
    pub saves: Vec<String>,
    pub ticks: u64,
    pub last_error: Option<String>,
    #[serde(skip)]
    title_before_load: Option<String>,
}

impl ProfileState {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn is_saved(&self, id: &str) -> bool {
        self.saves.iter().any(|s| s == id)
    }
}

/// Collaborators the profile's commands and subscriptions use.
#[derive(Clone)]
pub struct Deps {
    pub names: Arc<dyn NameService>,
    pub registry: Arc<dyn SaveRegistry>,
    /// Shared across clones; give each profile its own.
    pub tick: Option<Ticker>,
}

impl Deps {
    pub fn new(names: Arc<dyn NameService>, registry: Arc<dyn SaveRegistry>) -> Self {
        Self {
            names,
            registry,
            tick: None,
        }
    }

    /// Tick every `period`. A zero period disables the ticker.
    pub fn with_tick(mut self, period: Duration) -> Self {
        self.tick = (!period.is_zero()).then(|| Ticker::new(period));
        self
    }
}

pub struct Profile {
    pub state: ProfileState,
    deps: Deps,
}

impl Profile {
    pub fn new(title: impl Into<String>, deps: Deps) -> Self {
        Self {
            state: ProfileState::new(title),
            deps,
        }
    }

    /// Subscriptions for the current state: one registry watch per saved id,
    /// plus the ticker when configured.
    pub fn subscriptions(&self, driver: &WeakDriver<Profile>) -> BatchSubscription {
        let mut batch = BatchSubscription::empty();

        for id in &self.state.saves {
            let driver = driver.clone();
            let observer: Observer = Arc::new(move |id: &str, saved: bool| {
                driver.send(Message::SaveChanged(id.to_string(), saved));
            });
            batch.push(self.deps.registry.observe(id, observer));
        }

        if let Some(ticker) = &self.deps.tick {
            batch.push(ticker.subscribe(driver, || Message::Tick));
        }

        batch
    }
}

impl Model for Profile {
    type Message = Message;

    fn send(&mut self, message: Message) -> Vec<Command<Message>> {
        let state = &mut self.state;

        match message {
            Message::MakeAndrew => {
                if state.title_before_load.is_none() {
                    state.title_before_load = Some(std::mem::take(&mut state.title));
                }
                state.title = LOADING_TITLE.to_string();
                state.last_error = None;
                vec![effects::fetch_name(self.deps.names.clone())]
            }
            Message::NameChange(name) => {
                state.title = name;
                state.title_before_load = None;
                Vec::new()
            }
            Message::NameFailed(reason) => {
                if let Some(previous) = state.title_before_load.take() {
                    state.title = previous;
                }
                state.last_error = Some(reason);
                Vec::new()
            }
            Message::Save(id) => vec![effects::save(self.deps.registry.clone(), id)],
            Message::Unsave(id) => vec![effects::unsave(self.deps.registry.clone(), id)],
            Message::SaveChanged(id, true) => {
                if !state.is_saved(&id) {
                    debug!(id = %id, "saved");
                    state.saves.push(id);
                }
                Vec::new()
            }
            Message::SaveChanged(id, false) => {
                if state.is_saved(&id) {
                    debug!(id = %id, "unsaved");
                    state.saves.retain(|s| *s != id);
                }
                Vec::new()
            }
            Message::Tick => {
                state.ticks += 1;
                Vec::new()
            }
        }
    }
}
