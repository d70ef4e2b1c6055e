//! Commands the profile emits.
//!
//! Each command captures the collaborator it needs and resolves to a
//! [`Message`]. Failures come back as messages too.

use std::sync::Arc;

use tracing::{debug, warn};
use uniflow::Command;

use crate::app::Message;
use crate::name_service::NameService;
use crate::registry::SaveRegistry;

/// Look up the display name.
pub fn fetch_name(names: Arc<dyn NameService>) -> Command<Message> {
    Command::perform(async move { names.fetch_name().await }, |result| {
        match result {
            Ok(name) => Message::NameChange(name),
            Err(e) => {
                warn!(error = %e, "name lookup failed");
                Message::NameFailed(e.to_string())
            }
        }
    })
    .named("fetch_name")
}

/// Mark `id` saved in the shared registry.
pub fn save(registry: Arc<dyn SaveRegistry>, id: String) -> Command<Message> {
    Command::future(async move {
        let changed = registry.mark_saved(&id).await;
        debug!(id = %id, changed, "save applied");
        Message::SaveChanged(id, true)
    })
    .named("save")
}

/// Remove the mark on `id` in the shared registry.
pub fn unsave(registry: Arc<dyn SaveRegistry>, id: String) -> Command<Message> {
    Command::future(async move {
        let changed = registry.unmark(&id).await;
        debug!(id = %id, changed, "unsave applied");
        Message::SaveChanged(id, false)
    })
    .named("unsave")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name_service::StaticNameService;
    use crate::registry::InMemorySaveRegistry;
    use uniflow::testing::run_command;

    #[tokio::test]
    async fn test_fetch_name_success() {
        let command = fetch_name(Arc::new(StaticNameService::new("Andrew")));
        assert_eq!(command.label(), "fetch_name");
        assert_eq!(
            run_command(command).await,
            Some(Message::NameChange("Andrew".into()))
        );
    }

    #[tokio::test]
    async fn test_fetch_name_failure_is_a_message() {
        let command = fetch_name(Arc::new(StaticNameService::failing("offline")));
        assert_eq!(
            run_command(command).await,
            Some(Message::NameFailed(
                "name service unavailable: offline".into()
            ))
        );
    }

    #[tokio::test]
    async fn test_save_and_unsave_touch_registry() {
        let registry = Arc::new(InMemorySaveRegistry::new());

        let delivered = run_command(save(registry.clone(), "14".into())).await;
        assert_eq!(delivered, Some(Message::SaveChanged("14".into(), true)));
        assert!(registry.is_saved("14"));

        let delivered = run_command(unsave(registry.clone(), "14".into())).await;
        assert_eq!(delivered, Some(Message::SaveChanged("14".into(), false)));
        assert!(!registry.is_saved("14"));
    }
}
