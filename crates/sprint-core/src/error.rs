// ── Core error types ──
//
// `ViewModelError` is the capability every error surfaced to a view must
// provide. `ActionError` wraps a work error with the "rejected because
// busy" case that the action layer adds on top.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can be presented by a view (alert title, suggestion, buttons).
///
/// The defaults derive the description from `Display` and offer no
/// recovery, so most error enums only need an empty `impl`.
pub trait ViewModelError: std::error::Error + Send + Sync + 'static {
    fn localized_description(&self) -> String {
        self.to_string()
    }

    fn localized_recovery_suggestion(&self) -> Option<String> {
        None
    }

    fn localized_recovery_options(&self) -> Option<Vec<String>> {
        None
    }
}

/// Type-erased error as it travels through an [`ErrorBus`](crate::ErrorBus).
pub type SharedError = Arc<dyn ViewModelError>;

/// Plain-data snapshot of a [`ViewModelError`].
///
/// Serializes to `{ "description", "recoverySuggestion"?, "recoveryOptions"? }`
/// and doubles as a ready-made error type for fetch functions and models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{description}")]
pub struct PresentableError {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_options: Option<Vec<String>>,
}

impl PresentableError {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            recovery_suggestion: None,
            recovery_options: None,
        }
    }

    pub fn with_recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.recovery_suggestion = Some(suggestion.into());
        self
    }

    pub fn with_recovery_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recovery_options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    /// Capture what a view needs from any [`ViewModelError`].
    pub fn from_error(error: &dyn ViewModelError) -> Self {
        Self {
            description: error.localized_description(),
            recovery_suggestion: error.localized_recovery_suggestion(),
            recovery_options: error.localized_recovery_options(),
        }
    }
}

impl ViewModelError for PresentableError {
    fn localized_description(&self) -> String {
        self.description.clone()
    }

    fn localized_recovery_suggestion(&self) -> Option<String> {
        self.recovery_suggestion.clone()
    }

    fn localized_recovery_options(&self) -> Option<Vec<String>> {
        self.recovery_options.clone()
    }
}

/// A stream could not be registered on a bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// `register` was called off a Tokio runtime; use `register_with`
    /// and pass a runtime handle instead.
    #[error("no Tokio runtime to drive the registered stream")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Outcome of applying an [`Action`](crate::Action) that did not succeed.
#[derive(Debug, Error)]
pub enum ActionError<E> {
    /// The action was busy, or its owner was already loading.
    #[error("action is disabled")]
    Disabled,

    /// The work ran and failed. The same error was reported to the
    /// action's error stream and to any bound error bus.
    #[error("{0}")]
    Failed(Arc<E>),
}

impl<E> ActionError<E> {
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    /// The work error, if the work actually ran.
    pub fn failure(&self) -> Option<&Arc<E>> {
        match self {
            Self::Disabled => None,
            Self::Failed(err) => Some(err),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Error)]
    #[error("disk is full")]
    struct DiskFull;

    impl ViewModelError for DiskFull {}

    #[test]
    fn defaults_come_from_display() {
        let snapshot = PresentableError::from_error(&DiskFull);
        assert_eq!(snapshot, PresentableError::new("disk is full"));
    }

    #[test]
    fn serializes_with_optional_fields_omitted() {
        let plain = serde_json::to_value(PresentableError::new("offline")).unwrap();
        assert_eq!(plain, json!({ "description": "offline" }));

        let full = PresentableError::new("offline")
            .with_recovery_suggestion("Check your connection.")
            .with_recovery_options(["Retry", "Cancel"]);
        assert_eq!(
            serde_json::to_value(&full).unwrap(),
            json!({
                "description": "offline",
                "recoverySuggestion": "Check your connection.",
                "recoveryOptions": ["Retry", "Cancel"],
            })
        );

        let back: PresentableError = serde_json::from_value(json!({
            "description": "offline",
            "recoveryOptions": ["Retry"],
        }))
        .unwrap();
        assert_eq!(back.recovery_options, Some(vec!["Retry".to_owned()]));
        assert_eq!(back.recovery_suggestion, None);
    }

    #[test]
    fn action_error_exposes_failure() {
        let err: ActionError<PresentableError> =
            ActionError::Failed(Arc::new(PresentableError::new("boom")));
        assert!(!err.is_disabled());
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.failure().unwrap().description, "boom");
        assert!(ActionError::<PresentableError>::Disabled.failure().is_none());
    }
}
