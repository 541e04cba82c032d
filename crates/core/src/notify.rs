//! Notification surface
//!
//! Fire-and-forget toasts consumed by whatever UI hosts the engine.

/// A single toast message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub color: &'static str,
    pub icon: Option<&'static str>,
    pub position: &'static str,
}

impl Notification {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            color: "warning",
            icon: None,
            position: "top",
        }
    }

    pub fn negative(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            color: "negative",
            icon: Some("error"),
            position: "top",
        }
    }

    pub fn positive(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            color: "positive",
            icon: None,
            position: "top",
        }
    }
}

/// Sink for notifications. No return value is ever consumed.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Drops every notification; for headless use and tests.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notification: Notification) {}
}
