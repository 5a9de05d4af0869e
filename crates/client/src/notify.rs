//! Human-readable status notifications.
//!
//! The dashboard shows toasts for connection status changes; the connector
//! only knows it through this port.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

#[cfg_attr(test, mockall::automock)]
pub trait StatusNotifier: Send + Sync {
    fn notify(&self, level: NotifyLevel, message: &str);
}

/// Default notifier: writes status lines through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl StatusNotifier for TracingNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) {
        match level {
            NotifyLevel::Info => tracing::info!(target: "uce_client::status", "{message}"),
            NotifyLevel::Warning => tracing::warn!(target: "uce_client::status", "{message}"),
            NotifyLevel::Error => tracing::error!(target: "uce_client::status", "{message}"),
        }
    }
}
