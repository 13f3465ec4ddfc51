// Logging utilities for the Gordian security suite
//
// This module provides a small structured logging layer over the `log`
// facade with:
// - Component-based categorization of messages
// - Child loggers that keep the parent component as a prefix
// - A store-id tag so messages from different keystores can be told apart

use log::{debug, error, info, warn};

/// Predefined components for logging categorization
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Component {
    Factory,
    KeySet,
    KeyStore,
    Zip,
    System,
    Custom(&'static str),
}

impl Component {
    /// Get the string representation of the component
    pub fn as_str(&self) -> &str {
        match self {
            Component::Factory => "Factory",
            Component::KeySet => "KeySet",
            Component::KeyStore => "KeyStore",
            Component::Zip => "Zip",
            Component::System => "System",
            Component::Custom(name) => name,
        }
    }
}

/// A helper for creating component-specific loggers with store ID tracking
#[derive(Clone)]
pub struct Logger {
    /// Component this logger is for
    component: Component,
    /// Store ID used to distinguish concurrent keystore instances
    store_id: String,
    /// Parent component for hierarchical logging (if any)
    parent_component: Option<Component>,
}

impl Logger {
    /// Create a new root logger for a specific component and store ID
    pub fn new_root(component: Component, store_id: &str) -> Self {
        Self {
            component,
            store_id: store_id.to_string(),
            parent_component: None,
        }
    }

    /// Create a child logger with the same store ID but different component
    pub fn with_component(&self, component: Component) -> Self {
        Self {
            component,
            store_id: self.store_id.clone(),
            parent_component: Some(self.component),
        }
    }

    /// Get a reference to the store ID
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Get the component prefix for logging, including parent if available
    fn component_prefix(&self) -> String {
        match self.parent_component {
            Some(parent) if parent != Component::System => {
                format!("{}.{}", parent.as_str(), self.component.as_str())
            }
            _ => self.component.as_str().to_string(),
        }
    }

    /// Log a debug message
    pub fn debug(&self, message: impl Into<String>) {
        if log::log_enabled!(log::Level::Debug) {
            debug!(
                "[{}][{}] {}",
                self.store_id,
                self.component_prefix(),
                message.into()
            );
        }
    }

    /// Log an info message
    pub fn info(&self, message: impl Into<String>) {
        if log::log_enabled!(log::Level::Info) {
            info!(
                "[{}][{}] {}",
                self.store_id,
                self.component_prefix(),
                message.into()
            );
        }
    }

    /// Log a warning message
    pub fn warn(&self, message: impl Into<String>) {
        if log::log_enabled!(log::Level::Warn) {
            warn!(
                "[{}][{}] {}",
                self.store_id,
                self.component_prefix(),
                message.into()
            );
        }
    }

    /// Log an error message
    pub fn error(&self, message: impl Into<String>) {
        if log::log_enabled!(log::Level::Error) {
            error!(
                "[{}][{}] {}",
                self.store_id,
                self.component_prefix(),
                message.into()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_prefix_includes_parent() {
        let root = Logger::new_root(Component::KeyStore, "store-1");
        let child = root.with_component(Component::Zip);
        assert_eq!(child.component_prefix(), "KeyStore.Zip");
        assert_eq!(root.component_prefix(), "KeyStore");
    }

    #[test]
    fn system_parent_is_elided() {
        let root = Logger::new_root(Component::System, "store-1");
        let child = root.with_component(Component::Factory);
        assert_eq!(child.component_prefix(), "Factory");
    }
}
