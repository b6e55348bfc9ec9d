//! External service traits and in-memory implementations.

pub mod notifier;

pub use notifier::{DeliveredNotification, DeliveryNotifier, InMemoryNotifier, LogNotifier};
