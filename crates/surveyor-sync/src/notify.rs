//! User-facing notifications.

use std::sync::Arc;

use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
  Info,
  Success,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub level:   Level,
  pub message: String,
}

impl Notification {
  pub fn success(message: impl Into<String>) -> Self {
    Self { level: Level::Success, message: message.into() }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self { level: Level::Error, message: message.into() }
  }

  pub fn info(message: impl Into<String>) -> Self {
    Self { level: Level::Info, message: message.into() }
  }
}

/// Receives notifications meant for the person operating the device.
pub trait Notifier: Send + Sync {
  fn notify(&self, notification: Notification);
}

/// Forwards notifications to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
  fn notify(&self, n: Notification) {
    match n.level {
      Level::Info | Level::Success => info!(level = ?n.level, "{}", n.message),
      Level::Error => error!("{}", n.message),
    }
  }
}

impl<T: Notifier + ?Sized> Notifier for Arc<T> {
  fn notify(&self, notification: Notification) { (**self).notify(notification) }
}

