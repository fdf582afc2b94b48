//! Notification Router
//!
//! Keeps the subscriber registry for every (device, service, characteristic)
//! key. A key present in the router is Subscribed: the platform-level
//! subscription for it is installed. Its subscriber list may be empty when
//! platform subscriptions are kept after the last subscriber leaves.
//!
//! The router never calls back into anything itself. [`callbacks`] hands out
//! the subscriber list so the caller can invoke it after releasing its lock.
//!
//! [`callbacks`]: NotificationRouter::callbacks

use crate::domain::models::{CharacteristicValueChanged, DeviceHandle, NotifyKey};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Logical subscriber callback
pub type NotificationCallback = Arc<dyn Fn(&CharacteristicValueChanged) + Send + Sync>;

/// Handle for one logical subscriber, returned by `setup_notify`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Subscriber {
    id: SubscriptionId,
    callback: NotificationCallback,
}

#[derive(Default)]
pub struct NotificationRouter {
    routes: HashMap<NotifyKey, Vec<Subscriber>>,
    next_id: u64,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the platform subscription for this key is installed
    pub fn is_subscribed(&self, key: &NotifyKey) -> bool {
        self.routes.contains_key(key)
    }

    /// Add a logical subscriber to a key, marking it Subscribed
    pub fn add(&mut self, key: NotifyKey, callback: NotificationCallback) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.routes
            .entry(key)
            .or_default()
            .push(Subscriber { id, callback });
        id
    }

    /// Key a logical subscriber is registered under
    pub fn key_of(&self, id: SubscriptionId) -> Option<NotifyKey> {
        self.routes
            .iter()
            .find(|(_, subscribers)| subscribers.iter().any(|s| s.id == id))
            .map(|(key, _)| key.clone())
    }

    /// Remove a logical subscriber
    ///
    /// Returns its key and whether that key has no subscribers left. The key
    /// itself stays Subscribed until [`unroute`](Self::unroute).
    pub fn remove(&mut self, id: SubscriptionId) -> Option<(NotifyKey, bool)> {
        let (key, subscribers) = self
            .routes
            .iter_mut()
            .find(|(_, subscribers)| subscribers.iter().any(|s| s.id == id))?;
        subscribers.retain(|s| s.id != id);
        Some((key.clone(), subscribers.is_empty()))
    }

    /// Return a key to Unsubscribed, dropping any subscribers
    pub fn unroute(&mut self, key: &NotifyKey) -> bool {
        self.routes.remove(key).is_some()
    }

    /// Subscribers of a key in registration order
    pub fn callbacks(&self, key: &NotifyKey) -> Vec<NotificationCallback> {
        self.routes
            .get(key)
            .map(|subscribers| subscribers.iter().map(|s| s.callback.clone()).collect())
            .unwrap_or_default()
    }

    /// Drop every key belonging to a device, returning the keys removed
    pub fn clear_device(&mut self, device: &DeviceHandle) -> Vec<NotifyKey> {
        let keys: Vec<NotifyKey> = self
            .routes
            .keys()
            .filter(|key| &key.device == device)
            .cloned()
            .collect();
        for key in &keys {
            self.routes.remove(key);
        }
        keys
    }

    /// Subscribed keys of a device, sorted
    pub fn keys_for(&self, device: &DeviceHandle) -> Vec<NotifyKey> {
        let mut keys: Vec<NotifyKey> = self
            .routes
            .keys()
            .filter(|key| &key.device == device)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn subscriber_count(&self, key: &NotifyKey) -> usize {
        self.routes.get(key).map_or(0, Vec::len)
    }
}
