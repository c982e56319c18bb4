// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller-side subscription cache.
//!
//! Several local callbacks may share one device subscription. The cache
//! tells the connection when a key gains its first callback (subscribe on
//! the device) or loses its last one (unsubscribe), and keeps the key set
//! so it can be replayed after a reconnect.

use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::{Blob, Decode, Decoder};
use crate::error::{Error, Result};
use crate::protocol::EventNotification;
use crate::types::{Event, ONo, PropertyId, PROPERTY_CHANGED};

/// Context blob sent with event subscriptions.
pub(crate) const EVENT_CONTEXT: &[u8] = b"E";
/// Context blob sent with property-change subscriptions.
pub(crate) const PROPERTY_CONTEXT: &[u8] = b"P";

/// Callback invoked for each matching notification.
pub type NotificationCallback = Arc<dyn Fn(&EventNotification) + Send + Sync>;

/// What a device subscription is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    Event(Event),
    Property { emitter: ONo, property: PropertyId },
}

impl SubscriptionKey {
    pub(crate) fn context(&self) -> Blob {
        match self {
            SubscriptionKey::Event(_) => Blob::new(EVENT_CONTEXT),
            SubscriptionKey::Property { .. } => Blob::new(PROPERTY_CONTEXT),
        }
    }

    /// The key a notification was sent for.
    ///
    /// The context blob tells property-change deliveries apart from plain
    /// `PropertyChanged` event deliveries of the same emitter.
    pub fn for_notification(notification: &EventNotification) -> Self {
        let event = notification.event;
        if event.event_id == PROPERTY_CHANGED && notification.context.as_slice() == PROPERTY_CONTEXT {
            let mut dec = Decoder::new(&notification.parameters);
            if let Ok(property) = PropertyId::decode(&mut dec) {
                return SubscriptionKey::Property {
                    emitter: event.emitter_ono,
                    property,
                };
            }
        }
        SubscriptionKey::Event(event)
    }
}

/// Handle returned by a subscribe call, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

/// Local callbacks per device subscription.
#[derive(Default)]
pub struct SubscriptionCache {
    next_token: u64,
    callbacks: HashMap<SubscriptionKey, Vec<(SubscriptionToken, NotificationCallback)>>,
    tokens: HashMap<SubscriptionToken, SubscriptionKey>,
}

impl SubscriptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_key(&self, key: &SubscriptionKey) -> bool {
        self.callbacks.contains_key(key)
    }

    /// Add a callback; returns its token.
    pub fn insert(&mut self, key: SubscriptionKey, callback: NotificationCallback) -> SubscriptionToken {
        self.next_token += 1;
        let token = SubscriptionToken(self.next_token);
        self.callbacks.entry(key).or_default().push((token, callback));
        self.tokens.insert(token, key);
        token
    }

    /// Key of `token`, and whether it is the key's last callback.
    pub fn lookup(&self, token: SubscriptionToken) -> Result<(SubscriptionKey, bool)> {
        let key = *self.tokens.get(&token).ok_or(Error::NotSubscribed)?;
        let last = self.callbacks.get(&key).map_or(true, |list| list.len() == 1);
        Ok((key, last))
    }

    /// Remove a callback. Returns the key and whether it is now unused.
    pub fn remove(&mut self, token: SubscriptionToken) -> Result<(SubscriptionKey, bool)> {
        let key = self.tokens.remove(&token).ok_or(Error::NotSubscribed)?;
        let now_empty = match self.callbacks.get_mut(&key) {
            Some(list) => {
                list.retain(|(t, _)| *t != token);
                list.is_empty()
            }
            None => true,
        };
        if now_empty {
            self.callbacks.remove(&key);
        }
        Ok((key, now_empty))
    }

    /// Every key with at least one callback.
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.callbacks.keys().copied().collect()
    }

    /// Callbacks registered for the key `notification` was sent for.
    pub fn callbacks_for(&self, notification: &EventNotification) -> Vec<NotificationCallback> {
        let key = SubscriptionKey::for_notification(notification);
        self.callbacks
            .get(&key)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::types::EventId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, NotificationCallback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (hits, Arc::new(move |_: &EventNotification| {
            h.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn notification(emitter: ONo, context: &[u8], params: Vec<u8>) -> EventNotification {
        EventNotification {
            event: Event::new(emitter, PROPERTY_CHANGED),
            context: Blob::new(context),
            parameters: params,
            exception: None,
        }
    }

    #[test]
    fn test_first_and_last_callback() {
        let mut cache = SubscriptionCache::new();
        let key = SubscriptionKey::Event(Event::new(10, EventId::new(1, 1)));
        let (_, cb) = counter();
        assert!(!cache.contains_key(&key));
        let a = cache.insert(key, Arc::clone(&cb));
        let b = cache.insert(key, cb);
        assert_eq!(cache.lookup(a).unwrap(), (key, false));
        assert_eq!(cache.remove(a).unwrap(), (key, false));
        assert_eq!(cache.remove(b).unwrap(), (key, true));
        assert!(cache.keys().is_empty());
        assert!(matches!(cache.remove(b), Err(Error::NotSubscribed)));
    }

    #[test]
    fn test_property_and_event_keys_are_distinct() {
        let mut cache = SubscriptionCache::new();
        let property = PropertyId::new(4, 1);
        let (event_hits, event_cb) = counter();
        let (prop_hits, prop_cb) = counter();
        cache.insert(SubscriptionKey::Event(Event::new(7, PROPERTY_CHANGED)), event_cb);
        cache.insert(
            SubscriptionKey::Property {
                emitter: 7,
                property,
            },
            prop_cb,
        );

        let params = encode(&(property, 1.5f32, 1u8)).unwrap();
        for cb in cache.callbacks_for(&notification(7, PROPERTY_CONTEXT, params.clone())) {
            cb(&notification(7, PROPERTY_CONTEXT, params.clone()));
        }
        for cb in cache.callbacks_for(&notification(7, EVENT_CONTEXT, params.clone())) {
            cb(&notification(7, EVENT_CONTEXT, params.clone()));
        }
        assert_eq!(event_hits.load(Ordering::SeqCst), 1);
        assert_eq!(prop_hits.load(Ordering::SeqCst), 1);

        // Other emitters match nothing.
        assert!(cache.callbacks_for(&notification(8, EVENT_CONTEXT, params)).is_empty());
    }
}
