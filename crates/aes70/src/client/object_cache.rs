// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller-side proxies for device objects.
//!
//! ```text
//!   resolve ──► Valid ──reconnect (retain)──► Stale ──refresh──► Valid
//!                 │
//!                 └──reconnect (no retain)──► Invalidated
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::{ClassIdentification, ONo};

/// Freshness of a cached proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Valid,
    /// Known before a reconnect, not yet confirmed since.
    Stale,
    /// Dropped from the cache; the proxy must not be used.
    Invalidated,
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::Stale => write!(f, "stale"),
            Self::Invalidated => write!(f, "invalidated"),
        }
    }
}

/// A resolved device object.
pub struct RemoteObject {
    ono: ONo,
    inner: RwLock<RemoteObjectInner>,
}

struct RemoteObjectInner {
    class_identification: ClassIdentification,
    /// Closest locally known class, if any.
    class_name: Option<&'static str>,
    state: ObjectState,
}

impl RemoteObject {
    fn new(ono: ONo, class_identification: ClassIdentification, class_name: Option<&'static str>) -> Self {
        Self {
            ono,
            inner: RwLock::new(RemoteObjectInner {
                class_identification,
                class_name,
                state: ObjectState::Valid,
            }),
        }
    }

    pub fn ono(&self) -> ONo {
        self.ono
    }

    pub fn class_identification(&self) -> ClassIdentification {
        self.inner.read().class_identification.clone()
    }

    pub fn class_name(&self) -> Option<&'static str> {
        self.inner.read().class_name
    }

    pub fn state(&self) -> ObjectState {
        self.inner.read().state
    }

    pub fn is_stale(&self) -> bool {
        self.state() == ObjectState::Stale
    }

    /// Fail if the proxy was invalidated.
    pub fn ensure_usable(&self) -> Result<()> {
        match self.state() {
            ObjectState::Invalidated => Err(Error::ObjectInvalidated(self.ono)),
            _ => Ok(()),
        }
    }

    fn set_state(&self, state: ObjectState) {
        self.inner.write().state = state;
    }

    fn refresh(&self, class_identification: ClassIdentification, class_name: Option<&'static str>) {
        let mut inner = self.inner.write();
        inner.class_identification = class_identification;
        inner.class_name = class_name;
        inner.state = ObjectState::Valid;
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("RemoteObject")
            .field("ono", &self.ono)
            .field("class", &inner.class_identification.to_string())
            .field("state", &inner.state)
            .finish()
    }
}

/// Proxies by object number.
#[derive(Default)]
pub struct ObjectCache {
    objects: RwLock<HashMap<ONo, Arc<RemoteObject>>>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ono: ONo) -> Option<Arc<RemoteObject>> {
        self.objects.read().get(&ono).cloned()
    }

    /// Insert or refresh a proxy; the result is valid.
    pub fn upsert(
        &self,
        ono: ONo,
        class_identification: ClassIdentification,
        class_name: Option<&'static str>,
    ) -> Arc<RemoteObject> {
        let mut objects = self.objects.write();
        if let Some(existing) = objects.get(&ono) {
            existing.refresh(class_identification, class_name);
            return Arc::clone(existing);
        }
        let object = Arc::new(RemoteObject::new(ono, class_identification, class_name));
        objects.insert(ono, Arc::clone(&object));
        object
    }

    /// Keep every proxy but mark it stale.
    pub fn mark_all_stale(&self) {
        for object in self.objects.read().values() {
            object.set_state(ObjectState::Stale);
        }
    }

    /// Drop every proxy and mark the handles held elsewhere invalid.
    pub fn invalidate_all(&self) {
        for (_, object) in self.objects.write().drain() {
            object.set_state(ObjectState::Invalidated);
        }
    }

    /// Object numbers of stale proxies.
    pub fn stale(&self) -> Vec<ONo> {
        self.objects
            .read()
            .values()
            .filter(|o| o.is_stale())
            .map(|o| o.ono)
            .collect()
    }

    /// Forget one proxy, e.g. after the device reported `BadONo`.
    pub fn remove(&self, ono: ONo) {
        if let Some(object) = self.objects.write().remove(&ono) {
            object.set_state(ObjectState::Invalidated);
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::class;

    fn block() -> ClassIdentification {
        ClassIdentification::new(class::block(), 2)
    }

    #[test]
    fn test_stale_then_refresh() {
        let cache = ObjectCache::new();
        let obj = cache.upsert(100, block(), Some("OcaBlock"));
        cache.mark_all_stale();
        assert!(obj.is_stale());
        assert_eq!(cache.stale(), vec![100]);
        assert!(obj.ensure_usable().is_ok());

        let again = cache.upsert(100, block(), Some("OcaBlock"));
        assert!(Arc::ptr_eq(&obj, &again));
        assert_eq!(obj.state(), ObjectState::Valid);
        assert!(cache.stale().is_empty());
    }

    #[test]
    fn test_invalidate_clears() {
        let cache = ObjectCache::new();
        let obj = cache.upsert(4096, block(), None);
        cache.invalidate_all();
        assert!(cache.is_empty());
        assert_eq!(obj.state(), ObjectState::Invalidated);
        assert!(matches!(obj.ensure_usable(), Err(Error::ObjectInvalidated(4096))));
    }

    #[test]
    fn test_remove_single() {
        let cache = ObjectCache::new();
        let obj = cache.upsert(1, block(), None);
        cache.upsert(2, block(), None);
        cache.remove(1);
        assert_eq!(cache.len(), 1);
        assert_eq!(obj.state(), ObjectState::Invalidated);
    }
}
