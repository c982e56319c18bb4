// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `(classID, version)` registry with explicit parent fallback.
//!
//! Resolution of a class identification:
//!
//! 1. an exact `(classID, version)` entry wins;
//! 2. otherwise the last component of the class ID is stripped repeatedly,
//!    and the first ancestor with an entry of version 2 or later is used
//!    (the highest such version when several are registered).
//!
//! The device keeps factories here; the controller keeps class names.

use std::collections::HashMap;

use crate::types::{class, ClassId, ClassIdentification};

/// Map from class identification to `V`.
pub struct ClassRegistry<V> {
    entries: HashMap<ClassId, HashMap<u16, V>>,
}

impl<V> ClassRegistry<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register `value` for `ident`, replacing any previous entry.
    pub fn register(&mut self, ident: ClassIdentification, value: V) -> Option<V> {
        self.entries
            .entry(ident.class_id)
            .or_default()
            .insert(ident.class_version, value)
    }

    pub fn contains(&self, ident: &ClassIdentification) -> bool {
        self.entries
            .get(&ident.class_id)
            .is_some_and(|versions| versions.contains_key(&ident.class_version))
    }

    /// Resolve `ident`, returning the matched identification and its value.
    pub fn resolve(&self, ident: &ClassIdentification) -> Option<(ClassIdentification, &V)> {
        if let Some(value) = self
            .entries
            .get(&ident.class_id)
            .and_then(|versions| versions.get(&ident.class_version))
        {
            return Some((ident.clone(), value));
        }

        let mut current = ident.class_id.parent();
        while let Some(class_id) = current {
            if let Some(versions) = self.entries.get(&class_id) {
                if let Some((&version, value)) = versions
                    .iter()
                    .filter(|(&version, _)| version >= 2)
                    .max_by_key(|(&version, _)| version)
                {
                    return Some((ClassIdentification::new(class_id, version), value));
                }
            }
            current = class_id.parent();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for ClassRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry<&'static str> {
    /// Names of the classes the core itself knows about.
    pub fn standard_names() -> Self {
        let mut registry = Self::new();
        registry.register(ClassIdentification::new(class::root(), 2), "OcaRoot");
        registry.register(ClassIdentification::new(class::worker(), 2), "OcaWorker");
        registry.register(ClassIdentification::new(class::block(), 2), "OcaBlock");
        registry.register(ClassIdentification::new(class::manager(), 2), "OcaManager");
        registry.register(
            ClassIdentification::new(class::subscription_manager(), 2),
            "OcaSubscriptionManager",
        );
        registry
    }
}
