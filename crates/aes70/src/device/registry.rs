// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Object registry: the single owner of a device's objects.
//!
//! Mutations (register, deregister, lock) take the write guard; dispatch
//! takes the read guard only long enough to clone the object handle out.
//! Object numbers are unique for the registry's lifetime: a number handed
//! out by [`ObjectRegistry::allocate`] is never handed out again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::class_registry::ClassRegistry;
use crate::error::{Error, Result};
use crate::types::{
    ono, BlockMember, ClassIdentification, LockState, ObjectIdentification, ONo, Status,
};

use super::object::{ControllerId, MethodKind, ObjectFactory, OcaObject};

struct Entry {
    object: Arc<dyn OcaObject>,
    container: Option<ONo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Lock {
    controller: ControllerId,
    state: LockState,
}

/// Objects of one device, their locks and the class factories.
pub struct ObjectRegistry {
    objects: RwLock<HashMap<ONo, Entry>>,
    locks: Mutex<HashMap<ONo, Lock>>,
    next_ono: Mutex<ONo>,
    classes: RwLock<ClassRegistry<ObjectFactory>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            next_ono: Mutex::new(ono::FIRST_DYNAMIC),
            classes: RwLock::new(ClassRegistry::new()),
        }
    }

    /// Reserve a fresh dynamic object number.
    pub fn allocate(&self) -> ONo {
        let objects = self.objects.read();
        let mut next = self.next_ono.lock();
        while objects.contains_key(&*next) {
            *next = next.wrapping_add(1).max(ono::FIRST_DYNAMIC);
        }
        let allocated = *next;
        *next = next.wrapping_add(1).max(ono::FIRST_DYNAMIC);
        allocated
    }

    /// Register `object` at `ono`, as a member of `container` if given.
    pub fn register(
        &self,
        ono: ONo,
        object: Arc<dyn OcaObject>,
        container: Option<ONo>,
    ) -> Result<()> {
        if ono == ono::INVALID {
            return Err(Error::InvalidObjectNumber);
        }
        let mut objects = self.objects.write();
        if objects.contains_key(&ono) {
            return Err(Error::DuplicateObject(ono));
        }
        debug!(ono, class = %object.class_identification(), "object registered");
        objects.insert(ono, Entry { object, container });
        Ok(())
    }

    /// Register `object` at a freshly allocated number.
    pub fn register_dynamic(
        &self,
        object: Arc<dyn OcaObject>,
        container: Option<ONo>,
    ) -> Result<ONo> {
        let ono = self.allocate();
        self.register(ono, object, container)?;
        Ok(ono)
    }

    /// Remove `ono` and its lock.
    pub fn deregister(&self, ono: ONo) -> Result<Arc<dyn OcaObject>> {
        let entry = self
            .objects
            .write()
            .remove(&ono)
            .ok_or(Error::UnknownObject(ono))?;
        self.locks.lock().remove(&ono);
        debug!(ono, "object deregistered");
        Ok(entry.object)
    }

    pub fn resolve(&self, ono: ONo) -> Option<Arc<dyn OcaObject>> {
        self.objects.read().get(&ono).map(|e| Arc::clone(&e.object))
    }

    pub fn contains(&self, ono: ONo) -> bool {
        self.objects.read().contains_key(&ono)
    }

    /// Objects registered with `container`, ordered by object number.
    pub fn members(&self, container: ONo) -> Vec<ObjectIdentification> {
        let mut members: Vec<ObjectIdentification> = self
            .objects
            .read()
            .iter()
            .filter(|(_, e)| e.container == Some(container))
            .map(|(&ono, e)| ObjectIdentification {
                ono,
                class_identification: e.object.class_identification(),
            })
            .collect();
        members.sort_by_key(|m| m.ono);
        members
    }

    /// Members of `container` and of every block below it, depth first.
    pub fn members_recursive(&self, container: ONo) -> Vec<BlockMember> {
        let mut out = Vec::new();
        let mut visited = HashSet::from([container]);
        let mut stack = vec![container];
        while let Some(block) = stack.pop() {
            let members = self.members(block);
            for member in members.iter().rev() {
                if visited.insert(member.ono) {
                    stack.push(member.ono);
                }
            }
            out.extend(members.into_iter().map(|member| BlockMember {
                member,
                container: block,
            }));
        }
        out
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Classes
    // ------------------------------------------------------------------

    pub fn register_class(&self, ident: ClassIdentification, factory: ObjectFactory) {
        self.classes.write().register(ident, factory);
    }

    /// Build an object of class `ident` (or its closest registered
    /// ancestor) and register it at a fresh number.
    pub fn construct(
        &self,
        ident: &ClassIdentification,
        role: &str,
        container: Option<ONo>,
    ) -> Result<ONo> {
        let factory = {
            let classes = self.classes.read();
            let (matched, factory) = classes
                .resolve(ident)
                .ok_or_else(|| Error::UnknownClass(ident.clone()))?;
            if &matched != ident {
                debug!(requested = %ident, using = %matched, "class resolved through ancestor");
            }
            Arc::clone(factory)
        };
        self.register_dynamic(factory(role), container)
    }

    // ------------------------------------------------------------------
    // Locks
    // ------------------------------------------------------------------

    /// Take or change `controller`'s lock on `ono`.
    pub fn lock(&self, ono: ONo, controller: ControllerId, state: LockState) -> std::result::Result<(), Status> {
        let mut locks = self.locks.lock();
        match locks.get(&ono) {
            Some(lock) if lock.controller != controller => Err(Status::Locked),
            _ => {
                if state == LockState::NoLock {
                    locks.remove(&ono);
                } else {
                    locks.insert(ono, Lock { controller, state });
                }
                Ok(())
            }
        }
    }

    /// Release `controller`'s lock on `ono`.
    pub fn unlock(&self, ono: ONo, controller: ControllerId) -> std::result::Result<(), Status> {
        let mut locks = self.locks.lock();
        match locks.get(&ono) {
            Some(lock) if lock.controller == controller => {
                locks.remove(&ono);
                Ok(())
            }
            Some(_) => Err(Status::Locked),
            None => Err(Status::InvalidRequest),
        }
    }

    pub fn lock_state(&self, ono: ONo) -> LockState {
        self.locks
            .lock()
            .get(&ono)
            .map_or(LockState::NoLock, |l| l.state)
    }

    /// Whether `controller` may invoke a method of `kind` on `ono`.
    pub fn check_access(
        &self,
        ono: ONo,
        controller: ControllerId,
        kind: MethodKind,
    ) -> std::result::Result<(), Status> {
        match self.locks.lock().get(&ono) {
            Some(lock) if lock.controller != controller => match lock.state {
                LockState::LockNoReadWrite => Err(Status::Locked),
                LockState::LockNoWrite if kind != MethodKind::Getter => Err(Status::Locked),
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Drop every lock held by `controller`. Returns how many were held.
    pub fn release_controller(&self, controller: ControllerId) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, lock| lock.controller != controller);
        before - locks.len()
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::object::CommandContext;
    use crate::protocol::{Command, Parameters};
    use crate::types::class;

    struct Dummy(&'static str);

    impl OcaObject for Dummy {
        fn class_identification(&self) -> ClassIdentification {
            ClassIdentification::new(class::worker(), 2)
        }

        fn role(&self) -> String {
            self.0.to_string()
        }

        fn handle_command(&self, _: &Command, _: &CommandContext<'_>) -> std::result::Result<Parameters, Status> {
            Err(Status::NotImplemented)
        }
    }

    fn dummy() -> Arc<dyn OcaObject> {
        Arc::new(Dummy("dummy"))
    }

    #[test]
    fn test_register_resolve_deregister() {
        let reg = ObjectRegistry::new();
        reg.register(5000, dummy(), Some(ono::ROOT_BLOCK)).unwrap();
        assert!(reg.resolve(5000).is_some());
        assert!(matches!(
            reg.register(5000, dummy(), None),
            Err(Error::DuplicateObject(5000))
        ));
        assert!(matches!(reg.register(0, dummy(), None), Err(Error::InvalidObjectNumber)));
        reg.deregister(5000).unwrap();
        assert!(reg.resolve(5000).is_none());
        assert!(matches!(reg.deregister(5000), Err(Error::UnknownObject(5000))));
    }

    #[test]
    fn test_allocation_skips_taken_numbers() {
        let reg = ObjectRegistry::new();
        reg.register(ono::FIRST_DYNAMIC, dummy(), None).unwrap();
        let a = reg.register_dynamic(dummy(), None).unwrap();
        let b = reg.register_dynamic(dummy(), None).unwrap();
        assert_eq!(a, ono::FIRST_DYNAMIC + 1);
        assert_eq!(b, ono::FIRST_DYNAMIC + 2);

        // Numbers are not reused after deregistration.
        reg.deregister(a).unwrap();
        assert_eq!(reg.allocate(), ono::FIRST_DYNAMIC + 3);
    }

    #[test]
    fn test_members_by_container() {
        let reg = ObjectRegistry::new();
        reg.register(4097, dummy(), Some(ono::ROOT_BLOCK)).unwrap();
        reg.register(4096, dummy(), Some(ono::ROOT_BLOCK)).unwrap();
        reg.register(4098, dummy(), Some(4096)).unwrap();
        let members: Vec<ONo> = reg.members(ono::ROOT_BLOCK).iter().map(|m| m.ono).collect();
        assert_eq!(members, vec![4096, 4097]);
        assert_eq!(reg.members(4096).len(), 1);

        let all: Vec<(ONo, ONo)> = reg
            .members_recursive(ono::ROOT_BLOCK)
            .iter()
            .map(|m| (m.member.ono, m.container))
            .collect();
        assert!(all.contains(&(4098, 4096)));
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_lock_rules() {
        let reg = ObjectRegistry::new();
        reg.register(4096, dummy(), None).unwrap();

        reg.lock(4096, 1, LockState::LockNoWrite).unwrap();
        assert_eq!(reg.lock(4096, 2, LockState::LockNoReadWrite), Err(Status::Locked));
        assert!(reg.check_access(4096, 2, MethodKind::Getter).is_ok());
        assert_eq!(reg.check_access(4096, 2, MethodKind::Setter), Err(Status::Locked));
        assert!(reg.check_access(4096, 1, MethodKind::Setter).is_ok());

        reg.lock(4096, 1, LockState::LockNoReadWrite).unwrap();
        assert_eq!(reg.check_access(4096, 2, MethodKind::Getter), Err(Status::Locked));
        assert_eq!(reg.unlock(4096, 2), Err(Status::Locked));

        assert_eq!(reg.release_controller(1), 1);
        assert_eq!(reg.lock_state(4096), LockState::NoLock);
        assert_eq!(reg.unlock(4096, 1), Err(Status::InvalidRequest));
    }

    #[test]
    fn test_construct_through_ancestor() {
        let reg = ObjectRegistry::new();
        reg.register_class(
            ClassIdentification::new(class::worker(), 2),
            Arc::new(|role: &str| -> Arc<dyn OcaObject> {
                Arc::new(Dummy(if role == "gain" { "gain" } else { "other" }))
            }),
        );
        let vendor = ClassIdentification::new("1.1.1.65535.1".parse().unwrap(), 1);
        let ono = reg.construct(&vendor, "gain", Some(ono::ROOT_BLOCK)).unwrap();
        assert_eq!(reg.resolve(ono).unwrap().role(), "gain");

        let unknown = ClassIdentification::new("2.7".parse().unwrap(), 1);
        assert!(matches!(
            reg.construct(&unknown, "x", None),
            Err(Error::UnknownClass(_))
        ));
    }
}
