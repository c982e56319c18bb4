// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-class method tables.
//!
//! A class builds one [`DispatchTable`] mapping method IDs to handlers and
//! forwards [`OcaObject::handle_command`](super::OcaObject::handle_command)
//! and [`OcaObject::method_kind`](super::OcaObject::method_kind) to it.
//! Getters encode their return value as a single parameter; setters decode
//! their argument from the command parameters.

use std::collections::HashMap;

use crate::codec::{Decode, Encode};
use crate::protocol::{Command, Parameters};
use crate::types::{MethodId, Status};

use super::object::{CommandContext, MethodKind};

type Handler<T> =
    Box<dyn Fn(&T, &Command, &CommandContext<'_>) -> Result<Parameters, Status> + Send + Sync>;

struct Entry<T> {
    kind: MethodKind,
    handler: Handler<T>,
}

/// Method table of class `T`.
pub struct DispatchTable<T> {
    methods: HashMap<MethodId, Entry<T>>,
}

impl<T> DispatchTable<T> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Method without arguments returning one value.
    pub fn getter<R, F>(mut self, method: MethodId, f: F) -> Self
    where
        R: Encode + 'static,
        F: Fn(&T, &CommandContext<'_>) -> Result<R, Status> + Send + Sync + 'static,
    {
        let handler: Handler<T> = Box::new(move |object, _command, ctx| {
            let value = f(object, ctx)?;
            Parameters::encode(&(value,)).map_err(|_| Status::ProcessingFailed)
        });
        self.methods.insert(
            method,
            Entry {
                kind: MethodKind::Getter,
                handler,
            },
        );
        self
    }

    /// Method taking the decoded parameters and returning nothing.
    pub fn setter<V, F>(mut self, method: MethodId, f: F) -> Self
    where
        V: Decode + 'static,
        F: Fn(&T, V, &CommandContext<'_>) -> Result<(), Status> + Send + Sync + 'static,
    {
        let handler: Handler<T> = Box::new(move |object, command, ctx| {
            let value = command
                .decode_params::<V>()
                .map_err(|_| Status::BadFormat)?;
            f(object, value, ctx)?;
            Ok(Parameters::empty())
        });
        self.methods.insert(
            method,
            Entry {
                kind: MethodKind::Setter,
                handler,
            },
        );
        self
    }

    /// Method with full access to the command.
    pub fn action<F>(mut self, method: MethodId, f: F) -> Self
    where
        F: Fn(&T, &Command, &CommandContext<'_>) -> Result<Parameters, Status>
            + Send
            + Sync
            + 'static,
    {
        self.methods.insert(
            method,
            Entry {
                kind: MethodKind::Action,
                handler: Box::new(f),
            },
        );
        self
    }

    pub fn kind(&self, method: MethodId) -> Option<MethodKind> {
        self.methods.get(&method).map(|e| e.kind)
    }

    pub fn contains(&self, method: MethodId) -> bool {
        self.methods.contains_key(&method)
    }

    /// Invoke the handler for the command's method; unknown methods fail
    /// with `BadMethod`.
    pub fn dispatch(
        &self,
        object: &T,
        command: &Command,
        ctx: &CommandContext<'_>,
    ) -> Result<Parameters, Status> {
        match self.methods.get(&command.method_id) {
            Some(entry) => (entry.handler)(object, command, ctx),
            None => Err(Status::BadMethod),
        }
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl<T> Default for DispatchTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
