// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `OcaBlock` member listing, used for the root block at ONo 100.

use std::sync::OnceLock;

use crate::protocol::constants::block;
use crate::protocol::{Command, Parameters};
use crate::types::{class, ClassIdentification, MethodId, Status};

use super::dispatch::DispatchTable;
use super::object::{CommandContext, MethodKind, OcaObject};

/// A container object. Its members are the objects registered with it as
/// container.
pub struct Block {
    role: String,
}

impl Block {
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }

    /// The device's root block.
    pub fn root() -> Self {
        Self::new("Root")
    }

    fn dispatch_table() -> &'static DispatchTable<Block> {
        static TABLE: OnceLock<DispatchTable<Block>> = OnceLock::new();
        TABLE.get_or_init(|| {
            DispatchTable::new()
                .getter(block::GET_MEMBERS, |_: &Block, ctx| {
                    Ok(ctx.device.registry().members(ctx.ono))
                })
                .getter(block::GET_MEMBERS_RECURSIVE, |_: &Block, ctx| {
                    Ok(ctx.device.registry().members_recursive(ctx.ono))
                })
        })
    }
}

impl OcaObject for Block {
    fn class_identification(&self) -> ClassIdentification {
        ClassIdentification::new(class::block(), 2)
    }

    fn role(&self) -> String {
        self.role.clone()
    }

    fn method_kind(&self, method: MethodId) -> MethodKind {
        Self::dispatch_table()
            .kind(method)
            .unwrap_or(MethodKind::Action)
    }

    fn handle_command(
        &self,
        command: &Command,
        ctx: &CommandContext<'_>,
    ) -> Result<Parameters, Status> {
        Self::dispatch_table().dispatch(self, command, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::device::{Device, DeviceConfig};
    use crate::types::{ono, BlockMember, ObjectIdentification};
    use std::sync::Arc;

    #[test]
    fn test_root_members_include_managers_and_children() {
        let device = Device::new(DeviceConfig::default()).unwrap();
        let sub_block = device.add_object(Arc::new(Block::new("Inputs"))).unwrap();
        device
            .register_object_in(sub_block + 1, Arc::new(Block::new("Ch1")), sub_block)
            .unwrap();

        let ctx = CommandContext {
            ono: ono::ROOT_BLOCK,
            controller: 1,
            device: &device,
        };
        let root = device.registry().resolve(ono::ROOT_BLOCK).unwrap();
        let get = Command::new(1, ono::ROOT_BLOCK, block::GET_MEMBERS, 0, Vec::new());
        let params = root.handle_command(&get, &ctx).unwrap();
        assert_eq!(params.count, 1);
        let members: Vec<ObjectIdentification> = decode(&params.bytes).unwrap();
        let onos: Vec<u32> = members.iter().map(|m| m.ono).collect();
        assert_eq!(onos, vec![ono::SUBSCRIPTION_MANAGER, sub_block]);

        let get = Command::new(2, ono::ROOT_BLOCK, block::GET_MEMBERS_RECURSIVE, 0, Vec::new());
        let params = root.handle_command(&get, &ctx).unwrap();
        let all: Vec<BlockMember> = decode(&params.bytes).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].container, sub_block);
    }

    #[test]
    fn test_getters_are_reads() {
        let block = Block::root();
        assert_eq!(block.method_kind(block::GET_MEMBERS), MethodKind::Getter);
        assert_eq!(block.role(), "Root");
    }
}
