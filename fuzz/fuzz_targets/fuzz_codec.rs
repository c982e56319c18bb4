// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use aes70::codec::{decode, Blob};
use aes70::protocol::{Notification1, Notification2, Response};
use aes70::types::{
    AddPropertyChangeSubscriptionParams, AddSubscriptionParams, BlockMember, ClassIdentification,
    ObjectIdentification, Subscription2Params,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Primitives with length prefixes
    let _ = decode::<String>(data);
    let _ = decode::<Blob>(data);
    let _ = decode::<Vec<u16>>(data);

    // Structured values
    let _ = decode::<ClassIdentification>(data);
    let _ = decode::<Vec<ObjectIdentification>>(data);
    let _ = decode::<Vec<BlockMember>>(data);
    let _ = decode::<AddSubscriptionParams>(data);
    let _ = decode::<AddPropertyChangeSubscriptionParams>(data);
    let _ = decode::<Subscription2Params>(data);

    // Message bodies
    let _ = decode::<Response>(data);
    let _ = decode::<Notification1>(data);
    let _ = decode::<Notification2>(data);
});
