// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use aes70::protocol::{decode_pdu, PduHeader};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Header parser on its own
    let _ = PduHeader::parse(data);

    // Whole-PDU decoder; anything it accepts must re-encode and decode the same
    if let Ok(pdu) = decode_pdu(data) {
        let bytes = pdu.encode().expect("decoded PDU re-encodes");
        let again = decode_pdu(&bytes).expect("re-encoded PDU decodes");
        assert_eq!(pdu.messages.len(), again.messages.len());
        assert_eq!(pdu.pdu_type, again.pdu_type);
    }
});
