// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// OCP.1 golden vectors: byte-exact encodings of reference messages and PDUs.
//
// Each test encodes a known value, compares it against the reference bytes,
// then decodes the reference bytes and checks the value comes back.

#![allow(clippy::unreadable_literal)]

use aes70::codec::{decode, encode, Blob};
use aes70::protocol::{
    decode_pdu, encode_pdu, Command, KeepAlive, Message, Notification1, Pdu, PduType, Response,
};
use aes70::types::{class, ClassIdentification, Event, MethodId, ObjectIdentification, PROPERTY_CHANGED};
use aes70::Status;

#[test]
fn test_notification1_reference_layout() {
    let notification = Notification1 {
        notification_size: 0,
        target_ono: 0x5678,
        method_id: MethodId::new(1, 1),
        param_count: 1,
        context: Blob::default(),
        event: Event::new(0x1234, PROPERTY_CHANGED),
        event_parameters: vec![0x00, 0x04, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01],
    };
    let expected: [u8; 32] = [
        0x00, 0x00, 0x00, 0x00, // notification size
        0x00, 0x00, 0x56, 0x78, // target ONo
        0x00, 0x01, 0x00, 0x01, // method (1,1)
        0x01, // parameter count
        0x00, 0x00, // empty context
        0x00, 0x00, 0x12, 0x34, // emitter ONo
        0x00, 0x01, 0x00, 0x01, // event (1,1)
        0x00, 0x04, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01,
    ];

    assert_eq!(encode(&notification).unwrap(), expected);
    assert_eq!(decode::<Notification1>(&expected).unwrap(), notification);
}

#[test]
fn test_notification1_in_pdu_gets_sizes_patched() {
    let notification = Notification1 {
        notification_size: 0,
        target_ono: 0x5678,
        method_id: MethodId::new(1, 1),
        param_count: 1,
        context: Blob::default(),
        event: Event::new(0x1234, PROPERTY_CHANGED),
        event_parameters: vec![0x00, 0x04, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01],
    };
    let bytes = encode_pdu(
        PduType::Notification1,
        &[Message::Notification1(notification)],
    )
    .unwrap();

    // 10-byte header, then the 32-byte message with its size field set.
    assert_eq!(bytes.len(), 42);
    assert_eq!(&bytes[..10], &[0x3B, 0x00, 0x01, 0x00, 0x00, 0x00, 0x29, 0x02, 0x00, 0x01]);
    assert_eq!(&bytes[10..14], &[0x00, 0x00, 0x00, 0x20]);
    assert_eq!(&bytes[14..18], &[0x00, 0x00, 0x56, 0x78]);
}

#[test]
fn test_get_members_command_pdu() {
    let command = Command::new(7, 100, MethodId::new(3, 5), 0, Vec::new());
    let pdu = Pdu::single(Message::CommandRrq(command));
    let expected: [u8; 27] = [
        0x3B, 0x00, 0x01, // sync, version
        0x00, 0x00, 0x00, 0x1A, // PDU size (everything after sync)
        0x01, // CommandRrq
        0x00, 0x01, // one message
        0x00, 0x00, 0x00, 0x11, // command size
        0x00, 0x00, 0x00, 0x07, // handle
        0x00, 0x00, 0x00, 0x64, // target ONo 100
        0x00, 0x03, 0x00, 0x05, // method (3,5)
        0x00, // no parameters
    ];

    assert_eq!(pdu.encode().unwrap(), expected);

    let decoded = decode_pdu(&expected).unwrap();
    let Message::CommandRrq(cmd) = &decoded.messages[0] else {
        panic!("unexpected message {:?}", decoded.messages[0]);
    };
    assert_eq!(cmd.handle, 7);
    assert_eq!(cmd.command_size, 17);
    assert_eq!(cmd.method_id, MethodId::new(3, 5));
}

#[test]
fn test_get_members_response_pdu() {
    let members = vec![ObjectIdentification {
        ono: 4096,
        class_identification: ClassIdentification::new(class::block(), 2),
    }];
    let params = encode(&members).unwrap();
    let response = Response::new(7, Status::Ok, 1, params);
    let bytes = Pdu::single(Message::Response(response)).encode().unwrap();

    let expected_body: [u8; 26] = [
        0x00, 0x00, 0x00, 0x1A, // response size
        0x00, 0x00, 0x00, 0x07, // handle
        0x00, // OK
        0x01, // one parameter
        0x00, 0x01, // list of one
        0x00, 0x00, 0x10, 0x00, // ONo 4096
        0x00, 0x03, 0x00, 0x01, 0x00, 0x01, 0x00, 0x03, // class 1.1.3
        0x00, 0x02, // version 2
    ];
    assert_eq!(&bytes[10..], &expected_body);
    assert_eq!(bytes[7], PduType::Response as u8);

    let pdu = decode_pdu(&bytes).unwrap();
    let Message::Response(resp) = &pdu.messages[0] else {
        panic!("unexpected message {:?}", pdu.messages[0]);
    };
    assert_eq!(resp.response_size, 26);
    let back: Vec<ObjectIdentification> = resp.decode_params().unwrap();
    assert_eq!(back, members);
}

#[test]
fn test_status_response_pdu() {
    let bytes = Pdu::single(Message::Response(Response::status_only(3, Status::BadONo)))
        .encode()
        .unwrap();
    assert_eq!(
        bytes,
        [
            0x3B, 0x00, 0x01, 0x00, 0x00, 0x00, 0x13, 0x03, 0x00, 0x01, // header
            0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x03, 0x05, 0x00,
        ]
    );
}

#[test]
fn test_keepalive_pdus() {
    let seconds = Pdu::single(Message::KeepAlive(KeepAlive::Seconds(5)));
    assert_eq!(
        seconds.encode().unwrap(),
        [0x3B, 0x00, 0x01, 0x00, 0x00, 0x00, 0x0B, 0x04, 0x00, 0x01, 0x00, 0x05]
    );

    let millis = Pdu::single(Message::KeepAlive(KeepAlive::Milliseconds(1500)));
    let bytes = millis.encode().unwrap();
    assert_eq!(
        bytes,
        [0x3B, 0x00, 0x01, 0x00, 0x00, 0x00, 0x0D, 0x04, 0x00, 0x01, 0x00, 0x00, 0x05, 0xDC]
    );
    assert_eq!(decode_pdu(&bytes).unwrap(), millis);
}
