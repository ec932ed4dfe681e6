// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame header wire layout.

use super::*;
use crate::ProtocolError;

#[yare::parameterized(
    stdout = { FrameKind::Stdout, 0 },
    stderr = { FrameKind::Stderr, 1 },
    stdin = { FrameKind::Stdin, 2 },
    stdin_all = { FrameKind::StdinAll, 3 },
)]
fn frame_kind_wire_values_are_fixed(kind: FrameKind, wire: u16) {
    assert_eq!(kind as u16, wire);
    assert_eq!(FrameKind::from_wire(wire).unwrap(), kind);
}

#[test]
fn unknown_kind_is_rejected() {
    assert_eq!(FrameKind::from_wire(4), Err(ProtocolError::UnknownFrameKind(4)));
}

#[test]
fn header_layout_is_big_endian() {
    let hdr = FrameHeader::new(FrameKind::Stderr, 0x0102, 0x0304_0506, 0x0000_0A0B);
    let buf = hdr.encode();
    assert_eq!(buf, [0, 1, 1, 2, 3, 4, 5, 6, 0, 0, 0x0A, 0x0B]);
}

#[test]
fn decode_is_inverse_of_encode() {
    let hdr = FrameHeader::new(FrameKind::Stdin, 3, 12, 512);
    assert_eq!(FrameHeader::decode(&hdr.encode()).unwrap(), hdr);
}

#[test]
fn zero_length_is_eof() {
    let hdr = FrameHeader::eof(FrameKind::Stdout, 1, 1);
    assert!(hdr.is_eof());
    let decoded = FrameHeader::decode(&hdr.encode()).unwrap();
    assert!(decoded.is_eof());
}

#[test]
fn short_buffer_is_truncated_error() {
    assert_eq!(
        FrameHeader::decode(&[0u8; 5]),
        Err(ProtocolError::Truncated { need: FRAME_HEADER_LEN, got: 5 })
    );
}

#[test]
fn oversize_payload_is_rejected() {
    let mut buf = FrameHeader::new(FrameKind::Stdout, 0, 0, 1).encode();
    let bad = (MAX_PAYLOAD as u32 + 1).to_be_bytes();
    buf[8..12].copy_from_slice(&bad);
    assert!(matches!(FrameHeader::decode(&buf), Err(ProtocolError::Oversize(_))));
}

#[test]
fn max_payload_is_accepted() {
    let hdr = FrameHeader::new(FrameKind::Stdout, 0, 0, MAX_PAYLOAD as u32);
    assert_eq!(FrameHeader::decode(&hdr.encode()).unwrap(), hdr);
}

#[test]
fn input_kinds_are_flagged() {
    assert!(FrameKind::Stdin.is_input());
    assert!(FrameKind::StdinAll.is_input());
    assert!(!FrameKind::Stdout.is_input());
    assert!(!FrameKind::Stderr.is_input());
}
