// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session header: written once per new client connection, before any
//! framed message. A receiver that does not recognize the signature must
//! disconnect.

use crate::ProtocolError;

/// Length of the shared authentication signature.
pub const SIGNATURE_LEN: usize = stepd_core::AUTH_SIG_LEN;

/// Encoded size of the session header.
pub const SESSION_HEADER_LEN: usize = SIGNATURE_LEN + 4;

/// Per-connection preamble: authentication signature plus the sending
/// node's index within the step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub signature: [u8; SIGNATURE_LEN],
    pub node_index: u32,
}

impl SessionHeader {
    /// Build a header from a key of exactly [`SIGNATURE_LEN`] bytes.
    pub fn new(key: &[u8], node_index: u32) -> Result<Self, ProtocolError> {
        if key.len() != SIGNATURE_LEN {
            return Err(ProtocolError::BadKeyLength { expected: SIGNATURE_LEN, got: key.len() });
        }
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(key);
        Ok(Self { signature, node_index })
    }

    pub fn encode(&self) -> [u8; SESSION_HEADER_LEN] {
        let mut buf = [0u8; SESSION_HEADER_LEN];
        buf[..SIGNATURE_LEN].copy_from_slice(&self.signature);
        buf[SIGNATURE_LEN..].copy_from_slice(&self.node_index.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < SESSION_HEADER_LEN {
            return Err(ProtocolError::Truncated { need: SESSION_HEADER_LEN, got: buf.len() });
        }
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&buf[..SIGNATURE_LEN]);
        let node_index = u32::from_be_bytes([
            buf[SIGNATURE_LEN],
            buf[SIGNATURE_LEN + 1],
            buf[SIGNATURE_LEN + 2],
            buf[SIGNATURE_LEN + 3],
        ]);
        Ok(Self { signature, node_index })
    }

    /// Check the signature against the expected shared key.
    pub fn verify(&self, expected: &[u8]) -> Result<(), ProtocolError> {
        if expected.len() != SIGNATURE_LEN || self.signature[..] != expected[..] {
            return Err(ProtocolError::BadSignature);
        }
        Ok(())
    }
}
