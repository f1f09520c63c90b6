//! The 22-byte wire header shared by every AEAD-framed datagram.
//!
//! Layout (network byte order, no padding):
//! `version(1) kem_id(1) kem_param(1) sig_id(1) sig_param(1) session_id(8) seq(8) epoch(1)`.
//! The packed bytes double as AEAD associated data — `pack` and the AAD a
//! `Sender`/`Receiver` authenticates must always be the same slice.

use thiserror::Error;

pub const HEADER_LEN: usize = 22;
pub const WIRE_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub kem_id: u8,
    pub kem_param: u8,
    pub sig_id: u8,
    pub sig_param: u8,
    pub session_id: [u8; 8],
    pub seq: u64,
    pub epoch: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("header buffer too short: got {0} bytes, need {HEADER_LEN}")]
    TooShort(usize),
    #[error("unsupported wire version: {0}")]
    BadVersion(u8),
}

impl Header {
    pub fn pack(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.version;
        buf[1] = self.kem_id;
        buf[2] = self.kem_param;
        buf[3] = self.sig_id;
        buf[4] = self.sig_param;
        buf[5..13].copy_from_slice(&self.session_id);
        buf[13..21].copy_from_slice(&self.seq.to_be_bytes());
        buf[21] = self.epoch;
        buf
    }

    /// Unpack without enforcing `version == WIRE_VERSION` — callers that
    /// need strict version enforcement should use `unpack_checked`.
    pub fn unpack(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::TooShort(buf.len()));
        }
        let mut session_id = [0u8; 8];
        session_id.copy_from_slice(&buf[5..13]);
        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&buf[13..21]);
        Ok(Header {
            version: buf[0],
            kem_id: buf[1],
            kem_param: buf[2],
            sig_id: buf[3],
            sig_param: buf[4],
            session_id,
            seq: u64::from_be_bytes(seq_bytes),
            epoch: buf[21],
        })
    }

    pub fn unpack_checked(buf: &[u8]) -> Result<Self, DecodeError> {
        let header = Self::unpack(buf)?;
        if header.version != WIRE_VERSION {
            return Err(DecodeError::BadVersion(header.version));
        }
        Ok(header)
    }

    /// The deterministic 12-byte AEAD nonce: `seq` encoded big-endian,
    /// zero-padded on the left. Derivable from the header alone, but the
    /// nonce is still carried on the wire inside `seq` for wire-compat
    /// reasons (see design notes) rather than recomputed implicitly.
    pub fn nonce(&self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[4..12].copy_from_slice(&self.seq.to_be_bytes());
        nonce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        Header {
            version: WIRE_VERSION,
            kem_id: 1,
            kem_param: 3,
            sig_id: 1,
            sig_param: 3,
            session_id: [1, 2, 3, 4, 5, 6, 7, 8],
            seq: 42,
            epoch: 0,
        }
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let h = sample();
        let packed = h.pack();
        assert_eq!(packed.len(), HEADER_LEN);
        let unpacked = Header::unpack(&packed).unwrap();
        assert_eq!(h, unpacked);
    }

    #[test]
    fn too_short_buffer_is_rejected() {
        let err = Header::unpack(&[0u8; 10]).unwrap_err();
        assert_eq!(err, DecodeError::TooShort(10));
    }

    #[test]
    fn bad_version_rejected_only_by_checked_path() {
        let mut h = sample();
        h.version = 9;
        let packed = h.pack();
        assert!(Header::unpack(&packed).is_ok());
        assert_eq!(Header::unpack_checked(&packed).unwrap_err(), DecodeError::BadVersion(9));
    }

    #[test]
    fn nonce_is_seq_big_endian_zero_padded() {
        let h = sample();
        let nonce = h.nonce();
        assert_eq!(&nonce[0..4], &[0, 0, 0, 0]);
        assert_eq!(u64::from_be_bytes(nonce[4..12].try_into().unwrap()), 42);
    }

    #[test]
    fn header_is_exactly_22_bytes() {
        assert_eq!(sample().pack().len(), 22);
    }
}
