//! HKDF-SHA256 key schedule: one extract, three expands.
//!
//! The transcript hash accumulated over the handshake messages salts the
//! extract step, binding the derived keys to exactly that handshake. Three
//! independent expands (distinct `info` labels) then produce the
//! client-to-server key, the server-to-client key, and the 8-byte session
//! ID — never reusing one expand's output as another's input.

use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const AEAD_KEY_LEN: usize = 32;
pub const SESSION_ID_LEN: usize = 8;

const INFO_PREFIX: &str = "pqc-proxy v1|";
const INFO_SUFFIX_C2S: &str = "|c2s";
const INFO_SUFFIX_S2C: &str = "|s2c";
const INFO_SUFFIX_SESSION_ID: &str = "|sid";

#[derive(Debug, Error)]
pub enum KdfError {
    #[error("HKDF expand failed for label {0}")]
    ExpandFailed(&'static str),
}

/// Epoch key material. Zeroized on drop; never implements `Debug`/`Clone`
/// so it cannot accidentally end up in a log line or a second live copy.
#[derive(ZeroizeOnDrop)]
pub struct EpochKeys {
    pub client_send_key: [u8; AEAD_KEY_LEN],
    pub server_send_key: [u8; AEAD_KEY_LEN],
    #[zeroize(skip)]
    pub session_id: [u8; SESSION_ID_LEN],
}

/// Derive a fresh `EpochKeys` from the KEM shared secret and the
/// accumulated transcript hash, tagged with the negotiated suite's ID so
/// two different suites never collide on key material even given the same
/// shared secret (which cannot happen, but the tag costs nothing).
pub fn derive(shared_secret: &[u8], transcript_hash: &[u8], suite_tag: &str) -> Result<EpochKeys, KdfError> {
    let hk = Hkdf::<Sha256>::new(Some(transcript_hash), shared_secret);

    let mut client_send_key = [0u8; AEAD_KEY_LEN];
    let c2s_info = labeled_info(suite_tag, INFO_SUFFIX_C2S);
    hk.expand(&c2s_info, &mut client_send_key)
        .map_err(|_| KdfError::ExpandFailed("c2s"))?;

    let mut server_send_key = [0u8; AEAD_KEY_LEN];
    let s2c_info = labeled_info(suite_tag, INFO_SUFFIX_S2C);
    hk.expand(&s2c_info, &mut server_send_key)
        .map_err(|_| KdfError::ExpandFailed("s2c"))?;

    let mut session_id = [0u8; SESSION_ID_LEN];
    let sid_info = labeled_info(suite_tag, INFO_SUFFIX_SESSION_ID);
    hk.expand(&sid_info, &mut session_id)
        .map_err(|_| KdfError::ExpandFailed("session_id"))?;

    Ok(EpochKeys { client_send_key, server_send_key, session_id })
}

/// `"pqc-proxy v1|" + suite_tag + suffix`, e.g. `|c2s`/`|s2c`/`|sid`.
fn labeled_info(suite_tag: &str, suffix: &str) -> Vec<u8> {
    let mut info = String::with_capacity(INFO_PREFIX.len() + suite_tag.len() + suffix.len());
    info.push_str(INFO_PREFIX);
    info.push_str(suite_tag);
    info.push_str(suffix);
    info.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let secret = [7u8; 32];
        let transcript = [9u8; 32];
        let a = derive(&secret, &transcript, "cs-mlkem768-aesgcm-mldsa65").unwrap();
        let b = derive(&secret, &transcript, "cs-mlkem768-aesgcm-mldsa65").unwrap();
        assert_eq!(a.client_send_key, b.client_send_key);
        assert_eq!(a.server_send_key, b.server_send_key);
        assert_eq!(a.session_id, b.session_id);
    }

    #[test]
    fn client_and_server_keys_differ() {
        let secret = [1u8; 32];
        let transcript = [2u8; 32];
        let k = derive(&secret, &transcript, "cs-mlkem512-aesgcm-mldsa44").unwrap();
        assert_ne!(k.client_send_key, k.server_send_key);
    }

    #[test]
    fn different_transcripts_produce_different_keys() {
        let secret = [3u8; 32];
        let k1 = derive(&secret, &[1u8; 32], "cs-mlkem512-aesgcm-mldsa44").unwrap();
        let k2 = derive(&secret, &[2u8; 32], "cs-mlkem512-aesgcm-mldsa44").unwrap();
        assert_ne!(k1.client_send_key, k2.client_send_key);
    }

    #[test]
    fn different_suite_tags_produce_different_keys() {
        let secret = [4u8; 32];
        let transcript = [5u8; 32];
        let k1 = derive(&secret, &transcript, "cs-mlkem512-aesgcm-mldsa44").unwrap();
        let k2 = derive(&secret, &transcript, "cs-mlkem512-chacha20poly1305-mldsa44").unwrap();
        assert_ne!(k1.client_send_key, k2.client_send_key);
    }
}
