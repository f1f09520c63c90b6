//! KEM and signature primitives behind two small trait boundaries.
//!
//! The handshake engine never names a concrete algorithm; it asks the suite
//! registry for a `kem_id`/`sig_id` pair and gets back a `Box<dyn Kem>` /
//! `Box<dyn Signer>` / `Box<dyn Verifier>`. Swapping ML-KEM-768 for
//! ML-KEM-1024, or a future real ML-DSA crate in for the Ed25519
//! substitution below, never touches the state machine.

use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PqcError {
    #[error("KEM encapsulation failed")]
    EncapsulationFailed,
    #[error("KEM decapsulation failed")]
    DecapsulationFailed,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("malformed key or ciphertext bytes")]
    MalformedInput,
}

/// A key encapsulation mechanism, keyed by the NIST level it targets.
pub trait Kem: Send + Sync {
    fn generate_keypair(&self) -> (Vec<u8>, Vec<u8>);
    fn encapsulate(&self, encapsulation_key: &[u8]) -> Result<(Vec<u8>, [u8; 32]), PqcError>;
    fn decapsulate(&self, decapsulation_key: &[u8], ciphertext: &[u8]) -> Result<[u8; 32], PqcError>;
}

pub trait Signer: Send + Sync {
    fn sign(&self, message: &[u8]) -> Vec<u8>;
    fn public_key_bytes(&self) -> Vec<u8>;
}

pub trait Verifier: Send + Sync {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), PqcError>;
}

pub mod kem {
    use super::*;
    use ml_kem::kem::{Decapsulate, Encapsulate};
    use ml_kem::{EncodedSizeUser, KemCore, MlKem1024, MlKem512, MlKem768};

    macro_rules! mlkem_backend {
        ($name:ident, $scheme:ty) => {
            pub struct $name;

            impl Kem for $name {
                fn generate_keypair(&self) -> (Vec<u8>, Vec<u8>) {
                    let (dk, ek) = <$scheme>::generate(&mut OsRng);
                    (dk.as_bytes().to_vec(), ek.as_bytes().to_vec())
                }

                fn encapsulate(&self, encapsulation_key: &[u8]) -> Result<(Vec<u8>, [u8; 32]), PqcError> {
                    let ek = <$scheme as KemCore>::EncapsulationKey::from_bytes(
                        encapsulation_key.try_into().map_err(|_| PqcError::MalformedInput)?,
                    );
                    let (ciphertext, shared_secret) =
                        ek.encapsulate(&mut OsRng).map_err(|_| PqcError::EncapsulationFailed)?;
                    let mut secret = [0u8; 32];
                    secret.copy_from_slice(&shared_secret);
                    Ok((ciphertext.to_vec(), secret))
                }

                fn decapsulate(&self, decapsulation_key: &[u8], ciphertext: &[u8]) -> Result<[u8; 32], PqcError> {
                    let dk = <$scheme as KemCore>::DecapsulationKey::from_bytes(
                        decapsulation_key.try_into().map_err(|_| PqcError::MalformedInput)?,
                    );
                    let ct = ciphertext.try_into().map_err(|_| PqcError::MalformedInput)?;
                    let shared_secret = dk.decapsulate(&ct).map_err(|_| PqcError::DecapsulationFailed)?;
                    let mut secret = [0u8; 32];
                    secret.copy_from_slice(&shared_secret);
                    Ok(secret)
                }
            }
        };
    }

    mlkem_backend!(MlKem512Backend, MlKem512);
    mlkem_backend!(MlKem768Backend, MlKem768);
    mlkem_backend!(MlKem1024Backend, MlKem1024);

    /// Resolve a suite's `kem_param` byte to a concrete backend. `kem_param`
    /// carries the NIST category (1/3/5), matching the `suites` registry.
    pub fn backend_for_param(kem_param: u8) -> Option<Box<dyn Kem>> {
        match kem_param {
            1 => Some(Box::new(MlKem512Backend)),
            3 => Some(Box::new(MlKem768Backend)),
            5 => Some(Box::new(MlKem1024Backend)),
            _ => None,
        }
    }
}

/// ML-DSA-shaped signing slot. No published Rust ML-DSA (FIPS 204) crate
/// was available anywhere in the reference corpus, so this slot is backed
/// by Ed25519 for now — the trait boundary is exactly where a real ML-DSA
/// backend would replace it without touching the handshake engine.
pub mod sig {
    use super::*;
    use ed25519_dalek::{Signature, Signer as DalekSigner, SigningKey, Verifier as DalekVerifier, VerifyingKey};

    pub struct Ed25519Signer {
        signing_key: SigningKey,
    }

    impl Ed25519Signer {
        pub fn generate() -> Self {
            Self { signing_key: SigningKey::generate(&mut OsRng) }
        }

        pub fn from_bytes(bytes: &[u8; 32]) -> Self {
            Self { signing_key: SigningKey::from_bytes(bytes) }
        }
    }

    impl Signer for Ed25519Signer {
        fn sign(&self, message: &[u8]) -> Vec<u8> {
            self.signing_key.sign(message).to_bytes().to_vec()
        }

        fn public_key_bytes(&self) -> Vec<u8> {
            self.signing_key.verifying_key().to_bytes().to_vec()
        }
    }

    pub struct Ed25519Verifier;

    impl Verifier for Ed25519Verifier {
        fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), PqcError> {
            let vk_bytes: [u8; 32] = public_key.try_into().map_err(|_| PqcError::MalformedInput)?;
            let verifying_key = VerifyingKey::from_bytes(&vk_bytes).map_err(|_| PqcError::MalformedInput)?;
            let sig_bytes: [u8; 64] = signature.try_into().map_err(|_| PqcError::MalformedInput)?;
            let signature = Signature::from_bytes(&sig_bytes);
            verifying_key
                .verify(message, &signature)
                .map_err(|_| PqcError::VerificationFailed)
        }
    }

    /// Every `sig_id`/`sig_param` pair resolves to this one backend today;
    /// the match stays explicit so adding a second backend is a one-line
    /// change here, not a silent fallthrough.
    pub fn verifier_for_param(sig_param: u8) -> Option<Ed25519Verifier> {
        match sig_param {
            1 | 3 | 5 => Some(Ed25519Verifier),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::kem::*;
    use super::sig::*;
    use super::*;

    #[test]
    fn mlkem768_encapsulate_decapsulate_agree() {
        let backend = MlKem768Backend;
        let (dk, ek) = backend.generate_keypair();
        let (ciphertext, secret_a) = backend.encapsulate(&ek).unwrap();
        let secret_b = backend.decapsulate(&dk, &ciphertext).unwrap();
        assert_eq!(secret_a, secret_b);
    }

    #[test]
    fn backend_for_unknown_param_is_none() {
        assert!(backend_for_param(9).is_none());
    }

    #[test]
    fn ed25519_sign_verify_roundtrip() {
        let signer = Ed25519Signer::generate();
        let message = b"handshake transcript";
        let signature = signer.sign(message);
        let verifier = Ed25519Verifier;
        verifier.verify(&signer.public_key_bytes(), message, &signature).unwrap();
    }

    #[test]
    fn tampered_message_fails_verification() {
        let signer = Ed25519Signer::generate();
        let signature = signer.sign(b"original");
        let verifier = Ed25519Verifier;
        let result = verifier.verify(&signer.public_key_bytes(), b"tampered", &signature);
        assert!(matches!(result, Err(PqcError::VerificationFailed)));
    }
}
