//! Immutable catalog of cipher suites understood by the proxy core.
//!
//! A suite binds a KEM, a signature mechanism, an AEAD, and the KDF (always
//! HKDF-SHA256) to one canonical `suite_id` string and to the 4 header bytes
//! (`kem_id`, `kem_param`, `sig_id`, `sig_param`) that travel on the wire.
//! Two suites may share those 4 bytes only when they differ solely in AEAD
//! choice — the header never encodes which AEAD was negotiated, only which
//! KEM/signature pair was.

use std::collections::HashMap;
use thiserror::Error;

/// NIST post-quantum security category a suite targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NistLevel {
    L1,
    L3,
    L5,
}

/// Which AEAD a suite uses. The header never carries this byte; both ends
/// learn it from the negotiated `suite_id` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AeadToken {
    AesGcm,
    ChaCha20Poly1305,
    Ascon128,
}

impl AeadToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            AeadToken::AesGcm => "aesgcm",
            AeadToken::ChaCha20Poly1305 => "chacha20poly1305",
            AeadToken::Ascon128 => "ascon128",
        }
    }
}

/// An immutable suite descriptor. `PartialEq` compares only `suite_id`, per
/// the registry's comparison policy — two descriptors with the same ID are
/// the same suite even if a caller mutated a defensive copy's other fields.
#[derive(Debug, Clone)]
pub struct SuiteDescriptor {
    pub suite_id: String,
    pub kem_name: String,
    pub sig_name: String,
    pub aead_token: AeadToken,
    pub kdf: String,
    pub nist_level: NistLevel,
    pub kem_id: u8,
    pub kem_param: u8,
    pub sig_id: u8,
    pub sig_param: u8,
}

impl PartialEq for SuiteDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.suite_id == other.suite_id
    }
}
impl Eq for SuiteDescriptor {}

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("unknown suite: {0}")]
    UnknownSuite(String),
}

#[derive(Debug, Clone, Copy)]
struct KemSpec {
    name: &'static str,
    level: NistLevel,
    id: u8,
    param: u8,
}

// ML-KEM is the only KEM family wired up; `kem_id` is fixed at 1 and
// `kem_param` carries the security level (1/3/5, matching the NIST
// category number rather than the key size so it always fits one byte).
const KEM_512: KemSpec = KemSpec { name: "ML-KEM-512", level: NistLevel::L1, id: 1, param: 1 };
const KEM_768: KemSpec = KemSpec { name: "ML-KEM-768", level: NistLevel::L3, id: 1, param: 3 };
const KEM_1024: KemSpec = KemSpec { name: "ML-KEM-1024", level: NistLevel::L5, id: 1, param: 5 };

#[derive(Debug, Clone, Copy)]
struct SigSpec {
    name: &'static str,
    id: u8,
    param: u8,
}

// `sig_id` 1 identifies the ML-DSA-shaped signature slot. The concrete
// backend bound to that slot is a build-time decision (see DESIGN.md); the
// wire bytes and suite naming are independent of that decision.
const SIG_44: SigSpec = SigSpec { name: "ML-DSA-44", id: 1, param: 1 };
const SIG_65: SigSpec = SigSpec { name: "ML-DSA-65", id: 1, param: 3 };
const SIG_87: SigSpec = SigSpec { name: "ML-DSA-87", id: 1, param: 5 };

fn suite(kem: KemSpec, sig: SigSpec, aead: AeadToken) -> SuiteDescriptor {
    let suite_id = format!(
        "cs-{}-{}-{}",
        kem.name.to_ascii_lowercase().replace('-', ""),
        aead.as_str(),
        sig.name.to_ascii_lowercase().replace('-', ""),
    );
    SuiteDescriptor {
        suite_id,
        kem_name: kem.name.to_string(),
        sig_name: sig.name.to_string(),
        aead_token: aead,
        kdf: "HKDF-SHA256".to_string(),
        nist_level: kem.level,
        kem_id: kem.id,
        kem_param: kem.param,
        sig_id: sig.id,
        sig_param: sig.param,
    }
}

fn build_registry() -> HashMap<String, SuiteDescriptor> {
    let mut reg = HashMap::new();
    let triples = [
        (KEM_512, SIG_44),
        (KEM_768, SIG_65),
        (KEM_1024, SIG_87),
    ];
    let aeads = [AeadToken::AesGcm, AeadToken::ChaCha20Poly1305, AeadToken::Ascon128];
    for (kem, sig) in triples {
        for aead in aeads {
            let d = suite(kem, sig, aead);
            reg.insert(d.suite_id.clone(), d);
        }
    }
    reg
}

/// Legacy/alias names that resolve to a canonical suite ID. Downstream code
/// never sees an alias — `get` resolves it at lookup time.
fn alias_table() -> HashMap<&'static str, &'static str> {
    let mut m = HashMap::new();
    m.insert("cs-mlkem768-aesgcm-mldsa65-legacy", "cs-mlkem768-aesgcm-mldsa65");
    m
}

/// The suite registry. Cloning it clones the underlying map; it holds no
/// interior mutability and no process-wide singleton is required to use it.
#[derive(Debug, Clone)]
pub struct SuiteRegistry {
    suites: HashMap<String, SuiteDescriptor>,
    aliases: HashMap<&'static str, &'static str>,
}

impl SuiteRegistry {
    pub fn new() -> Self {
        Self { suites: build_registry(), aliases: alias_table() }
    }

    /// Resolve an ID or alias to a defensive copy of its descriptor.
    pub fn get(&self, id_or_alias: &str) -> Result<SuiteDescriptor, SuiteError> {
        let canonical = self.aliases.get(id_or_alias).copied().unwrap_or(id_or_alias);
        self.suites
            .get(canonical)
            .cloned()
            .ok_or_else(|| SuiteError::UnknownSuite(id_or_alias.to_string()))
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.suites.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn header_ids(&self, d: &SuiteDescriptor) -> (u8, u8, u8, u8) {
        (d.kem_id, d.kem_param, d.sig_id, d.sig_param)
    }

    /// AEAD tokens linkable in this build. All three are always compiled in;
    /// there is no feature gate narrowing this set.
    pub fn available_aead_tokens(&self) -> Vec<AeadToken> {
        vec![AeadToken::AesGcm, AeadToken::ChaCha20Poly1305, AeadToken::Ascon128]
    }

    pub fn unavailable_reasons(&self) -> HashMap<AeadToken, String> {
        HashMap::new()
    }
}

impl Default for SuiteRegistry {
    fn default() -> Self {
        Self::new()
    }
}
