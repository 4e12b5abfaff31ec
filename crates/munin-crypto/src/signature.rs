//! Ed25519 sign/verify (spec.md §4.2). Verification is total — it
//! returns `false` for malformed keys or signatures, it never panics
//! or returns an error. There is deliberately no fallback signing
//! backend (spec.md §9 Open Questions): if `ed25519-dalek` cannot
//! produce a keypair, something is badly wrong with the process and
//! callers should refuse to start rather than silently downgrade to
//! an insecure scheme.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;

/// 32 raw bytes, transported as base64 (spec.md §3).
pub type PublicKey = [u8; 32];
/// 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        KeyPair {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.public_key())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Verifies `signature` over `message` against `public_key_b64`.
/// Total: any malformed base64, wrong-length key, or wrong-length
/// signature simply fails verification rather than erroring.
pub fn verify_signature(public_key_b64: &str, message: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = BASE64.decode(public_key_b64) else {
        return false;
    };
    let Ok(key_bytes): Result<[u8; 32], _> = key_bytes.try_into() else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig_bytes): Result<[u8; 64], _> = signature.to_vec().try_into() else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    verifying_key.verify(message, &signature).is_ok()
}
