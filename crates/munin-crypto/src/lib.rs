//! Hash, signature, password-hash, and session-token primitives
//! (spec.md §4.2, C2). Every function here is total on well-formed
//! inputs: verification returns `bool`, it never panics or throws for
//! malformed keys/signatures.

mod digest;
mod password;
mod signature;
mod token;

pub use digest::{sha256_bytes, sha256_hex};
pub use password::{hash_password, verify_password, Argon2Params, PasswordHashError};
pub use signature::{verify_signature, KeyPair, PublicKey, Signature};
pub use token::{hmac_token_hash, random_raw_token};
