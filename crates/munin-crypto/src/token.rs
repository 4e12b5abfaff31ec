//! Session tokens (spec.md §4.2, §8 property 7). The raw token never
//! touches storage — only `HMAC-SHA-256(secret, token_bytes)` does.

use hex::FromHexError;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// 32 random bytes, hex-encoded for transport as the raw bearer
/// token. The hex encoding is just a wire convenience; the security
/// property is that these bytes are never persisted.
pub fn random_raw_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `HMAC-SHA-256(secret, raw_token_bytes)`, hex-encoded. This is the
/// only form of the token that ever reaches the storage adapter.
pub fn hmac_token_hash(secret: &[u8], raw_token_hex: &str) -> Result<String, FromHexError> {
    let token_bytes = hex::decode(raw_token_hex)?;
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(&token_bytes);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
