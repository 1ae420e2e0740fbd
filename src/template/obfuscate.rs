// Reversible encoding for the stored secret
//
// This is NOT encryption. Anyone holding a template file can recover the
// secret; base64 only keeps it from being read over a shoulder. Existing
// template files depend on this exact encoding, so it cannot change without
// breaking them.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObfuscationError {
    #[error("secret is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decoded secret is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Encode a secret for storage
pub fn obfuscate(secret: &str) -> String {
    BASE64.encode(secret.as_bytes())
}

/// Decode a stored secret
pub fn reveal(stored: &str) -> Result<String, ObfuscationError> {
    let bytes = BASE64.decode(stored.trim())?;
    Ok(String::from_utf8(bytes)?)
}
