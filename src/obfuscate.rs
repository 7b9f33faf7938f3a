//! Reversible credential encoding.
//!
//! Stored admin credentials are Base64 over UTF-8. This is obfuscation
//! only; anyone who can read the config issue can decode them.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

#[must_use]
pub fn obfuscate(plain: &str) -> String {
    STANDARD.encode(plain.as_bytes())
}

/// Decode an obfuscated value. `None` if it is not valid Base64 or not UTF-8.
#[must_use]
pub fn deobfuscate(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded.trim()).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
#[path = "obfuscate_test.rs"]
mod tests;
