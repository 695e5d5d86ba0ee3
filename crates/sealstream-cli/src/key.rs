//! Stream key loading. Keys are held in `Zeroizing` buffers.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::path::Path;
use zeroize::Zeroizing;

/// Key sizes accepted by at least one cipher.
const VALID_KEY_SIZES: [usize; 2] = [16, 32];

/// Read a key file: base64 text (whitespace trimmed) or raw key bytes.
pub fn load_key(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    let raw = Zeroizing::new(
        std::fs::read(path).with_context(|| format!("reading key file: {}", path.display()))?,
    );
    parse_key(&raw).with_context(|| format!("parsing key file: {}", path.display()))
}

pub fn parse_key(raw: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let text = raw.trim_ascii();
    if let Ok(decoded) = STANDARD.decode(text) {
        let decoded = Zeroizing::new(decoded);
        if VALID_KEY_SIZES.contains(&decoded.len()) {
            return Ok(decoded);
        }
    }

    if VALID_KEY_SIZES.contains(&raw.len()) {
        return Ok(Zeroizing::new(raw.to_vec()));
    }

    anyhow::bail!(
        "key must be 16 or 32 bytes (raw or base64), got {} bytes",
        raw.len()
    )
}
