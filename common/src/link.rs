//! Numeric ids shared with the field app.
//!
//! The field app keys payment rows by a small integer derived from the
//! customer or collector document id. The panel recomputes the same value to
//! join those rows back to their documents.

use sha2::{Digest, Sha256};

/// Size of the numeric id space.
pub const NUMERIC_ID_SPACE: u32 = 1_000_000;

// Hex digits of the digest fed into the integer.
const PREFIX_LEN: usize = 8;

/// Derive the numeric id for a document id.
///
/// Collisions inside the million-wide space are possible and are not
/// detected here.
pub fn numeric_id(id: &str) -> u32 {
    let digest = hex::encode(Sha256::digest(id.as_bytes()));
    // 8 hex digits always fit a u32.
    let prefix = u32::from_str_radix(&digest[..PREFIX_LEN], 16).unwrap_or_default();
    prefix % NUMERIC_ID_SPACE
}

/// True when `numeric` is the numeric id of `id`.
pub fn links_to(numeric: u32, id: &str) -> bool {
    numeric_id(id) == numeric
}
