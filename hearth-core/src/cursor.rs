//! Opaque cursor tokens for keyset pagination.
//!
//! A token is base64url (no padding) of `{"v": <sortValue>, "id": <tieBreak>}`.
//! Clients treat it as opaque and hand it back via `_pageToken`.

use crate::error::{PlatformError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorToken {
    #[serde(rename = "v")]
    pub sort_value: String,
    #[serde(rename = "id")]
    pub tie_break_id: String,
}

/// Encode a (sortValue, tieBreakId) pair into an opaque token.
pub fn encode_cursor(sort_value: &str, tie_break_id: &str) -> String {
    let token = CursorToken {
        sort_value: sort_value.to_string(),
        tie_break_id: tie_break_id.to_string(),
    };
    // CursorToken serialization cannot fail: two plain strings
    let payload = serde_json::to_vec(&token).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(payload)
}

/// Decode an opaque token back into its (sortValue, tieBreakId) pair.
pub fn decode_cursor(token: &str) -> Result<CursorToken> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| PlatformError::Value("invalid cursor token".to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| PlatformError::Value("invalid cursor payload".to_string()))
}
