//! Canonical cursor-value encoding.
//!
//! Every place a cursor value leaves the typed world — the cursor store, the
//! live-task list, the retry queue, and the shadow-key suffix — goes through
//! exactly this one encoder. The zombie reaper can only match shadow keys to
//! live-list entries if both sides agree byte-for-byte, so there is a single
//! encoding and it is used everywhere.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::RatchetError;

/// Encode a cursor value to its canonical string form.
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String, RatchetError> {
    serde_json::to_string(value).map_err(RatchetError::Codec)
}

/// Decode a cursor value from its canonical string form.
pub(crate) fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, RatchetError> {
    serde_json::from_str(raw).map_err(RatchetError::Codec)
}
