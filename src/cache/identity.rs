//! Stable resource identity.

use regex::Regex;
use std::sync::LazyLock;
use xxhash_rust::xxh64::xxh64;

use crate::models::Resource;

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]").expect("punctuation pattern is valid"));

/// Lowercase, strip punctuation, collapse whitespace
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = PUNCTUATION.replace_all(&lowered, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `xxh64(type ␟ name ␟ address)` as 16 hex digits
pub fn resource_id(resource: &Resource) -> String {
    let material = format!(
        "{}\u{1f}{}\u{1f}{}",
        resource.resource_type.as_str(),
        normalize_text(&resource.name),
        normalize_text(resource.address.as_deref().unwrap_or(""))
    );
    format!("{:016x}", xxh64(material.as_bytes(), 0))
}
