//! Canonicalization of chat messages into a stable prompt text and hash.
//!
//! The normalized form is the foundation of both cache tiers: the exact
//! cache keys on the SHA-256 of the canonical text, and the semantic cache
//! embeds it. Normalization is pure and total: it never fails, and empty
//! roles or content simply normalize to empty strings.

use sha2::{Digest, Sha256};

use crate::api_types::ChatMessage;

/// The canonical form of a request's messages.
///
/// Trimming is the only content transformation applied: two requests whose
/// messages differ only in leading/trailing whitespace share a
/// `request_hash`, while reordering messages changes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRequest {
    pub messages: Vec<ChatMessage>,
    pub canonical_text: String,
    pub request_hash: String,
}

impl NormalizedRequest {
    pub fn prompt_chars(&self) -> usize {
        self.canonical_text.chars().count()
    }
}

/// Normalize a message list: trim each role and content, join as
/// `role:content` lines, and hash the UTF-8 bytes of the joined text.
pub fn normalize_messages(messages: &[ChatMessage]) -> NormalizedRequest {
    let mut parts = Vec::with_capacity(messages.len());
    let mut canon = Vec::with_capacity(messages.len());

    for m in messages {
        let role = m.role.trim();
        let content = m.content.trim();
        parts.push(format!("{role}:{content}"));
        canon.push(ChatMessage::new(role, content));
    }

    let canonical_text = parts.join("\n");
    let request_hash = hex::encode(Sha256::digest(canonical_text.as_bytes()));

    NormalizedRequest {
        messages: canon,
        canonical_text,
        request_hash,
    }
}
