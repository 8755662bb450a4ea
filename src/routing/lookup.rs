//! Finding an existing conversation between two parties
//!
//! Support threads are identified by their participants: both parties must
//! be in the conversation and at least one participant must carry the staff
//! role marker. Role names come from the store as free text, so the match
//! ignores surrounding whitespace and ASCII case.

use crate::types::{Conversation, ConversationId, UserId};

/// Whether `role` names the marker role
pub fn role_matches(role: &str, marker: &str) -> bool {
    role.trim().eq_ignore_ascii_case(marker.trim())
}

/// First conversation in `candidates` that includes both parties and a participant holding `role_marker`
pub fn find_shared_conversation(
    candidates: &[Conversation],
    sender: UserId,
    recipient: UserId,
    role_marker: &str,
) -> Option<ConversationId> {
    candidates
        .iter()
        .find(|c| {
            c.includes(sender)
                && c.includes(recipient)
                && c.participants
                    .iter()
                    .any(|p| role_matches(&p.role, role_marker))
        })
        .map(|c| c.id)
}
