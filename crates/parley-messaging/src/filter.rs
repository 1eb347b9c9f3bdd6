use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_types::models::{Conversation, RecipientSummary};

/// Decides which entitled recipients get a stored notification for a new message.
#[derive(Debug, Clone, Copy)]
pub struct RecipientFilter {
    author_id: Uuid,
    is_channel: bool,
    is_announcement: bool,
    visible_to_students: bool,
}

impl RecipientFilter {
    pub fn for_message(author_id: Uuid, conversation: &Conversation, now: DateTime<Utc>) -> Self {
        let channel = conversation.as_channel();
        Self {
            author_id,
            is_channel: channel.is_some(),
            is_announcement: channel.is_some_and(|c| c.is_announcement),
            visible_to_students: channel.is_none_or(|c| c.is_visible_to_students(now)),
        }
    }

    pub fn visible_to_students(&self) -> bool {
        self.visible_to_students
    }

    /// May this recipient see the conversation at all? Hidden channels are staff only.
    pub fn may_see(&self, candidate: &RecipientSummary) -> bool {
        self.visible_to_students || candidate.is_at_least_tutor
    }

    pub fn accepts(&self, candidate: &RecipientSummary, mentioned: &HashSet<Uuid>) -> bool {
        if candidate.user_id == self.author_id {
            return false;
        }

        if !self.is_channel {
            return candidate.preference().should_notify();
        }

        if !self.is_announcement
            && !(candidate.preference().should_notify() || mentioned.contains(&candidate.user_id))
        {
            return false;
        }

        self.may_see(candidate)
    }

    /// Filtered candidates, unioned with every mentioned user except the author.
    /// Sorted, without duplicates.
    pub fn apply(&self, candidates: &[RecipientSummary], mentioned: &HashSet<Uuid>) -> Vec<Uuid> {
        let mut recipients: Vec<Uuid> = candidates
            .iter()
            .filter(|c| self.accepts(c, mentioned))
            .map(|c| c.user_id)
            .chain(mentioned.iter().copied().filter(|id| *id != self.author_id))
            .collect();
        recipients.sort();
        recipients.dedup();
        recipients
    }
}
