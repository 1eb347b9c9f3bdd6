use uuid::Uuid;

use parley_db::ConversationStore;
use parley_types::models::{Conversation, RecipientSummary};

/// Where the recipients of a conversation come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientStrategy {
    /// Course-wide channels: the course roster. Participant rows are optional
    /// and only contribute mute/hide state where they exist.
    CourseRoster,
    /// Everything else: explicit participant rows.
    Participants,
}

impl RecipientStrategy {
    pub fn for_conversation(conversation: &Conversation) -> Self {
        if conversation.kind.has_implicit_membership() {
            RecipientStrategy::CourseRoster
        } else {
            RecipientStrategy::Participants
        }
    }
}

/// Every user entitled to hear about activity in `conversation`.
pub fn resolve_recipients(store: &dyn ConversationStore, conversation: &Conversation) -> anyhow::Result<Vec<RecipientSummary>> {
    match RecipientStrategy::for_conversation(conversation) {
        RecipientStrategy::CourseRoster => store.course_wide_recipients(conversation.course_id, conversation.id),
        RecipientStrategy::Participants => store.participant_recipients(conversation.course_id, conversation.id),
    }
}

pub fn recipient_ids(recipients: &[RecipientSummary]) -> Vec<Uuid> {
    recipients.iter().map(|r| r.user_id).collect()
}
