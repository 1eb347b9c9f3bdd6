use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_types::models::{
    AnswerPost, Conversation, ConversationParticipant, Course, GroupNotification, Notification,
    Post, RecipientSummary, Role, User,
};

/// Persistence contract of the messaging core.
///
/// Unread counters and last-read timestamps are shared by many concurrent
/// writers. Implementations must provide them as single atomic operations;
/// callers never read, modify and write them back.
pub trait ConversationStore: Send + Sync {
    // -- Users & courses --

    fn find_user(&self, id: Uuid) -> Result<Option<User>>;

    fn find_user_by_login(&self, login: &str) -> Result<Option<User>>;

    fn find_users_by_logins(&self, logins: &[String]) -> Result<Vec<User>>;

    fn find_course(&self, id: Uuid) -> Result<Option<Course>>;

    fn course_role(&self, course_id: Uuid, user_id: Uuid) -> Result<Option<Role>>;

    /// Members of the course holding one of `roles`.
    fn find_course_members(&self, course_id: Uuid, roles: &[Role]) -> Result<Vec<User>>;

    fn count_members(&self, course_id: Uuid) -> Result<usize>;

    // -- Conversations --

    fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Insert or update. Never moves `last_message_at` backwards.
    fn save_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Removes the conversation with its participants, posts and notifications.
    fn delete_conversation(&self, id: Uuid) -> Result<()>;

    /// Channels of the course named `name`, optionally excluding one id.
    fn find_channels_by_name(&self, course_id: Uuid, name: &str, exclude: Option<Uuid>) -> Result<Vec<Conversation>>;

    /// Monotonic: an already stored later timestamp wins.
    fn update_last_message_date(&self, conversation_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    // -- Participants --

    fn find_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<ConversationParticipant>>;

    fn find_participants(&self, conversation_id: Uuid) -> Result<Vec<ConversationParticipant>>;

    fn find_participants_by_users(&self, conversation_id: Uuid, user_ids: &[Uuid]) -> Result<Vec<ConversationParticipant>>;

    /// Upsert of the per-user flags. Counters and last-read are left untouched
    /// on update; they only change through the atomic primitives below.
    fn save_participant(&self, participant: &ConversationParticipant) -> Result<()>;

    /// Insert unless a row already exists. Returns whether a row was created.
    fn insert_participant_if_absent(&self, participant: &ConversationParticipant) -> Result<bool>;

    fn count_participants(&self, conversation_id: Uuid) -> Result<usize>;

    fn is_member(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self.find_participant(conversation_id, user_id)?.is_some())
    }

    // -- Recipients --

    /// Whole course roster, merged with whatever participant rows exist.
    fn course_wide_recipients(&self, course_id: Uuid, conversation_id: Uuid) -> Result<Vec<RecipientSummary>>;

    /// Explicit participant rows joined with course roles.
    fn participant_recipients(&self, course_id: Uuid, conversation_id: Uuid) -> Result<Vec<RecipientSummary>>;

    // -- Counters --

    /// +1 unread for every participant except `exclude_user_id`. Returns rows touched.
    fn increment_unread(&self, conversation_id: Uuid, exclude_user_id: Uuid) -> Result<usize>;

    /// -1 unread for one participant, never below zero. Returns whether it changed.
    fn decrement_unread(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool>;

    /// Advances last-read (never backwards) and clears the unread count.
    fn set_last_read(&self, user_id: Uuid, conversation_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    // -- Posts --

    fn save_post(&self, post: &Post) -> Result<()>;

    /// Post with its answers.
    fn find_post(&self, id: Uuid) -> Result<Option<Post>>;

    fn delete_post(&self, id: Uuid) -> Result<bool>;

    fn count_posts(&self, conversation_id: Uuid) -> Result<usize>;

    /// Newest first, older than `before` when given.
    fn find_posts(&self, conversation_id: Uuid, limit: u32, before: Option<DateTime<Utc>>) -> Result<Vec<Post>>;

    fn save_answer(&self, answer: &AnswerPost) -> Result<()>;

    // -- Notifications --

    /// Idempotent per (post, recipient, kind). Returns whether a row was written.
    fn save_notification(&self, notification: &Notification) -> Result<bool>;

    /// Idempotent per (post, course, group).
    fn save_group_notification(&self, notification: &GroupNotification) -> Result<bool>;

    fn find_notifications(&self, recipient_id: Uuid) -> Result<Vec<Notification>>;

    fn find_group_notifications(&self, course_id: Uuid) -> Result<Vec<GroupNotification>>;
}
