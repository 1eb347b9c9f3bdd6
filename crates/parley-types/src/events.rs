use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AnswerPost, Conversation, ConversationKind, DisplayPriority, Notification, NotificationKind,
    Post, Role,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrudAction {
    Create,
    Update,
    Delete,
    NewMessage,
}

/// Back-reference to the owning conversation, stripped down to ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRef {
    pub id: Uuid,
    pub course_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Answer without the link back to its parent post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerView {
    pub id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<&AnswerPost> for AnswerView {
    fn from(answer: &AnswerPost) -> Self {
        Self {
            id: answer.id,
            author_id: answer.author_id,
            content: answer.content.clone(),
            created_at: answer.created_at,
        }
    }
}

/// A post with hidden details: no full conversation, no participant list,
/// no answer back-references. This is what goes over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostView {
    pub id: Uuid,
    pub conversation: ConversationRef,
    pub author_id: Uuid,
    pub author_role: Option<Role>,
    pub title: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub display_priority: DisplayPriority,
    pub answers: Vec<AnswerView>,
}

impl PostView {
    pub fn with_hidden_details(post: &Post, conversation: &Conversation, author_role: Option<Role>) -> Self {
        Self {
            id: post.id,
            conversation: ConversationRef {
                id: conversation.id,
                course_id: conversation.course_id,
                kind: conversation.kind.type_name().to_string(),
            },
            author_id: post.author_id,
            author_role,
            title: post.title.clone(),
            content: post.content.clone(),
            created_at: post.created_at,
            updated_at: post.updated_at,
            display_priority: post.display_priority,
            answers: post.answers.iter().map(AnswerView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationView {
    pub id: Uuid,
    pub course_id: Uuid,
    pub creator_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub kind: ConversationKind,
}

impl From<&Conversation> for ConversationView {
    fn from(c: &Conversation) -> Self {
        Self {
            id: c.id,
            course_id: c.course_id,
            creator_id: c.creator_id,
            created_at: c.created_at,
            last_message_at: c.last_message_at,
            kind: c.kind.clone(),
        }
    }
}

/// Notification embedded in a personalised push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub kind: NotificationKind,
    pub post_id: Uuid,
    pub conversation_id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub text: String,
    pub author_name: String,
}

impl From<&Notification> for NotificationPayload {
    fn from(n: &Notification) -> Self {
        Self {
            kind: n.kind,
            post_id: n.post_id,
            conversation_id: n.conversation_id,
            course_id: n.course_id,
            title: n.title.clone(),
            text: n.text.clone(),
            author_name: n.author_name.clone(),
        }
    }
}

/// Events sent over the push transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, login: String },

    /// A message was created, updated or deleted
    Post {
        action: CrudAction,
        post: PostView,
        notification: Option<NotificationPayload>,
    },

    /// Membership or settings of a conversation changed
    Conversation {
        action: CrudAction,
        conversation: ConversationView,
    },
}

impl PushEvent {
    pub fn post_id(&self) -> Option<Uuid> {
        match self {
            Self::Post { post, .. } => Some(post.id),
            _ => None,
        }
    }

    pub fn action(&self) -> Option<CrudAction> {
        match self {
            Self::Post { action, .. } | Self::Conversation { action, .. } => Some(*action),
            Self::Ready { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Receive course-wide channel broadcasts for these courses.
    Subscribe { course_ids: Vec<Uuid> },
}
