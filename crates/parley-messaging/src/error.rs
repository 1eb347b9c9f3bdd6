use thiserror::Error;
use uuid::Uuid;

use parley_types::models::Role;

pub type Result<T> = std::result::Result<T, MessagingError>;

/// Coarse classification used by callers to decide how to surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input. Nothing was written; retry after fixing the request.
    Validation,
    /// The caller may not do this. Never retried.
    Authorization,
    NotFound,
    /// Push or notification delivery failed in the background phase.
    Delivery,
    Internal,
}

#[derive(Debug, Error)]
pub enum MessagingError {
    // -- Validation --
    #[error("mentioned user '{login}' does not exist")]
    UnknownMentionedUser { login: String },

    #[error("display name given for '{login}' does not match the user's name")]
    MentionNameMismatch { login: String },

    #[error("mentioned user '{login}' is not a member of this course")]
    MentionNotCourseMember { login: String },

    #[error("invalid channel name '{name}': use lowercase letters, digits, colons and dashes")]
    InvalidChannelName { name: String },

    #[error("a channel named '{name}' already exists in this course")]
    DuplicateChannelName { name: String },

    #[error("{0}")]
    InvalidRequest(String),

    // -- Authorization --
    #[error("requires at least the {} role in this course", .required.as_str())]
    InsufficientRole { required: Role },

    #[error("messaging is disabled for course {course_id}")]
    MessagingDisabled { course_id: Uuid },

    #[error("channel {conversation_id} is archived")]
    ChannelArchived { conversation_id: Uuid },

    #[error("not allowed to edit or delete message {post_id}")]
    NotPostOwner { post_id: Uuid },

    #[error("{0}")]
    NotAllowed(String),

    // -- Not found --
    #[error("conversation {0} not found")]
    ConversationNotFound(Uuid),

    #[error("message {0} not found")]
    PostNotFound(Uuid),

    #[error("course {0} not found")]
    CourseNotFound(Uuid),

    #[error("user '{0}' not found")]
    UserNotFound(String),

    // -- Delivery --
    /// Background phase only; logged and counted, never returned to the author.
    #[error("notifications for message {post_id} not delivered: {source}")]
    NotificationsNotDelivered { post_id: Uuid, source: anyhow::Error },

    // -- Internal --
    /// A channel name computed by system code does not satisfy the pattern.
    #[error("derived channel name '{name}' is not a valid channel name")]
    InvalidDerivedChannelName { name: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl MessagingError {
    pub fn kind(&self) -> ErrorKind {
        use MessagingError::*;

        match self {
            UnknownMentionedUser { .. }
            | MentionNameMismatch { .. }
            | MentionNotCourseMember { .. }
            | InvalidChannelName { .. }
            | DuplicateChannelName { .. }
            | InvalidRequest(_) => ErrorKind::Validation,

            InsufficientRole { .. }
            | MessagingDisabled { .. }
            | ChannelArchived { .. }
            | NotPostOwner { .. }
            | NotAllowed(_) => ErrorKind::Authorization,

            ConversationNotFound(_) | PostNotFound(_) | CourseNotFound(_) | UserNotFound(_) => ErrorKind::NotFound,

            NotificationsNotDelivered { .. } => ErrorKind::Delivery,

            InvalidDerivedChannelName { .. } | Store(_) => ErrorKind::Internal,
        }
    }
}
