use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use parley_types::events::PushEvent;

/// Destination of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every member of the course (course-wide channel broadcasts).
    Course(Uuid),
    /// Personalised delivery to one user.
    UserConversations(Uuid),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Course(course_id) => write!(f, "course/{}", course_id),
            Topic::UserConversations(user_id) => write!(f, "user/{}/conversations", user_id),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no open connection accepted the push on {topic}")]
    ChannelClosed { topic: String },

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Live push transport.
///
/// `publish` returns the number of connections reached. A topic nobody is
/// listening on is not an error: the message stays stored and is fetched later.
pub trait PushTransport: Send + Sync {
    fn publish(&self, topic: &Topic, event: &PushEvent) -> Result<usize, DeliveryError>;
}
