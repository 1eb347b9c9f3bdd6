use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::DisplayPriority;

// -- JWT Claims --

/// JWT claims shared across parley-api (REST middleware) and parley-gateway
/// (WebSocket authentication).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub login: String,
    pub exp: usize,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub conversation_id: Uuid,
    pub title: Option<String>,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePostRequest {
    pub id: Uuid,
    pub title: Option<String>,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisplayPriorityRequest {
    pub display_priority: DisplayPriority,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: `created_at` of the oldest message on the previous page.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

// -- Channels --

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelDraft {
    pub name: String,
    pub description: Option<String>,
    pub topic: Option<String>,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default)]
    pub is_course_wide: bool,
    #[serde(default)]
    pub is_announcement: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub topic: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserLoginsRequest {
    pub logins: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OneToOneChatRequest {
    pub login: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterUsersRequest {
    #[serde(default)]
    pub logins: Vec<String>,
    #[serde(default)]
    pub add_all_students: bool,
    #[serde(default)]
    pub add_all_tutors: bool,
    #[serde(default)]
    pub add_all_instructors: bool,
}

// -- Participant settings --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagRequest {
    pub value: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_draft_defaults_to_public() {
        let draft: ChannelDraft = serde_json::from_str(r#"{"name":"study"}"#).unwrap();
        assert!(draft.is_public);
        assert!(!draft.is_course_wide);
        assert!(!draft.is_announcement);
    }

    #[test]
    fn channel_draft_cannot_carry_a_link() {
        let raw = r#"{"name":"lecture-intro","link":{"target":"lecture","id":"00000000-0000-0000-0000-000000000000"}}"#;
        assert!(serde_json::from_str::<ChannelDraft>(raw).is_err());
    }
}
