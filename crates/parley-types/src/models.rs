use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Course role of a user, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Tutor,
    Editor,
    Instructor,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Student, Role::Tutor, Role::Editor, Role::Instructor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Tutor => "tutor",
            Role::Editor => "editor",
            Role::Instructor => "instructor",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "student" => Some(Role::Student),
            "tutor" => Some(Role::Tutor),
            "editor" => Some(Role::Editor),
            "instructor" => Some(Role::Instructor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Display name as used inside mention tags.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub messaging_enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkTarget {
    Lecture,
    Exercise,
    Exam,
}

impl LinkTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkTarget::Lecture => "lecture",
            LinkTarget::Exercise => "exercise",
            LinkTarget::Exam => "exam",
        }
    }

    pub fn parse(s: &str) -> Option<LinkTarget> {
        match s {
            "lecture" => Some(LinkTarget::Lecture),
            "exercise" => Some(LinkTarget::Exercise),
            "exam" => Some(LinkTarget::Exam),
            _ => None,
        }
    }

    /// Name prefix used for channels derived from a linked item.
    pub fn channel_prefix(&self) -> &'static str {
        match self {
            LinkTarget::Lecture => "lecture-",
            LinkTarget::Exercise => "exercise-",
            LinkTarget::Exam => "exam-",
        }
    }
}

/// Link from a channel to exactly one lecture, exercise or exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLink {
    pub target: LinkTarget,
    pub target_id: Uuid,
    /// Students see the linked item (and its channel) from this instant on.
    pub visible_from: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub description: Option<String>,
    pub topic: Option<String>,
    pub is_public: bool,
    pub is_course_wide: bool,
    pub is_announcement: bool,
    pub is_archived: bool,
    pub link: Option<ChannelLink>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            topic: None,
            is_public: true,
            is_course_wide: false,
            is_announcement: false,
            is_archived: false,
            link: None,
        }
    }

    /// Linked channels are only visible once the linked item is.
    pub fn is_visible_to_students(&self, now: DateTime<Utc>) -> bool {
        match &self.link {
            Some(ChannelLink { visible_from: Some(from), .. }) => *from <= now,
            _ => true,
        }
    }

    /// Uniqueness of linked channels is scoped by the link, not the name.
    pub fn allows_duplicate_name(&self) -> bool {
        self.link.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationKind {
    Channel(Channel),
    GroupChat { name: Option<String> },
    OneToOneChat,
}

impl ConversationKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ConversationKind::Channel(_) => "channel",
            ConversationKind::GroupChat { .. } => "groupChat",
            ConversationKind::OneToOneChat => "oneToOneChat",
        }
    }

    /// Course-wide channels have an implicit roster: every course member belongs,
    /// whether or not a participant row exists yet.
    pub fn has_implicit_membership(&self) -> bool {
        matches!(self, ConversationKind::Channel(c) if c.is_course_wide)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub course_id: Uuid,
    /// `None` for system-created conversations.
    pub creator_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub kind: ConversationKind,
}

impl Conversation {
    pub fn new(course_id: Uuid, creator_id: Option<Uuid>, kind: ConversationKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            course_id,
            creator_id,
            created_at: Utc::now(),
            last_message_at: None,
            kind,
        }
    }

    pub fn as_channel(&self) -> Option<&Channel> {
        match &self.kind {
            ConversationKind::Channel(channel) => Some(channel),
            _ => None,
        }
    }

    pub fn as_channel_mut(&mut self) -> Option<&mut Channel> {
        match &mut self.kind {
            ConversationKind::Channel(channel) => Some(channel),
            _ => None,
        }
    }

    pub fn is_course_wide_channel(&self) -> bool {
        self.kind.has_implicit_membership()
    }

    pub fn is_announcement_channel(&self) -> bool {
        self.as_channel().is_some_and(|c| c.is_announcement)
    }

    /// Name shown to a participant; chats without a name fall back to their type.
    pub fn display_name(&self) -> String {
        match &self.kind {
            ConversationKind::Channel(channel) => channel.name.clone(),
            ConversationKind::GroupChat { name: Some(name) } => name.clone(),
            other => other.type_name().to_string(),
        }
    }
}

/// How a participant wants to hear about new messages.
/// Hidden takes precedence over muted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPreference {
    Notify,
    Muted,
    Hidden,
}

impl NotificationPreference {
    pub fn from_flags(is_muted: bool, is_hidden: bool) -> Self {
        if is_hidden {
            NotificationPreference::Hidden
        } else if is_muted {
            NotificationPreference::Muted
        } else {
            NotificationPreference::Notify
        }
    }

    pub fn should_notify(&self) -> bool {
        matches!(self, NotificationPreference::Notify)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationParticipant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub is_moderator: bool,
    pub is_favorite: bool,
    pub is_hidden: bool,
    pub is_muted: bool,
    pub last_read: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

impl ConversationParticipant {
    pub fn new(conversation_id: Uuid, user_id: Uuid) -> Self {
        Self {
            conversation_id,
            user_id,
            is_moderator: false,
            is_favorite: false,
            is_hidden: false,
            is_muted: false,
            last_read: None,
            unread_count: 0,
        }
    }

    pub fn preference(&self) -> NotificationPreference {
        NotificationPreference::from_flags(self.is_muted, self.is_hidden)
    }
}

/// One entitled recipient of a conversation, as seen by notification fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipientSummary {
    pub user_id: Uuid,
    pub login: String,
    pub is_muted: bool,
    pub is_hidden: bool,
    pub is_at_least_tutor: bool,
}

impl RecipientSummary {
    pub fn preference(&self) -> NotificationPreference {
        NotificationPreference::from_flags(self.is_muted, self.is_hidden)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisplayPriority {
    #[default]
    None,
    Pinned,
    Archived,
}

impl DisplayPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayPriority::None => "NONE",
            DisplayPriority::Pinned => "PINNED",
            DisplayPriority::Archived => "ARCHIVED",
        }
    }

    pub fn parse(s: &str) -> Option<DisplayPriority> {
        match s {
            "NONE" => Some(DisplayPriority::None),
            "PINNED" => Some(DisplayPriority::Pinned),
            "ARCHIVED" => Some(DisplayPriority::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPost {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub author_id: Uuid,
    pub title: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub display_priority: DisplayPriority,
    #[serde(default)]
    pub answers: Vec<AnswerPost>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewMessage,
    Mention,
    Announcement,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewMessage => "new_message",
            NotificationKind::Mention => "mention",
            NotificationKind::Announcement => "announcement",
        }
    }

    pub fn parse(s: &str) -> Option<NotificationKind> {
        match s {
            "new_message" => Some(NotificationKind::NewMessage),
            "mention" => Some(NotificationKind::Mention),
            "announcement" => Some(NotificationKind::Announcement),
            _ => None,
        }
    }
}

/// "User X should be told about message Y".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub post_id: Uuid,
    pub conversation_id: Uuid,
    pub course_id: Uuid,
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub text: String,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
}

/// Notification addressed to every member of a course group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupNotification {
    pub id: Uuid,
    pub post_id: Uuid,
    pub course_id: Uuid,
    pub group: Role,
    pub title: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_follows_privilege() {
        assert!(Role::Student < Role::Tutor);
        assert!(Role::Tutor < Role::Editor);
        assert!(Role::Editor < Role::Instructor);
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
    }

    #[test]
    fn hidden_wins_over_muted() {
        assert_eq!(NotificationPreference::from_flags(true, true), NotificationPreference::Hidden);
        assert_eq!(NotificationPreference::from_flags(true, false), NotificationPreference::Muted);
        assert!(NotificationPreference::from_flags(false, false).should_notify());
    }

    #[test]
    fn linked_channel_visibility_follows_visible_from() {
        let now = Utc::now();
        let mut channel = Channel::new("lecture-intro");
        assert!(channel.is_visible_to_students(now));

        channel.link = Some(ChannelLink {
            target: LinkTarget::Lecture,
            target_id: Uuid::new_v4(),
            visible_from: Some(now + chrono::Duration::days(1)),
        });
        assert!(!channel.is_visible_to_students(now));
        assert!(channel.is_visible_to_students(now + chrono::Duration::days(2)));
        assert!(channel.allows_duplicate_name());
    }
}
