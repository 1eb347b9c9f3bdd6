/// Row mapping between SQLite and the parley-types domain models.
/// Ids are stored as TEXT uuids, timestamps as RFC 3339 TEXT with
/// microsecond precision so that string order equals time order.
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use parley_types::models::{
    AnswerPost, Channel, ChannelLink, Conversation, ConversationKind, ConversationParticipant,
    Course, DisplayPriority, GroupNotification, LinkTarget, Notification, NotificationKind, Post,
    RecipientSummary, Role, User,
};

pub const USER_COLUMNS: &str = "id, login, first_name, last_name, created_at";

pub const CONVERSATION_COLUMNS: &str = "id, course_id, kind, creator_id, created_at, last_message_at, \
     group_name, name, description, topic, is_public, is_course_wide, is_announcement, is_archived, \
     link_target, link_id, link_visible_from";

pub const PARTICIPANT_COLUMNS: &str = "conversation_id, user_id, is_moderator, is_favorite, is_hidden, \
     is_muted, last_read, unread_count";

pub const POST_COLUMNS: &str =
    "id, conversation_id, author_id, title, content, created_at, updated_at, display_priority";

pub const NOTIFICATION_COLUMNS: &str = "id, post_id, conversation_id, course_id, recipient_id, kind, \
     title, text, author_name, created_at";

pub fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn unknown_value(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown {} '{}'", what, value).into(),
    )
}

pub fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

pub fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => raw.parse().map(Some).map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

pub fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub fn opt_ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

pub fn role_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Role>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => Role::parse(&raw).map(Some).ok_or_else(|| unknown_value(idx, "role", &raw)),
        None => Ok(None),
    }
}

pub fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        login: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        created_at: ts_at(row, 4)?,
    })
}

pub fn course_from_row(row: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: uuid_at(row, 0)?,
        title: row.get(1)?,
        messaging_enabled: row.get(2)?,
        created_at: ts_at(row, 3)?,
    })
}

pub fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let kind_raw: String = row.get(2)?;
    let kind = match kind_raw.as_str() {
        "channel" => {
            let link = match row.get::<_, Option<String>>(14)? {
                Some(target) => Some(ChannelLink {
                    target: LinkTarget::parse(&target)
                        .ok_or_else(|| unknown_value(14, "link target", &target))?,
                    target_id: uuid_at(row, 15)?,
                    visible_from: opt_ts_at(row, 16)?,
                }),
                None => None,
            };
            ConversationKind::Channel(Channel {
                name: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                description: row.get(8)?,
                topic: row.get(9)?,
                is_public: row.get(10)?,
                is_course_wide: row.get(11)?,
                is_announcement: row.get(12)?,
                is_archived: row.get(13)?,
                link,
            })
        }
        "groupChat" => ConversationKind::GroupChat { name: row.get(6)? },
        "oneToOneChat" => ConversationKind::OneToOneChat,
        other => return Err(unknown_value(2, "conversation kind", other)),
    };

    Ok(Conversation {
        id: uuid_at(row, 0)?,
        course_id: uuid_at(row, 1)?,
        creator_id: opt_uuid_at(row, 3)?,
        created_at: ts_at(row, 4)?,
        last_message_at: opt_ts_at(row, 5)?,
        kind,
    })
}

pub fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationParticipant> {
    Ok(ConversationParticipant {
        conversation_id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        is_moderator: row.get(2)?,
        is_favorite: row.get(3)?,
        is_hidden: row.get(4)?,
        is_muted: row.get(5)?,
        last_read: opt_ts_at(row, 6)?,
        unread_count: row.get(7)?,
    })
}

/// Columns: user id, login, course role, is_muted, is_hidden (the last three nullable).
pub fn recipient_from_row(row: &Row<'_>) -> rusqlite::Result<RecipientSummary> {
    let role = role_at(row, 2)?;
    Ok(RecipientSummary {
        user_id: uuid_at(row, 0)?,
        login: row.get(1)?,
        is_muted: row.get::<_, Option<bool>>(3)?.unwrap_or(false),
        is_hidden: row.get::<_, Option<bool>>(4)?.unwrap_or(false),
        is_at_least_tutor: role.is_some_and(|r| r >= Role::Tutor),
    })
}

pub fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    let priority: String = row.get(7)?;
    Ok(Post {
        id: uuid_at(row, 0)?,
        conversation_id: uuid_at(row, 1)?,
        author_id: uuid_at(row, 2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        created_at: ts_at(row, 5)?,
        updated_at: opt_ts_at(row, 6)?,
        display_priority: DisplayPriority::parse(&priority)
            .ok_or_else(|| unknown_value(7, "display priority", &priority))?,
        answers: Vec::new(),
    })
}

pub fn answer_from_row(row: &Row<'_>) -> rusqlite::Result<AnswerPost> {
    Ok(AnswerPost {
        id: uuid_at(row, 0)?,
        post_id: uuid_at(row, 1)?,
        author_id: uuid_at(row, 2)?,
        content: row.get(3)?,
        created_at: ts_at(row, 4)?,
    })
}

pub fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let kind: String = row.get(5)?;
    Ok(Notification {
        id: uuid_at(row, 0)?,
        post_id: uuid_at(row, 1)?,
        conversation_id: uuid_at(row, 2)?,
        course_id: uuid_at(row, 3)?,
        recipient_id: uuid_at(row, 4)?,
        kind: NotificationKind::parse(&kind).ok_or_else(|| unknown_value(5, "notification kind", &kind))?,
        title: row.get(6)?,
        text: row.get(7)?,
        author_name: row.get(8)?,
        created_at: ts_at(row, 9)?,
    })
}

pub fn group_notification_from_row(row: &Row<'_>) -> rusqlite::Result<GroupNotification> {
    Ok(GroupNotification {
        id: uuid_at(row, 0)?,
        post_id: uuid_at(row, 1)?,
        course_id: uuid_at(row, 2)?,
        group: role_at(row, 3)?.ok_or_else(|| unknown_value(3, "group", "NULL"))?,
        title: row.get(4)?,
        text: row.get(5)?,
        created_at: ts_at(row, 6)?,
    })
}
