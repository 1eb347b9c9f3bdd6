use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use parley_types::models::{
    AnswerPost, Conversation, ConversationKind, ConversationParticipant, Course, GroupNotification,
    Notification, Post, RecipientSummary, Role, User,
};

use crate::models::{
    CONVERSATION_COLUMNS, NOTIFICATION_COLUMNS, PARTICIPANT_COLUMNS, POST_COLUMNS, USER_COLUMNS,
    answer_from_row, conversation_from_row, course_from_row, encode_ts, group_notification_from_row,
    notification_from_row, participant_from_row, post_from_row, recipient_from_row, role_at,
    user_from_row,
};
use crate::store::ConversationStore;
use crate::Database;

impl Database {
    // -- Seeding (roster data is owned by course administration) --

    pub fn create_user(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, login, first_name, last_name, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id.to_string(),
                    user.login,
                    user.first_name,
                    user.last_name,
                    encode_ts(&user.created_at)
                ],
            )?;
            Ok(())
        })
    }

    pub fn create_course(&self, course: &Course) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO courses (id, title, messaging_enabled, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    course.id.to_string(),
                    course.title,
                    course.messaging_enabled,
                    encode_ts(&course.created_at)
                ],
            )?;
            Ok(())
        })
    }

    pub fn add_course_member(&self, course_id: Uuid, user_id: Uuid, role: Role) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO course_members (course_id, user_id, role) VALUES (?1, ?2, ?3)
                 ON CONFLICT(course_id, user_id) DO UPDATE SET role = excluded.role",
                params![course_id.to_string(), user_id.to_string(), role.as_str()],
            )?;
            Ok(())
        })
    }
}

impl ConversationStore for Database {
    // -- Users & courses --

    fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id.to_string()],
                user_from_row,
            )
            .optional()
        })
    }

    fn find_user_by_login(&self, login: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE login = ?1"),
                [login],
                user_from_row,
            )
            .optional()
        })
    }

    fn find_users_by_logins(&self, logins: &[String]) -> Result<Vec<User>> {
        if logins.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users WHERE login IN ({})",
                placeholders(logins.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = logins
                .iter()
                .map(|l| l as &dyn rusqlite::types::ToSql)
                .collect();
            let rows = stmt
                .query_map(params.as_slice(), user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn find_course(&self, id: Uuid) -> Result<Option<Course>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, title, messaging_enabled, created_at FROM courses WHERE id = ?1",
                [id.to_string()],
                course_from_row,
            )
            .optional()
        })
    }

    fn course_role(&self, course_id: Uuid, user_id: Uuid) -> Result<Option<Role>> {
        self.with_conn(|conn| {
            let role = conn
                .query_row(
                    "SELECT role FROM course_members WHERE course_id = ?1 AND user_id = ?2",
                    [course_id.to_string(), user_id.to_string()],
                    |row| role_at(row, 0),
                )
                .optional()?;
            Ok(role.flatten())
        })
    }

    fn find_course_members(&self, course_id: Uuid, roles: &[Role]) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.login, u.first_name, u.last_name, u.created_at, cm.role
                 FROM course_members cm
                 JOIN users u ON u.id = cm.user_id
                 WHERE cm.course_id = ?1
                 ORDER BY u.login",
            )?;
            let rows = stmt
                .query_map([course_id.to_string()], |row| Ok((user_from_row(row)?, role_at(row, 5)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .filter(|(_, role)| role.is_some_and(|r| roles.contains(&r)))
                .map(|(user, _)| user)
                .collect())
        })
    }

    fn count_members(&self, course_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM course_members WHERE course_id = ?1",
                [course_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    // -- Conversations --

    fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.with_conn(|conn| upsert_conversation(conn, conversation))
    }

    fn delete_conversation(&self, id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM conversations WHERE id = ?1", [id.to_string()])?;
            Ok(())
        })
    }

    fn find_channels_by_name(&self, course_id: Uuid, name: &str, exclude: Option<Uuid>) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE course_id = ?1 AND kind = 'channel' AND name = ?2 AND (?3 IS NULL OR id != ?3)"
            ))?;
            let rows = stmt
                .query_map(
                    params![course_id.to_string(), name, exclude.map(|id| id.to_string())],
                    conversation_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn update_last_message_date(&self, conversation_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations
                 SET last_message_at = CASE
                     WHEN last_message_at IS NULL OR last_message_at < ?2 THEN ?2
                     ELSE last_message_at
                 END
                 WHERE id = ?1",
                params![conversation_id.to_string(), encode_ts(&at)],
            )?;
            Ok(())
        })
    }

    // -- Participants --

    fn find_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<ConversationParticipant>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants
                     WHERE conversation_id = ?1 AND user_id = ?2"
                ),
                [conversation_id.to_string(), user_id.to_string()],
                participant_from_row,
            )
            .optional()
        })
    }

    fn find_participants(&self, conversation_id: Uuid) -> Result<Vec<ConversationParticipant>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants WHERE conversation_id = ?1"
            ))?;
            let rows = stmt
                .query_map([conversation_id.to_string()], participant_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn find_participants_by_users(&self, conversation_id: Uuid, user_ids: &[Uuid]) -> Result<Vec<ConversationParticipant>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            // ?1 is the conversation, user ids start at ?2
            let placeholders: Vec<String> = (2..=user_ids.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants
                 WHERE conversation_id = ?1 AND user_id IN ({})",
                placeholders.join(", ")
            );
            let mut values = Vec::with_capacity(user_ids.len() + 1);
            values.push(conversation_id.to_string());
            values.extend(user_ids.iter().map(|id| id.to_string()));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(values.iter()), participant_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn save_participant(&self, participant: &ConversationParticipant) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversation_participants
                     (conversation_id, user_id, is_moderator, is_favorite, is_hidden, is_muted, last_read, unread_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(conversation_id, user_id) DO UPDATE SET
                     is_moderator = excluded.is_moderator,
                     is_favorite = excluded.is_favorite,
                     is_hidden = excluded.is_hidden,
                     is_muted = excluded.is_muted",
                participant_params(participant),
            )?;
            Ok(())
        })
    }

    fn insert_participant_if_absent(&self, participant: &ConversationParticipant) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO conversation_participants
                     (conversation_id, user_id, is_moderator, is_favorite, is_hidden, is_muted, last_read, unread_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                participant_params(participant),
            )?;
            Ok(inserted == 1)
        })
    }

    fn count_participants(&self, conversation_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM conversation_participants WHERE conversation_id = ?1",
                [conversation_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    // -- Recipients --

    fn course_wide_recipients(&self, course_id: Uuid, conversation_id: Uuid) -> Result<Vec<RecipientSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.login, cm.role, p.is_muted, p.is_hidden
                 FROM course_members cm
                 JOIN users u ON u.id = cm.user_id
                 LEFT JOIN conversation_participants p
                     ON p.conversation_id = ?2 AND p.user_id = cm.user_id
                 WHERE cm.course_id = ?1",
            )?;
            let rows = stmt
                .query_map([course_id.to_string(), conversation_id.to_string()], recipient_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn participant_recipients(&self, course_id: Uuid, conversation_id: Uuid) -> Result<Vec<RecipientSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.login, cm.role, p.is_muted, p.is_hidden
                 FROM conversation_participants p
                 JOIN users u ON u.id = p.user_id
                 LEFT JOIN course_members cm
                     ON cm.course_id = ?1 AND cm.user_id = p.user_id
                 WHERE p.conversation_id = ?2",
            )?;
            let rows = stmt
                .query_map([course_id.to_string(), conversation_id.to_string()], recipient_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Counters --

    fn increment_unread(&self, conversation_id: Uuid, exclude_user_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let touched = conn.execute(
                "UPDATE conversation_participants
                 SET unread_count = unread_count + 1
                 WHERE conversation_id = ?1 AND user_id != ?2",
                [conversation_id.to_string(), exclude_user_id.to_string()],
            )?;
            Ok(touched)
        })
    }

    fn decrement_unread(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let touched = conn.execute(
                "UPDATE conversation_participants
                 SET unread_count = unread_count - 1
                 WHERE conversation_id = ?1 AND user_id = ?2 AND unread_count > 0",
                [conversation_id.to_string(), user_id.to_string()],
            )?;
            Ok(touched == 1)
        })
    }

    fn set_last_read(&self, user_id: Uuid, conversation_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversation_participants
                 SET unread_count = 0,
                     last_read = CASE
                         WHEN last_read IS NULL OR last_read < ?3 THEN ?3
                         ELSE last_read
                     END
                 WHERE conversation_id = ?2 AND user_id = ?1",
                params![user_id.to_string(), conversation_id.to_string(), encode_ts(&at)],
            )?;
            Ok(())
        })
    }

    // -- Posts --

    fn save_post(&self, post: &Post) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, conversation_id, author_id, title, content, created_at, updated_at, display_priority)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     title = excluded.title,
                     content = excluded.content,
                     updated_at = excluded.updated_at,
                     display_priority = excluded.display_priority",
                params![
                    post.id.to_string(),
                    post.conversation_id.to_string(),
                    post.author_id.to_string(),
                    post.title,
                    post.content,
                    encode_ts(&post.created_at),
                    post.updated_at.as_ref().map(encode_ts),
                    post.display_priority.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    fn find_post(&self, id: Uuid) -> Result<Option<Post>> {
        self.with_conn(|conn| {
            let post = conn
                .query_row(
                    &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
                    [id.to_string()],
                    post_from_row,
                )
                .optional()?;

            match post {
                Some(mut post) => {
                    post.answers = query_answers(conn, &[post.id])?.remove(&post.id).unwrap_or_default();
                    Ok(Some(post))
                }
                None => Ok(None),
            }
        })
    }

    fn delete_post(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM posts WHERE id = ?1", [id.to_string()])?;
            Ok(deleted == 1)
        })
    }

    fn count_posts(&self, conversation_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM posts WHERE conversation_id = ?1",
                [conversation_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    fn find_posts(&self, conversation_id: Uuid, limit: u32, before: Option<DateTime<Utc>>) -> Result<Vec<Post>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POST_COLUMNS} FROM posts
                 WHERE conversation_id = ?1 AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC
                 LIMIT ?3"
            ))?;
            let mut posts = stmt
                .query_map(
                    params![conversation_id.to_string(), before.as_ref().map(encode_ts), limit],
                    post_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            // Batch-fetch answers for the page (avoids N+1)
            let ids: Vec<Uuid> = posts.iter().map(|p| p.id).collect();
            let mut answers = query_answers(conn, &ids)?;
            for post in &mut posts {
                post.answers = answers.remove(&post.id).unwrap_or_default();
            }
            Ok(posts)
        })
    }

    fn save_answer(&self, answer: &AnswerPost) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO answer_posts (id, post_id, author_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    answer.id.to_string(),
                    answer.post_id.to_string(),
                    answer.author_id.to_string(),
                    answer.content,
                    encode_ts(&answer.created_at)
                ],
            )?;
            Ok(())
        })
    }

    // -- Notifications --

    fn save_notification(&self, n: &Notification) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                &format!("INSERT OR IGNORE INTO notifications ({NOTIFICATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    n.id.to_string(),
                    n.post_id.to_string(),
                    n.conversation_id.to_string(),
                    n.course_id.to_string(),
                    n.recipient_id.to_string(),
                    n.kind.as_str(),
                    n.title,
                    n.text,
                    n.author_name,
                    encode_ts(&n.created_at)
                ],
            )?;
            Ok(inserted == 1)
        })
    }

    fn save_group_notification(&self, n: &GroupNotification) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO group_notifications (id, post_id, course_id, grp, title, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    n.id.to_string(),
                    n.post_id.to_string(),
                    n.course_id.to_string(),
                    n.group.as_str(),
                    n.title,
                    n.text,
                    encode_ts(&n.created_at)
                ],
            )?;
            Ok(inserted == 1)
        })
    }

    fn find_notifications(&self, recipient_id: Uuid) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE recipient_id = ?1 ORDER BY created_at"
            ))?;
            let rows = stmt
                .query_map([recipient_id.to_string()], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn find_group_notifications(&self, course_id: Uuid) -> Result<Vec<GroupNotification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, post_id, course_id, grp, title, text, created_at
                 FROM group_notifications WHERE course_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([course_id.to_string()], group_notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

fn participant_params(p: &ConversationParticipant) -> impl rusqlite::Params {
    (
        p.conversation_id.to_string(),
        p.user_id.to_string(),
        p.is_moderator,
        p.is_favorite,
        p.is_hidden,
        p.is_muted,
        p.last_read.as_ref().map(encode_ts),
        p.unread_count,
    )
}

fn query_conversation(conn: &Connection, id: Uuid) -> Result<Option<Conversation>> {
    conn.query_row(
        &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
        [id.to_string()],
        conversation_from_row,
    )
    .optional()
}

fn upsert_conversation(conn: &Connection, c: &Conversation) -> Result<()> {
    let (group_name, channel) = match &c.kind {
        ConversationKind::Channel(channel) => (None, Some(channel)),
        ConversationKind::GroupChat { name } => (name.clone(), None),
        ConversationKind::OneToOneChat => (None, None),
    };
    let link = channel.and_then(|ch| ch.link.as_ref());

    conn.execute(
        &format!(
            "INSERT INTO conversations ({CONVERSATION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(id) DO UPDATE SET
                 last_message_at = CASE
                     WHEN excluded.last_message_at > COALESCE(last_message_at, '') THEN excluded.last_message_at
                     ELSE last_message_at
                 END,
                 group_name = excluded.group_name,
                 name = excluded.name,
                 description = excluded.description,
                 topic = excluded.topic,
                 is_public = excluded.is_public,
                 is_course_wide = excluded.is_course_wide,
                 is_announcement = excluded.is_announcement,
                 is_archived = excluded.is_archived,
                 link_target = excluded.link_target,
                 link_id = excluded.link_id,
                 link_visible_from = excluded.link_visible_from"
        ),
        params![
            c.id.to_string(),
            c.course_id.to_string(),
            c.kind.type_name(),
            c.creator_id.map(|id| id.to_string()),
            encode_ts(&c.created_at),
            c.last_message_at.as_ref().map(encode_ts),
            group_name,
            channel.map(|ch| ch.name.clone()),
            channel.and_then(|ch| ch.description.clone()),
            channel.and_then(|ch| ch.topic.clone()),
            channel.is_some_and(|ch| ch.is_public),
            channel.is_some_and(|ch| ch.is_course_wide),
            channel.is_some_and(|ch| ch.is_announcement),
            channel.is_some_and(|ch| ch.is_archived),
            link.map(|l| l.target.as_str()),
            link.map(|l| l.target_id.to_string()),
            link.and_then(|l| l.visible_from.as_ref().map(encode_ts)),
        ],
    )?;
    Ok(())
}

fn query_answers(conn: &Connection, post_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<AnswerPost>>> {
    let mut grouped: HashMap<Uuid, Vec<AnswerPost>> = HashMap::new();
    if post_ids.is_empty() {
        return Ok(grouped);
    }

    let sql = format!(
        "SELECT id, post_id, author_id, content, created_at FROM answer_posts
         WHERE post_id IN ({}) ORDER BY created_at",
        placeholders(post_ids.len())
    );
    let ids: Vec<String> = post_ids.iter().map(|id| id.to_string()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), answer_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for answer in rows {
        grouped.entry(answer.post_id).or_default().push(answer);
    }
    Ok(grouped)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
