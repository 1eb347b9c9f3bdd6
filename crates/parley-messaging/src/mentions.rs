use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use parley_db::ConversationStore;
use parley_types::models::User;

use crate::error::{MessagingError, Result};

/// `[user]Display Name(login)[/user]`. Neither part may contain brackets or parentheses.
static MENTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[user\]([^\[\]()]+)\(([^\[\]()]+)\)\[/user\]").expect("mention pattern is valid")
});

/// Collect `login -> display name` pairs. A repeated login keeps its last display name.
pub fn extract_mentions(content: &str) -> BTreeMap<String, String> {
    MENTION_PATTERN
        .captures_iter(content)
        .map(|caps| (caps[2].to_string(), caps[1].to_string()))
        .collect()
}

/// Validate every mention in `content` against the user table and the course roster.
///
/// Returns the mentioned users ordered by login. Content without mentions
/// never fails and never touches the store.
pub fn parse_mentions(store: &dyn ConversationStore, course_id: Uuid, content: &str) -> Result<Vec<User>> {
    let mentions = extract_mentions(content);
    if mentions.is_empty() {
        return Ok(vec![]);
    }

    let logins: Vec<String> = mentions.keys().cloned().collect();
    let users: HashMap<String, User> = store
        .find_users_by_logins(&logins)?
        .into_iter()
        .map(|u| (u.login.clone(), u))
        .collect();

    let mut mentioned = Vec::with_capacity(mentions.len());
    for (login, display_name) in mentions {
        let user = users
            .get(&login)
            .ok_or_else(|| MessagingError::UnknownMentionedUser { login: login.clone() })?;

        if user.full_name() != display_name {
            return Err(MessagingError::MentionNameMismatch { login });
        }
        if store.course_role(course_id, user.id)?.is_none() {
            return Err(MessagingError::MentionNotCourseMember { login });
        }
        mentioned.push(user.clone());
    }

    Ok(mentioned)
}
