use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::info;
use uuid::Uuid;

use parley_db::ConversationStore;
use parley_types::api::{ChannelDraft, ChannelPatch, RegisterUsersRequest};
use parley_types::events::{CrudAction, PushEvent};
use parley_types::models::{
    Channel, ChannelLink, Conversation, ConversationKind, ConversationParticipant, Role,
};

use crate::conversations::ConversationService;
use crate::error::{MessagingError, Result};

static CHANNEL_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9$][a-z0-9:\-]{0,30}$").expect("channel name pattern is valid"));

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("slug pattern is valid"));

const MAX_DERIVED_NAME_LEN: usize = 30;

/// Channels every course starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultChannelType {
    Announcement,
    Organization,
    Random,
    TechSupport,
}

impl DefaultChannelType {
    pub const ALL: [DefaultChannelType; 4] = [
        DefaultChannelType::Announcement,
        DefaultChannelType::Organization,
        DefaultChannelType::Random,
        DefaultChannelType::TechSupport,
    ];

    pub fn channel_name(&self) -> &'static str {
        match self {
            DefaultChannelType::Announcement => "announcement",
            DefaultChannelType::Organization => "organization",
            DefaultChannelType::Random => "random",
            DefaultChannelType::TechSupport => "tech-support",
        }
    }
}

pub fn is_valid_channel_name(name: &str) -> bool {
    CHANNEL_NAME_PATTERN.is_match(name)
}

pub fn normalize_channel_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Lowercase, collapse every run of other characters into one dash, cut to
/// 30 characters and drop a trailing dash.
pub fn slugify(source: &str) -> String {
    let lowered = source.to_lowercase();
    let mut slug = NON_ALPHANUMERIC.replace_all(&lowered, "-").into_owned();
    // only ascii remains, so byte length is char length
    slug.truncate(MAX_DERIVED_NAME_LEN);
    if slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Channel lifecycle: creation, renaming, archiving, moderators and registration.
#[derive(Clone)]
pub struct ChannelService {
    store: Arc<dyn ConversationStore>,
    conversations: ConversationService,
}

impl ChannelService {
    pub fn new(store: Arc<dyn ConversationStore>, conversations: ConversationService) -> Self {
        Self { store, conversations }
    }

    /// Creates a channel from user input. With a creator, the creator joins as moderator.
    pub fn create_channel(&self, course_id: Uuid, draft: ChannelDraft, creator_id: Option<Uuid>) -> Result<Conversation> {
        self.store
            .find_course(course_id)?
            .ok_or(MessagingError::CourseNotFound(course_id))?;

        let name = normalize_channel_name(&draft.name);
        // `$` names are reserved for system channels
        if creator_id.is_some() && name.starts_with('$') {
            return Err(MessagingError::InvalidChannelName { name });
        }

        let channel = Channel {
            name,
            description: trimmed(draft.description),
            topic: trimmed(draft.topic),
            is_public: draft.is_public,
            is_course_wide: draft.is_course_wide,
            is_announcement: draft.is_announcement,
            is_archived: false,
            link: None,
        };
        let conversation = Conversation::new(course_id, creator_id, ConversationKind::Channel(channel));
        self.is_valid_or_throw(course_id, &conversation)?;
        self.store.save_conversation(&conversation)?;

        if let Some(creator_id) = creator_id {
            let mut moderator = ConversationParticipant::new(conversation.id, creator_id);
            moderator.is_moderator = true;
            self.store.save_participant(&moderator)?;
            self.conversations
                .broadcast_membership(CrudAction::Create, &conversation, &[creator_id]);
        }

        info!(conversation_id = %conversation.id, name = %conversation.display_name(), "channel created");
        Ok(conversation)
    }

    /// System channel without creator; every course member belongs implicitly.
    pub fn create_default_channel(&self, course_id: Uuid, channel_type: DefaultChannelType) -> Result<Conversation> {
        let draft = ChannelDraft {
            name: channel_type.channel_name().to_string(),
            is_public: true,
            is_course_wide: true,
            is_announcement: channel_type == DefaultChannelType::Announcement,
            ..Default::default()
        };
        self.create_channel(course_id, draft, None)
    }

    pub fn create_default_channels(&self, course_id: Uuid) -> Result<Vec<Conversation>> {
        DefaultChannelType::ALL
            .iter()
            .map(|channel_type| self.create_default_channel(course_id, *channel_type))
            .collect()
    }

    /// Course-wide channel for a lecture, exercise or exam, named after its title.
    ///
    /// Only reachable from system code: a name that fails the pattern is a bug.
    pub fn create_derived_channel(&self, course_id: Uuid, link: ChannelLink, title: &str) -> Result<Conversation> {
        let name = slugify(&format!("{}{}", link.target.channel_prefix(), title));
        if !is_valid_channel_name(&name) {
            return Err(MessagingError::InvalidDerivedChannelName { name });
        }

        let mut channel = Channel::new(name);
        channel.is_course_wide = true;
        channel.link = Some(link);
        let conversation = Conversation::new(course_id, None, ConversationKind::Channel(channel));
        self.store.save_conversation(&conversation)?;

        info!(conversation_id = %conversation.id, name = %conversation.display_name(), "derived channel created");
        Ok(conversation)
    }

    /// Name pattern, then per-course uniqueness. Linked channels are unique by
    /// their link, so their names may repeat.
    pub fn is_valid_or_throw(&self, course_id: Uuid, conversation: &Conversation) -> Result<()> {
        let channel = conversation
            .as_channel()
            .ok_or_else(|| MessagingError::InvalidRequest("not a channel".into()))?;

        if !is_valid_channel_name(&channel.name) {
            return Err(MessagingError::InvalidChannelName {
                name: channel.name.clone(),
            });
        }
        if channel.allows_duplicate_name() {
            return Ok(());
        }

        let same_name = self
            .store
            .find_channels_by_name(course_id, &channel.name, Some(conversation.id))?;
        if !same_name.is_empty() {
            return Err(MessagingError::DuplicateChannelName {
                name: channel.name.clone(),
            });
        }
        Ok(())
    }

    pub fn get_channel(&self, conversation_id: Uuid) -> Result<Conversation> {
        let conversation = self.conversations.get_conversation(conversation_id)?;
        if conversation.as_channel().is_none() {
            return Err(MessagingError::InvalidRequest("not a channel".into()));
        }
        Ok(conversation)
    }

    pub fn update_channel(&self, conversation_id: Uuid, course_id: Uuid, patch: ChannelPatch) -> Result<Conversation> {
        let mut conversation = self.get_channel(conversation_id)?;
        if conversation.course_id != course_id {
            return Err(MessagingError::InvalidRequest("channel does not belong to this course".into()));
        }

        if let Some(channel) = conversation.as_channel_mut() {
            if let Some(name) = patch.name.map(|n| normalize_channel_name(&n)) {
                if name != channel.name {
                    channel.name = name;
                }
            }
            if let Some(description) = patch.description {
                channel.description = trimmed(Some(description));
            }
            if let Some(topic) = patch.topic {
                channel.topic = trimmed(Some(topic));
            }
        }

        self.is_valid_or_throw(course_id, &conversation)?;
        self.store.save_conversation(&conversation)?;
        self.conversations.notify_members_about_update(&conversation)?;
        Ok(conversation)
    }

    pub fn archive(&self, conversation_id: Uuid) -> Result<Conversation> {
        self.set_archived(conversation_id, true)
    }

    pub fn unarchive(&self, conversation_id: Uuid) -> Result<Conversation> {
        self.set_archived(conversation_id, false)
    }

    fn set_archived(&self, conversation_id: Uuid, archived: bool) -> Result<Conversation> {
        let mut conversation = self.get_channel(conversation_id)?;
        let Some(channel) = conversation.as_channel_mut() else {
            return Ok(conversation);
        };
        if channel.is_archived == archived {
            return Ok(conversation);
        }
        channel.is_archived = archived;

        self.store.save_conversation(&conversation)?;
        info!(%conversation_id, archived, "channel archive state changed");
        self.conversations.notify_members_about_update(&conversation)?;
        Ok(conversation)
    }

    pub fn grant_moderator(&self, conversation_id: Uuid, user_ids: &[Uuid]) -> Result<Vec<ConversationParticipant>> {
        self.set_moderator(conversation_id, user_ids, true)
    }

    pub fn revoke_moderator(&self, conversation_id: Uuid, user_ids: &[Uuid]) -> Result<Vec<ConversationParticipant>> {
        self.set_moderator(conversation_id, user_ids, false)
    }

    /// Course-wide channels may not have a row for every member yet; missing
    /// rows are created for course members.
    fn set_moderator(&self, conversation_id: Uuid, user_ids: &[Uuid], is_moderator: bool) -> Result<Vec<ConversationParticipant>> {
        let conversation = self.get_channel(conversation_id)?;
        let mut rows = self.store.find_participants_by_users(conversation.id, user_ids)?;

        for user_id in user_ids {
            if rows.iter().any(|p| p.user_id == *user_id) {
                continue;
            }
            let is_course_member = self.store.course_role(conversation.course_id, *user_id)?.is_some();
            if !(conversation.is_course_wide_channel() && is_course_member) {
                return Err(MessagingError::InvalidRequest(format!(
                    "user {} is not a member of this channel",
                    user_id
                )));
            }
            rows.push(ConversationParticipant::new(conversation.id, *user_id));
        }

        for row in &mut rows {
            row.is_moderator = is_moderator;
            self.store.save_participant(row)?;
        }

        self.conversations
            .broadcast_membership(CrudAction::Update, &conversation, user_ids);
        Ok(rows)
    }

    /// Adds users by login and/or by course group. Returns the newly registered ids.
    pub fn register_users_to_channel(
        &self,
        course_id: Uuid,
        conversation_id: Uuid,
        request: &RegisterUsersRequest,
    ) -> Result<Vec<Uuid>> {
        let conversation = self.get_channel(conversation_id)?;
        if conversation.is_course_wide_channel() {
            return Err(MessagingError::InvalidRequest(
                "every course member already belongs to a course-wide channel".into(),
            ));
        }

        let mut roles = Vec::new();
        if request.add_all_students {
            roles.push(Role::Student);
        }
        if request.add_all_tutors {
            roles.extend([Role::Tutor, Role::Editor]);
        }
        if request.add_all_instructors {
            roles.push(Role::Instructor);
        }

        let mut candidates: Vec<Uuid> = Vec::new();
        if !roles.is_empty() {
            candidates.extend(self.store.find_course_members(course_id, &roles)?.iter().map(|u| u.id));
        }
        for user in self.conversations.resolve_users(&request.logins)? {
            if self.store.course_role(course_id, user.id)?.is_none() {
                return Err(MessagingError::InvalidRequest(format!(
                    "{} is not a member of this course",
                    user.login
                )));
            }
            candidates.push(user.id);
        }

        let mut seen = HashSet::new();
        candidates.retain(|id| seen.insert(*id));

        let mut registered = Vec::new();
        let mut existing = Vec::new();
        for user_id in candidates {
            if self
                .store
                .insert_participant_if_absent(&ConversationParticipant::new(conversation.id, user_id))?
            {
                registered.push(user_id);
            } else {
                existing.push(user_id);
            }
        }

        info!(%conversation_id, registered = registered.len(), "users registered to channel");
        self.conversations
            .broadcast_membership(CrudAction::Create, &conversation, &registered);
        self.conversations
            .broadcast_membership(CrudAction::Update, &conversation, &existing);
        Ok(registered)
    }

    /// Removes the channel together with its messages, participants and notifications.
    pub fn delete_channel(&self, conversation_id: Uuid) -> Result<()> {
        let conversation = self.get_channel(conversation_id)?;
        let audience = self.conversations.audience(&conversation)?;
        self.store.delete_conversation(conversation.id)?;

        info!(%conversation_id, "channel deleted");
        self.conversations.publish(
            &audience,
            &PushEvent::Conversation {
                action: CrudAction::Delete,
                conversation: (&conversation).into(),
            },
        );
        Ok(())
    }
}
