use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_db::ConversationStore;
use parley_gateway::{PushTransport, Topic};
use parley_types::events::{ConversationView, CrudAction, PostView, PushEvent};
use parley_types::models::{Conversation, ConversationKind, ConversationParticipant, Role, User};

use crate::error::{MessagingError, Result};

/// Group chats stay small; bigger audiences belong in a channel.
pub const MAX_GROUP_CHAT_PARTICIPANTS: usize = 10;

const MAX_PAGE_SIZE: u32 = 200;

/// Who receives a conversation-level broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// One push on the course topic reaches every member.
    Course(Uuid),
    /// One push per user topic.
    Users(Vec<Uuid>),
}

/// Membership, per-user settings and conversation broadcasts.
#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    transport: Arc<dyn PushTransport>,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ConversationStore>, transport: Arc<dyn PushTransport>) -> Self {
        Self { store, transport }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn get_conversation(&self, conversation_id: Uuid) -> Result<Conversation> {
        self.store
            .find_conversation(conversation_id)?
            .ok_or(MessagingError::ConversationNotFound(conversation_id))
    }

    /// Loads the conversation and checks that `user_id` belongs to it.
    ///
    /// Course-wide channels have implicit membership: any course member who may
    /// see the channel gets a participant row on first access. Instructors join
    /// as moderators.
    pub fn is_member_or_create_for_course_wide(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Conversation> {
        let conversation = self.get_conversation(conversation_id)?;

        match conversation.as_channel() {
            Some(channel) if channel.is_course_wide => {
                let role = self
                    .store
                    .course_role(conversation.course_id, user_id)?
                    .ok_or_else(|| MessagingError::NotAllowed("not a member of this course".into()))?;
                if role < Role::Tutor && !channel.is_visible_to_students(Utc::now()) {
                    return Err(MessagingError::NotAllowed("this channel is not visible yet".into()));
                }

                let mut row = ConversationParticipant::new(conversation.id, user_id);
                row.is_moderator = role >= Role::Instructor;
                row.last_read = Some(Utc::now());
                if self.store.insert_participant_if_absent(&row)? {
                    debug!(conversation_id = %conversation.id, %user_id, "joined course-wide channel");
                }
            }
            _ => {
                if !self.store.is_member(conversation.id, user_id)? {
                    return Err(MessagingError::NotAllowed("not a member of this conversation".into()));
                }
            }
        }

        Ok(conversation)
    }

    // -- Broadcasts --

    pub fn audience(&self, conversation: &Conversation) -> Result<Audience> {
        let audience = match conversation.as_channel() {
            Some(channel) if channel.is_course_wide => {
                if channel.is_visible_to_students(Utc::now()) {
                    Audience::Course(conversation.course_id)
                } else {
                    let staff = self
                        .store
                        .course_wide_recipients(conversation.course_id, conversation.id)?
                        .into_iter()
                        .filter(|r| r.is_at_least_tutor)
                        .map(|r| r.user_id)
                        .collect();
                    Audience::Users(staff)
                }
            }
            _ => Audience::Users(
                self.store
                    .find_participants(conversation.id)?
                    .into_iter()
                    .map(|p| p.user_id)
                    .collect(),
            ),
        };
        Ok(audience)
    }

    /// Best effort: failures are logged per topic and never surfaced.
    pub fn publish(&self, audience: &Audience, event: &PushEvent) -> usize {
        match audience {
            Audience::Course(course_id) => self.publish_to(&Topic::Course(*course_id), event),
            Audience::Users(user_ids) => user_ids
                .iter()
                .map(|user_id| self.publish_to(&Topic::UserConversations(*user_id), event))
                .sum(),
        }
    }

    pub fn publish_to(&self, topic: &Topic, event: &PushEvent) -> usize {
        match self.transport.publish(topic, event) {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!(%topic, "push failed: {}", e);
                0
            }
        }
    }

    pub fn notify_members_about_update(&self, conversation: &Conversation) -> Result<()> {
        let audience = self.audience(conversation)?;
        self.publish(
            &audience,
            &PushEvent::Conversation {
                action: CrudAction::Update,
                conversation: ConversationView::from(conversation),
            },
        );
        Ok(())
    }

    pub fn broadcast_membership(&self, action: CrudAction, conversation: &Conversation, user_ids: &[Uuid]) {
        let event = PushEvent::Conversation {
            action,
            conversation: ConversationView::from(conversation),
        };
        self.publish(&Audience::Users(user_ids.to_vec()), &event);
    }

    // -- Users --

    /// Every login must resolve.
    pub fn resolve_users(&self, logins: &[String]) -> Result<Vec<User>> {
        let users = self.store.find_users_by_logins(logins)?;
        if let Some(missing) = logins.iter().find(|l| !users.iter().any(|u| &u.login == *l)) {
            return Err(MessagingError::UserNotFound(missing.clone()));
        }
        Ok(users)
    }

    fn require_course_member(&self, course_id: Uuid, user: &User) -> Result<Role> {
        self.store
            .course_role(course_id, user.id)?
            .ok_or_else(|| MessagingError::InvalidRequest(format!("{} is not a member of this course", user.login)))
    }

    // -- Chats --

    pub fn start_group_chat(&self, course_id: Uuid, creator_id: Uuid, member_logins: &[String]) -> Result<Conversation> {
        let creator = self
            .store
            .find_user(creator_id)?
            .ok_or_else(|| MessagingError::UserNotFound(creator_id.to_string()))?;
        self.require_course_member(course_id, &creator)?;

        let mut member_ids = vec![creator.id];
        for user in self.resolve_users(member_logins)? {
            self.require_course_member(course_id, &user)?;
            if !member_ids.contains(&user.id) {
                member_ids.push(user.id);
            }
        }
        if member_ids.len() < 2 {
            return Err(MessagingError::InvalidRequest("a group chat needs at least one other member".into()));
        }
        if member_ids.len() > MAX_GROUP_CHAT_PARTICIPANTS {
            return Err(MessagingError::InvalidRequest(format!(
                "a group chat can have at most {} members",
                MAX_GROUP_CHAT_PARTICIPANTS
            )));
        }

        let conversation = Conversation::new(course_id, Some(creator_id), ConversationKind::GroupChat { name: None });
        self.store.save_conversation(&conversation)?;
        for user_id in &member_ids {
            self.store
                .save_participant(&ConversationParticipant::new(conversation.id, *user_id))?;
        }

        info!(conversation_id = %conversation.id, members = member_ids.len(), "group chat created");
        self.broadcast_membership(CrudAction::Create, &conversation, &member_ids);
        Ok(conversation)
    }

    /// The chat stays silent until its first message announces it to both sides.
    pub fn start_one_to_one_chat(&self, course_id: Uuid, creator_id: Uuid, other_login: &str) -> Result<Conversation> {
        let creator = self
            .store
            .find_user(creator_id)?
            .ok_or_else(|| MessagingError::UserNotFound(creator_id.to_string()))?;
        let other = self
            .store
            .find_user_by_login(other_login)?
            .ok_or_else(|| MessagingError::UserNotFound(other_login.to_string()))?;
        if other.id == creator.id {
            return Err(MessagingError::InvalidRequest("cannot start a chat with yourself".into()));
        }
        self.require_course_member(course_id, &creator)?;
        self.require_course_member(course_id, &other)?;

        let conversation = Conversation::new(course_id, Some(creator_id), ConversationKind::OneToOneChat);
        self.store.save_conversation(&conversation)?;
        for user_id in [creator.id, other.id] {
            self.store
                .save_participant(&ConversationParticipant::new(conversation.id, user_id))?;
        }

        info!(conversation_id = %conversation.id, "one-to-one chat created");
        Ok(conversation)
    }

    // -- Per-user settings --

    pub fn set_muted(&self, conversation_id: Uuid, user_id: Uuid, is_muted: bool) -> Result<ConversationParticipant> {
        self.update_settings(conversation_id, user_id, |p| p.is_muted = is_muted)
    }

    pub fn set_hidden(&self, conversation_id: Uuid, user_id: Uuid, is_hidden: bool) -> Result<ConversationParticipant> {
        self.update_settings(conversation_id, user_id, |p| p.is_hidden = is_hidden)
    }

    pub fn set_favorite(&self, conversation_id: Uuid, user_id: Uuid, is_favorite: bool) -> Result<ConversationParticipant> {
        self.update_settings(conversation_id, user_id, |p| p.is_favorite = is_favorite)
    }

    fn update_settings(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        apply: impl FnOnce(&mut ConversationParticipant),
    ) -> Result<ConversationParticipant> {
        self.is_member_or_create_for_course_wide(conversation_id, user_id)?;
        let mut participant = self
            .store
            .find_participant(conversation_id, user_id)?
            .ok_or_else(|| MessagingError::NotAllowed("not a member of this conversation".into()))?;
        apply(&mut participant);
        self.store.save_participant(&participant)?;
        Ok(participant)
    }

    // -- Reading --

    /// A page of messages, newest first. Reading marks the conversation as read.
    pub fn get_messages(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<PostView>> {
        let conversation = self.is_member_or_create_for_course_wide(conversation_id, user_id)?;
        let posts = self
            .store
            .find_posts(conversation.id, limit.clamp(1, MAX_PAGE_SIZE), before)?;

        // Author roles are looked up now, not stored with the post.
        let authors: HashSet<Uuid> = posts.iter().map(|p| p.author_id).collect();
        let mut roles: HashMap<Uuid, Option<Role>> = HashMap::with_capacity(authors.len());
        for author_id in authors {
            roles.insert(author_id, self.store.course_role(conversation.course_id, author_id)?);
        }

        let views = posts
            .iter()
            .map(|post| {
                let role = roles.get(&post.author_id).copied().flatten();
                PostView::with_hidden_details(post, &conversation, role)
            })
            .collect();

        self.store.set_last_read(user_id, conversation.id, Utc::now())?;
        Ok(views)
    }
}
