use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_db::ConversationStore;
use parley_gateway::Topic;
use parley_types::api::{CreatePostRequest, UpdatePostRequest};
use parley_types::events::{CrudAction, NotificationPayload, PostView, PushEvent};
use parley_types::models::{
    Conversation, ConversationKind, Course, DisplayPriority, GroupNotification, Notification,
    NotificationKind, Post, RecipientSummary, Role, User,
};

use crate::authorization::{self, AuthorizationGate};
use crate::conversations::ConversationService;
use crate::error::{MessagingError, Result};
use crate::filter::RecipientFilter;
use crate::mentions;
use crate::recipients::{self, recipient_ids};

/// A stored message and its background notification task.
///
/// The message is durable and broadcast once this is returned. `dispatch`
/// resolves after stored notifications and unread counters are written;
/// callers that answer a request do not wait for it.
pub struct PostedMessage {
    pub post: PostView,
    pub dispatch: JoinHandle<DispatchOutcome>,
}

/// What the background phase managed to write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub notifications: usize,
    pub group_notifications: usize,
    pub unread_incremented: usize,
    pub failures: usize,
}

/// A message detached from its request, handed to the background phase.
struct CreatedMessage {
    post: Post,
    conversation: Conversation,
    course: Course,
    author: User,
    mentioned: HashSet<Uuid>,
}

impl CreatedMessage {
    fn notification(&self, recipient_id: Uuid, kind: NotificationKind, now: DateTime<Utc>) -> Notification {
        let author_name = self.author.full_name();
        let place = self.conversation.display_name();
        let title = match kind {
            NotificationKind::Mention => format!("{} mentioned you in {}", author_name, place),
            NotificationKind::Announcement => self
                .post
                .title
                .clone()
                .unwrap_or_else(|| format!("New announcement in {}", self.course.title)),
            NotificationKind::NewMessage => format!("New message in {}", place),
        };

        Notification {
            id: Uuid::new_v4(),
            post_id: self.post.id,
            conversation_id: self.conversation.id,
            course_id: self.course.id,
            recipient_id,
            kind,
            title,
            text: self.post.content.clone(),
            author_name,
            created_at: now,
        }
    }

    fn group_notification(&self, group: Role, now: DateTime<Utc>) -> GroupNotification {
        GroupNotification {
            id: Uuid::new_v4(),
            post_id: self.post.id,
            course_id: self.course.id,
            group,
            title: self
                .post
                .title
                .clone()
                .unwrap_or_else(|| format!("New announcement in {}", self.course.title)),
            text: self.post.content.clone(),
            created_at: now,
        }
    }
}

/// Stored notifications owed for one message.
#[derive(Debug, Default)]
struct NotificationPlan {
    notifications: Vec<Notification>,
    group_notifications: Vec<GroupNotification>,
}

impl NotificationPlan {
    fn build(message: &CreatedMessage, recipients: &[RecipientSummary], now: DateTime<Utc>) -> Self {
        let filter = RecipientFilter::for_message(message.author.id, &message.conversation, now);
        let is_announcement = message.conversation.is_announcement_channel();
        let is_course_wide = message.conversation.is_course_wide_channel();

        // Mentions reach only users entitled to the conversation.
        let mentioned: HashSet<Uuid> = recipients
            .iter()
            .filter(|r| message.mentioned.contains(&r.user_id) && filter.may_see(r))
            .map(|r| r.user_id)
            .collect();

        let mut plan = NotificationPlan::default();
        for recipient in recipients {
            if recipient.user_id == message.author.id {
                continue;
            }

            let kind = if mentioned.contains(&recipient.user_id) {
                NotificationKind::Mention
            } else if is_announcement {
                // course-wide announcements go out per group below
                if is_course_wide || !filter.may_see(recipient) {
                    continue;
                }
                NotificationKind::Announcement
            } else if filter.accepts(recipient, &mentioned) {
                NotificationKind::NewMessage
            } else {
                continue;
            };
            plan.notifications
                .push(message.notification(recipient.user_id, kind, now));
        }

        if is_announcement && is_course_wide {
            plan.group_notifications = Role::ALL
                .into_iter()
                .filter(|group| filter.visible_to_students() || *group >= Role::Tutor)
                .map(|group| message.group_notification(group, now))
                .collect();
        }

        plan
    }

    fn payload_for(&self, user_id: Uuid) -> Option<NotificationPayload> {
        self.notifications
            .iter()
            .find(|n| n.recipient_id == user_id)
            .map(NotificationPayload::from)
    }
}

/// Message creation, editing and deletion with their broadcasts and notifications.
#[derive(Clone)]
pub struct MessagingService {
    store: Arc<dyn ConversationStore>,
    gate: Arc<dyn AuthorizationGate>,
    conversations: ConversationService,
}

impl MessagingService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        gate: Arc<dyn AuthorizationGate>,
        conversations: ConversationService,
    ) -> Self {
        Self {
            store,
            gate,
            conversations,
        }
    }

    /// Validates, stores and broadcasts a new message, then hands stored
    /// notifications and unread counters to a background task.
    ///
    /// Must run inside a Tokio runtime. Validation and authorization failures
    /// leave no trace.
    pub fn create_message(&self, course_id: Uuid, author_id: Uuid, request: CreatePostRequest) -> Result<PostedMessage> {
        // -- Validating --
        if request.content.trim().is_empty() {
            return Err(MessagingError::InvalidRequest("message content must not be empty".into()));
        }
        let course = authorization::check_course_for_messaging(self.store.as_ref(), self.gate.as_ref(), course_id, author_id)?;
        let conversation = self.conversations.get_conversation(request.conversation_id)?;
        require_same_course(&conversation, course_id)?;
        authorization::check_may_post(self.gate.as_ref(), &conversation, author_id)?;
        let mentioned = mentions::parse_mentions(self.store.as_ref(), course_id, &request.content)?;
        let author = self
            .store
            .find_user(author_id)?
            .ok_or_else(|| MessagingError::UserNotFound(author_id.to_string()))?;
        let mut conversation = self
            .conversations
            .is_member_or_create_for_course_wide(conversation.id, author_id)?;

        // -- Persisted --
        let now = Utc::now();
        let post = Post {
            id: Uuid::new_v4(),
            conversation_id: conversation.id,
            author_id,
            title: request.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
            content: request.content,
            created_at: now,
            updated_at: None,
            display_priority: DisplayPriority::None,
            answers: vec![],
        };
        self.store.save_post(&post)?;
        self.store.update_last_message_date(conversation.id, now)?;
        conversation.last_message_at = conversation.last_message_at.max(Some(now));
        self.advance_author_read(author_id, conversation.id, now);

        let author_role = self.store.course_role(course_id, author_id)?;
        let view = PostView::with_hidden_details(&post, &conversation, author_role);
        info!(post_id = %post.id, conversation_id = %conversation.id, %author_id, "message created");

        let message = CreatedMessage {
            post,
            conversation,
            course,
            author,
            mentioned: mentioned.iter().map(|u| u.id).collect(),
        };

        // -- Broadcasting --
        let plan = self.broadcast_created(&message, &view, now);

        // -- NotificationsDispatched --
        let store = self.store.clone();
        let dispatch = tokio::task::spawn_blocking(move || dispatch_notifications(store.as_ref(), &message, plan, now));

        Ok(PostedMessage { post: view, dispatch })
    }

    /// Marks the message as read for its author without holding up the caller.
    fn advance_author_read(&self, author_id: Uuid, conversation_id: Uuid, at: DateTime<Utc>) {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.set_last_read(author_id, conversation_id, at) {
                warn!(%conversation_id, %author_id, "failed to advance last read: {}", e);
            }
        });
    }

    /// Visible course-wide channels get a single push on the course topic and
    /// their recipients are resolved later. Everything else needs the
    /// recipients now to address one push per user, each carrying that user's
    /// notification; the computed plan is reused by the background phase.
    fn broadcast_created(&self, message: &CreatedMessage, view: &PostView, now: DateTime<Utc>) -> Option<NotificationPlan> {
        let conversation = &message.conversation;
        let created = |notification: Option<NotificationPayload>| PushEvent::Post {
            action: CrudAction::Create,
            post: view.clone(),
            notification,
        };

        let course_wide_visible = conversation
            .as_channel()
            .is_some_and(|c| c.is_course_wide && c.is_visible_to_students(now));
        if course_wide_visible {
            let delivered = self
                .conversations
                .publish_to(&Topic::Course(conversation.course_id), &created(None));
            debug!(post_id = %view.id, delivered, "course broadcast sent");
            return None;
        }

        let filter = RecipientFilter::for_message(message.author.id, conversation, now);
        let recipients: Vec<RecipientSummary> = match recipients::resolve_recipients(self.store.as_ref(), conversation) {
            Ok(all) => all.into_iter().filter(|r| filter.may_see(r)).collect(),
            Err(e) => {
                warn!(post_id = %view.id, "could not resolve recipients, live broadcast skipped: {}", e);
                return None;
            }
        };
        let plan = NotificationPlan::build(message, &recipients, now);

        if matches!(conversation.kind, ConversationKind::OneToOneChat) {
            // the first message makes the chat appear for both sides
            match self.store.count_posts(conversation.id) {
                Ok(1) => self
                    .conversations
                    .broadcast_membership(CrudAction::Create, conversation, &recipient_ids(&recipients)),
                Ok(_) => {}
                Err(e) => warn!(conversation_id = %conversation.id, "could not count messages: {}", e),
            }
        }

        let mut delivered = 0;
        for recipient in &recipients {
            let event = created(plan.payload_for(recipient.user_id));
            delivered += self
                .conversations
                .publish_to(&Topic::UserConversations(recipient.user_id), &event);
        }
        debug!(post_id = %view.id, recipients = recipients.len(), delivered, "per-recipient broadcast sent");

        Some(plan)
    }

    pub fn update_message(
        &self,
        course_id: Uuid,
        post_id: Uuid,
        actor_id: Uuid,
        request: UpdatePostRequest,
    ) -> Result<PostView> {
        if request.id != post_id {
            return Err(MessagingError::InvalidRequest("message id does not match the path".into()));
        }
        if request.content.trim().is_empty() {
            return Err(MessagingError::InvalidRequest("message content must not be empty".into()));
        }

        let mut post = self.find_post(post_id)?;
        let conversation = self.may_update_or_delete(&post, actor_id)?;
        require_same_course(&conversation, course_id)?;
        authorization::check_course_for_messaging(self.store.as_ref(), self.gate.as_ref(), course_id, actor_id)?;
        mentions::parse_mentions(self.store.as_ref(), course_id, &request.content)?;

        post.content = request.content;
        post.title = request.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        post.updated_at = Some(Utc::now());
        self.store.save_post(&post)?;

        let view = self.view_of(&post, &conversation)?;
        self.broadcast_post(&conversation, CrudAction::Update, &view);
        Ok(view)
    }

    pub fn delete_message_by_id(&self, course_id: Uuid, post_id: Uuid, actor_id: Uuid) -> Result<()> {
        let post = self.find_post(post_id)?;
        let conversation = self.may_update_or_delete(&post, actor_id)?;
        require_same_course(&conversation, course_id)?;
        authorization::check_course_for_messaging(self.store.as_ref(), self.gate.as_ref(), course_id, actor_id)?;
        let view = self.view_of(&post, &conversation)?;

        self.store.delete_post(post.id)?;
        self.store.decrement_unread(conversation.id, actor_id)?;
        info!(%post_id, %actor_id, "message deleted");

        // refresh aggregate state first, then drop the message itself
        let conversation = self.conversations.get_conversation(conversation.id)?;
        if let Err(e) = self.conversations.notify_members_about_update(&conversation) {
            warn!(conversation_id = %conversation.id, "conversation update broadcast failed: {}", e);
        }
        self.broadcast_post(&conversation, CrudAction::Delete, &view);
        Ok(())
    }

    /// Pin or archive a message. Channels need moderation rights, group chats
    /// need their creator.
    pub fn change_display_priority(
        &self,
        course_id: Uuid,
        post_id: Uuid,
        actor_id: Uuid,
        priority: DisplayPriority,
    ) -> Result<PostView> {
        let mut post = self.find_post(post_id)?;
        require_same_course(&self.conversations.get_conversation(post.conversation_id)?, course_id)?;
        authorization::check_course_for_messaging(self.store.as_ref(), self.gate.as_ref(), course_id, actor_id)?;
        let conversation = self
            .conversations
            .is_member_or_create_for_course_wide(post.conversation_id, actor_id)?;

        let allowed = match &conversation.kind {
            ConversationKind::Channel(_) => self.gate.has_channel_moderation_rights(&conversation, actor_id)?,
            ConversationKind::GroupChat { .. } => conversation.creator_id == Some(actor_id),
            ConversationKind::OneToOneChat => true,
        };
        if !allowed {
            return Err(MessagingError::NotAllowed(
                "not allowed to change the display priority of messages in this conversation".into(),
            ));
        }

        post.display_priority = priority;
        self.store.save_post(&post)?;

        let view = self.view_of(&post, &conversation)?;
        self.broadcast_post(&conversation, CrudAction::Update, &view);
        Ok(view)
    }

    fn find_post(&self, post_id: Uuid) -> Result<Post> {
        self.store
            .find_post(post_id)?
            .ok_or(MessagingError::PostNotFound(post_id))
    }

    fn view_of(&self, post: &Post, conversation: &Conversation) -> Result<PostView> {
        let role = self.store.course_role(conversation.course_id, post.author_id)?;
        Ok(PostView::with_hidden_details(post, conversation, role))
    }

    /// Authors may change their own messages; channel staff may change anyone's.
    /// Archived channels are frozen for everybody.
    fn may_update_or_delete(&self, post: &Post, actor_id: Uuid) -> Result<Conversation> {
        let conversation = self.conversations.get_conversation(post.conversation_id)?;

        let allowed = post.author_id == actor_id || self.gate.can_edit_others_messages(&conversation, actor_id)?;
        if !allowed {
            return Err(MessagingError::NotPostOwner { post_id: post.id });
        }
        if conversation.as_channel().is_some_and(|c| c.is_archived) {
            return Err(MessagingError::ChannelArchived {
                conversation_id: conversation.id,
            });
        }
        Ok(conversation)
    }

    fn broadcast_post(&self, conversation: &Conversation, action: CrudAction, view: &PostView) {
        let event = PushEvent::Post {
            action,
            post: view.clone(),
            notification: None,
        };
        match self.conversations.audience(conversation) {
            Ok(audience) => {
                let delivered = self.conversations.publish(&audience, &event);
                debug!(post_id = %view.id, ?action, delivered, "post broadcast sent");
            }
            Err(e) => warn!(post_id = %view.id, "could not resolve broadcast audience: {}", e),
        }
    }
}

/// Course checks run against the course in the request, so the message's
/// conversation must live in that course.
fn require_same_course(conversation: &Conversation, course_id: Uuid) -> Result<()> {
    if conversation.course_id != course_id {
        return Err(MessagingError::InvalidRequest("conversation does not belong to this course".into()));
    }
    Ok(())
}

/// Background phase: stored notifications, announcement fan-out and unread
/// counters. Each failure is logged and isolated; nothing is retried and
/// nothing is rolled back.
fn dispatch_notifications(
    store: &dyn ConversationStore,
    message: &CreatedMessage,
    plan: Option<NotificationPlan>,
    now: DateTime<Utc>,
) -> DispatchOutcome {
    let post_id = message.post.id;
    let mut outcome = DispatchOutcome::default();

    let plan = match plan {
        Some(plan) => plan,
        None => match recipients::resolve_recipients(store, &message.conversation) {
            Ok(recipients) => NotificationPlan::build(message, &recipients, now),
            Err(e) => {
                let err = undelivered(post_id, e.context("could not resolve notification recipients"));
                error!(%post_id, "{}", err);
                outcome.failures += 1;
                NotificationPlan::default()
            }
        },
    };

    for notification in &plan.notifications {
        match store.save_notification(notification) {
            Ok(true) => outcome.notifications += 1,
            Ok(false) => {}
            Err(e) => {
                let err = undelivered(post_id, e.context("notification not stored"));
                warn!(recipient_id = %notification.recipient_id, "{}", err);
                outcome.failures += 1;
            }
        }
    }

    for notification in &plan.group_notifications {
        match store.save_group_notification(notification) {
            Ok(true) => outcome.group_notifications += 1,
            Ok(false) => {}
            Err(e) => {
                let err = undelivered(post_id, e.context("group notification not stored"));
                warn!(group = notification.group.as_str(), "{}", err);
                outcome.failures += 1;
            }
        }
    }

    match store.increment_unread(message.conversation.id, message.author.id) {
        Ok(touched) => outcome.unread_incremented = touched,
        Err(e) => {
            let err = undelivered(post_id, e.context("unread counters not incremented"));
            error!("{}", err);
            outcome.failures += 1;
        }
    }

    debug!(
        %post_id,
        notifications = outcome.notifications,
        groups = outcome.group_notifications,
        unread = outcome.unread_incremented,
        failures = outcome.failures,
        "notifications dispatched"
    );
    outcome
}

fn undelivered(post_id: Uuid, source: anyhow::Error) -> MessagingError {
    MessagingError::NotificationsNotDelivered { post_id, source }
}
