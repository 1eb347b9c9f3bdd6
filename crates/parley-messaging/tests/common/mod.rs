#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_db::{ConversationStore, Database};
use parley_gateway::{DeliveryError, PushTransport, Topic};
use parley_messaging::{MessagingCore, PostedMessage};
use parley_types::api::{ChannelDraft, CreatePostRequest};
use parley_types::events::PushEvent;
use parley_types::models::{
    AnswerPost, Conversation, ConversationParticipant, Course, GroupNotification, Notification,
    Post, RecipientSummary, Role, User,
};

/// Push transport that remembers every publish.
#[derive(Default)]
pub struct RecordingTransport {
    pushes: Mutex<Vec<(Topic, PushEvent)>>,
}

impl RecordingTransport {
    pub fn pushes(&self) -> Vec<(Topic, PushEvent)> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn to_topic(&self, topic: Topic) -> Vec<PushEvent> {
        self.pushes()
            .into_iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, e)| e)
            .collect()
    }

    pub fn clear(&self) {
        self.pushes.lock().unwrap().clear();
    }
}

impl PushTransport for RecordingTransport {
    fn publish(&self, topic: &Topic, event: &PushEvent) -> Result<usize, DeliveryError> {
        self.pushes.lock().unwrap().push((*topic, event.clone()));
        Ok(1)
    }
}

/// Store wrapper counting queries for explicit participant lists. Saving
/// notifications can be made to fail.
pub struct CountingStore {
    inner: Arc<Database>,
    participant_list_queries: AtomicUsize,
    reject_notifications: AtomicBool,
}

impl CountingStore {
    pub fn new(inner: Arc<Database>) -> Self {
        Self {
            inner,
            participant_list_queries: AtomicUsize::new(0),
            reject_notifications: AtomicBool::new(false),
        }
    }

    pub fn reject_notifications(&self, reject: bool) {
        self.reject_notifications.store(reject, Ordering::SeqCst);
    }

    pub fn participant_list_queries(&self) -> usize {
        self.participant_list_queries.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.participant_list_queries.fetch_add(1, Ordering::SeqCst);
    }
}

impl ConversationStore for CountingStore {
    fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        self.inner.find_user(id)
    }

    fn find_user_by_login(&self, login: &str) -> Result<Option<User>> {
        self.inner.find_user_by_login(login)
    }

    fn find_users_by_logins(&self, logins: &[String]) -> Result<Vec<User>> {
        self.inner.find_users_by_logins(logins)
    }

    fn find_course(&self, id: Uuid) -> Result<Option<Course>> {
        self.inner.find_course(id)
    }

    fn course_role(&self, course_id: Uuid, user_id: Uuid) -> Result<Option<Role>> {
        self.inner.course_role(course_id, user_id)
    }

    fn find_course_members(&self, course_id: Uuid, roles: &[Role]) -> Result<Vec<User>> {
        self.inner.find_course_members(course_id, roles)
    }

    fn count_members(&self, course_id: Uuid) -> Result<usize> {
        self.inner.count_members(course_id)
    }

    fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.inner.find_conversation(id)
    }

    fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.inner.save_conversation(conversation)
    }

    fn delete_conversation(&self, id: Uuid) -> Result<()> {
        self.inner.delete_conversation(id)
    }

    fn find_channels_by_name(&self, course_id: Uuid, name: &str, exclude: Option<Uuid>) -> Result<Vec<Conversation>> {
        self.inner.find_channels_by_name(course_id, name, exclude)
    }

    fn update_last_message_date(&self, conversation_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.inner.update_last_message_date(conversation_id, at)
    }

    fn find_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<ConversationParticipant>> {
        self.inner.find_participant(conversation_id, user_id)
    }

    fn find_participants(&self, conversation_id: Uuid) -> Result<Vec<ConversationParticipant>> {
        self.count();
        self.inner.find_participants(conversation_id)
    }

    fn find_participants_by_users(&self, conversation_id: Uuid, user_ids: &[Uuid]) -> Result<Vec<ConversationParticipant>> {
        self.count();
        self.inner.find_participants_by_users(conversation_id, user_ids)
    }

    fn save_participant(&self, participant: &ConversationParticipant) -> Result<()> {
        self.inner.save_participant(participant)
    }

    fn insert_participant_if_absent(&self, participant: &ConversationParticipant) -> Result<bool> {
        self.inner.insert_participant_if_absent(participant)
    }

    fn count_participants(&self, conversation_id: Uuid) -> Result<usize> {
        self.inner.count_participants(conversation_id)
    }

    fn course_wide_recipients(&self, course_id: Uuid, conversation_id: Uuid) -> Result<Vec<RecipientSummary>> {
        self.inner.course_wide_recipients(course_id, conversation_id)
    }

    fn participant_recipients(&self, course_id: Uuid, conversation_id: Uuid) -> Result<Vec<RecipientSummary>> {
        self.count();
        self.inner.participant_recipients(course_id, conversation_id)
    }

    fn increment_unread(&self, conversation_id: Uuid, exclude_user_id: Uuid) -> Result<usize> {
        self.inner.increment_unread(conversation_id, exclude_user_id)
    }

    fn decrement_unread(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.inner.decrement_unread(conversation_id, user_id)
    }

    fn set_last_read(&self, user_id: Uuid, conversation_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.inner.set_last_read(user_id, conversation_id, at)
    }

    fn save_post(&self, post: &Post) -> Result<()> {
        self.inner.save_post(post)
    }

    fn find_post(&self, id: Uuid) -> Result<Option<Post>> {
        self.inner.find_post(id)
    }

    fn delete_post(&self, id: Uuid) -> Result<bool> {
        self.inner.delete_post(id)
    }

    fn count_posts(&self, conversation_id: Uuid) -> Result<usize> {
        self.inner.count_posts(conversation_id)
    }

    fn find_posts(&self, conversation_id: Uuid, limit: u32, before: Option<DateTime<Utc>>) -> Result<Vec<Post>> {
        self.inner.find_posts(conversation_id, limit, before)
    }

    fn save_answer(&self, answer: &AnswerPost) -> Result<()> {
        self.inner.save_answer(answer)
    }

    fn save_notification(&self, notification: &Notification) -> Result<bool> {
        if self.reject_notifications.load(Ordering::SeqCst) {
            anyhow::bail!("notifications table is locked");
        }
        self.inner.save_notification(notification)
    }

    fn save_group_notification(&self, notification: &GroupNotification) -> Result<bool> {
        self.inner.save_group_notification(notification)
    }

    fn find_notifications(&self, recipient_id: Uuid) -> Result<Vec<Notification>> {
        self.inner.find_notifications(recipient_id)
    }

    fn find_group_notifications(&self, course_id: Uuid) -> Result<Vec<GroupNotification>> {
        self.inner.find_group_notifications(course_id)
    }
}

/// One course in a fresh in-memory database, wired to a recording transport.
pub struct Fixture {
    pub db: Arc<Database>,
    pub transport: Arc<RecordingTransport>,
    pub core: MessagingCore,
    pub course_id: Uuid,
}

impl Fixture {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Self::over(db.clone(), db)
    }

    /// Same as `new`, with participant-list queries counted.
    pub fn counting() -> (Self, Arc<CountingStore>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let counting = Arc::new(CountingStore::new(db.clone()));
        (Self::over(db, counting.clone()), counting)
    }

    fn over(db: Arc<Database>, store: Arc<dyn ConversationStore>) -> Self {
        let course_id = Uuid::new_v4();
        db.create_course(&Course {
            id: course_id,
            title: "Operating Systems".into(),
            messaging_enabled: true,
            created_at: Utc::now(),
        })
        .unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let core = MessagingCore::with_course_authorization(store, transport.clone());
        Self {
            db,
            transport,
            core,
            course_id,
        }
    }

    pub fn user(&self, login: &str, first_name: &str, last_name: &str, role: Role) -> User {
        let user = User {
            id: Uuid::new_v4(),
            login: login.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            created_at: Utc::now(),
        };
        self.db.create_user(&user).unwrap();
        self.db.add_course_member(self.course_id, user.id, role).unwrap();
        user
    }

    pub fn course_wide_channel(&self, name: &str) -> Conversation {
        let draft = ChannelDraft {
            name: name.into(),
            is_public: true,
            is_course_wide: true,
            ..Default::default()
        };
        self.core.channels.create_channel(self.course_id, draft, None).unwrap()
    }

    /// Private channel created by `creator`, with `members` registered.
    pub fn private_channel(&self, name: &str, creator: &User, members: &[&User]) -> Conversation {
        let draft = ChannelDraft {
            name: name.into(),
            is_public: false,
            ..Default::default()
        };
        let channel = self
            .core
            .channels
            .create_channel(self.course_id, draft, Some(creator.id))
            .unwrap();
        for member in members {
            self.db
                .save_participant(&ConversationParticipant::new(channel.id, member.id))
                .unwrap();
        }
        channel
    }

    pub fn group_chat(&self, creator: &User, members: &[&User]) -> Conversation {
        let logins: Vec<String> = members.iter().map(|u| u.login.clone()).collect();
        self.core
            .conversations
            .start_group_chat(self.course_id, creator.id, &logins)
            .unwrap()
    }

    pub fn try_post(&self, conversation_id: Uuid, author: &User, content: &str) -> parley_messaging::Result<PostedMessage> {
        self.core.messages.create_message(
            self.course_id,
            author.id,
            CreatePostRequest {
                conversation_id,
                title: None,
                content: content.into(),
            },
        )
    }

    pub fn post(&self, conversation: &Conversation, author: &User, content: &str) -> PostedMessage {
        self.try_post(conversation.id, author, content).unwrap()
    }

    /// Join a course-wide channel the way a reader does.
    pub fn open(&self, conversation: &Conversation, user: &User) {
        self.core
            .conversations
            .get_messages(conversation.id, user.id, 50, None)
            .unwrap();
    }

    pub fn unread(&self, conversation: &Conversation, user: &User) -> u32 {
        self.db
            .find_participant(conversation.id, user.id)
            .unwrap()
            .map(|p| p.unread_count)
            .unwrap_or(0)
    }
}
