use std::sync::Arc;

use uuid::Uuid;

use parley_db::ConversationStore;
use parley_types::models::{Conversation, ConversationKind, Course, Role};

use crate::error::{MessagingError, Result};

/// Pure permission predicates. Implementations must not write anything.
pub trait AuthorizationGate: Send + Sync {
    fn has_at_least_role(&self, role: Role, course_id: Uuid, user_id: Uuid) -> Result<bool>;

    /// Instructors of the course, plus explicit channel moderators.
    /// Always false for chats.
    fn has_channel_moderation_rights(&self, conversation: &Conversation, user_id: Uuid) -> Result<bool>;

    /// Whether `user_id` may edit or delete messages written by someone else.
    fn can_edit_others_messages(&self, conversation: &Conversation, user_id: Uuid) -> Result<bool>;
}

/// Gate backed by course roles and participant rows in the store.
pub struct CourseAuthorization {
    store: Arc<dyn ConversationStore>,
}

impl CourseAuthorization {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }
}

impl AuthorizationGate for CourseAuthorization {
    fn has_at_least_role(&self, role: Role, course_id: Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self
            .store
            .course_role(course_id, user_id)?
            .is_some_and(|held| held >= role))
    }

    fn has_channel_moderation_rights(&self, conversation: &Conversation, user_id: Uuid) -> Result<bool> {
        if !matches!(conversation.kind, ConversationKind::Channel(_)) {
            return Ok(false);
        }
        if self.has_at_least_role(Role::Instructor, conversation.course_id, user_id)? {
            return Ok(true);
        }
        Ok(self
            .store
            .find_participant(conversation.id, user_id)?
            .is_some_and(|p| p.is_moderator))
    }

    fn can_edit_others_messages(&self, conversation: &Conversation, user_id: Uuid) -> Result<bool> {
        let Some(channel) = conversation.as_channel() else {
            return Ok(false);
        };
        if self.has_channel_moderation_rights(conversation, user_id)? {
            return Ok(true);
        }
        // Teaching staff moderate the course-wide channels.
        Ok(channel.is_course_wide && self.has_at_least_role(Role::Tutor, conversation.course_id, user_id)?)
    }
}

pub fn require_role(gate: &dyn AuthorizationGate, role: Role, course_id: Uuid, user_id: Uuid) -> Result<()> {
    if gate.has_at_least_role(role, course_id, user_id)? {
        Ok(())
    } else {
        Err(MessagingError::InsufficientRole { required: role })
    }
}

pub fn require_moderation_rights(gate: &dyn AuthorizationGate, conversation: &Conversation, user_id: Uuid) -> Result<()> {
    if gate.has_channel_moderation_rights(conversation, user_id)? {
        Ok(())
    } else {
        Err(MessagingError::NotAllowed(format!(
            "moderation rights in '{}' required",
            conversation.display_name()
        )))
    }
}

/// The course exists, has messaging switched on and `user_id` is at least a student in it.
pub fn check_course_for_messaging(
    store: &dyn ConversationStore,
    gate: &dyn AuthorizationGate,
    course_id: Uuid,
    user_id: Uuid,
) -> Result<Course> {
    let course = store
        .find_course(course_id)?
        .ok_or(MessagingError::CourseNotFound(course_id))?;
    if !course.messaging_enabled {
        return Err(MessagingError::MessagingDisabled { course_id });
    }
    require_role(gate, Role::Student, course_id, user_id)?;
    Ok(course)
}

/// Channel-specific posting rules. Chats have none beyond membership.
pub fn check_may_post(gate: &dyn AuthorizationGate, conversation: &Conversation, user_id: Uuid) -> Result<()> {
    let Some(channel) = conversation.as_channel() else {
        return Ok(());
    };
    if channel.is_archived {
        return Err(MessagingError::ChannelArchived {
            conversation_id: conversation.id,
        });
    }
    if channel.is_announcement && !gate.has_channel_moderation_rights(conversation, user_id)? {
        return Err(MessagingError::NotAllowed(
            "only moderators may post in announcement channels".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_db::Database;
    use parley_types::models::{Channel, ConversationParticipant, User};

    fn seeded() -> (Arc<Database>, Uuid, Vec<Uuid>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let course_id = Uuid::new_v4();
        db.create_course(&Course {
            id: course_id,
            title: "Compilers".into(),
            messaging_enabled: true,
            created_at: Utc::now(),
        })
        .unwrap();

        let mut ids = Vec::new();
        for (login, role) in [("stud", Role::Student), ("tut", Role::Tutor), ("inst", Role::Instructor)] {
            let user = User {
                id: Uuid::new_v4(),
                login: login.into(),
                first_name: login.into(),
                last_name: "X".into(),
                created_at: Utc::now(),
            };
            db.create_user(&user).unwrap();
            db.add_course_member(course_id, user.id, role).unwrap();
            ids.push(user.id);
        }
        (db, course_id, ids)
    }

    #[test]
    fn moderators_and_instructors_moderate_channels() {
        let (db, course_id, ids) = seeded();
        let gate = CourseAuthorization::new(db.clone());
        let channel = Conversation::new(course_id, None, ConversationKind::Channel(Channel::new("general")));
        db.save_conversation(&channel).unwrap();

        assert!(gate.has_channel_moderation_rights(&channel, ids[2]).unwrap());
        assert!(!gate.has_channel_moderation_rights(&channel, ids[0]).unwrap());

        let mut row = ConversationParticipant::new(channel.id, ids[0]);
        row.is_moderator = true;
        db.save_participant(&row).unwrap();
        assert!(gate.has_channel_moderation_rights(&channel, ids[0]).unwrap());
    }

    #[test]
    fn chats_have_no_moderators() {
        let (db, course_id, ids) = seeded();
        let gate = CourseAuthorization::new(db);
        let chat = Conversation::new(course_id, Some(ids[2]), ConversationKind::GroupChat { name: None });
        assert!(!gate.has_channel_moderation_rights(&chat, ids[2]).unwrap());
        assert!(!gate.can_edit_others_messages(&chat, ids[2]).unwrap());
    }

    #[test]
    fn tutors_edit_others_only_in_course_wide_channels() {
        let (db, course_id, ids) = seeded();
        let gate = CourseAuthorization::new(db);
        let mut channel = Channel::new("general");
        let private = Conversation::new(course_id, None, ConversationKind::Channel(channel.clone()));
        channel.is_course_wide = true;
        let course_wide = Conversation::new(course_id, None, ConversationKind::Channel(channel));

        assert!(!gate.can_edit_others_messages(&private, ids[1]).unwrap());
        assert!(gate.can_edit_others_messages(&course_wide, ids[1]).unwrap());
        assert!(!gate.can_edit_others_messages(&course_wide, ids[0]).unwrap());
    }

    #[test]
    fn archived_channels_reject_everyone() {
        let (db, course_id, ids) = seeded();
        let gate = CourseAuthorization::new(db);
        let mut channel = Channel::new("old");
        channel.is_archived = true;
        let conversation = Conversation::new(course_id, None, ConversationKind::Channel(channel));

        for user_id in ids {
            assert!(matches!(
                check_may_post(&gate, &conversation, user_id),
                Err(MessagingError::ChannelArchived { .. })
            ));
        }
    }
}
