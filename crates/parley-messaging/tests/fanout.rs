mod common;

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use common::Fixture;
use parley_db::ConversationStore;
use parley_gateway::Topic;
use parley_messaging::{DefaultChannelType, ErrorKind, MessagingError};
use parley_types::api::{ChannelDraft, UpdatePostRequest};
use parley_types::events::{CrudAction, PushEvent};
use parley_types::models::{
    Channel, Conversation, ConversationKind, ConversationParticipant, Course, DisplayPriority,
    NotificationKind, Post, Role, User,
};

#[tokio::test]
async fn course_wide_message_is_one_course_push() {
    let (fx, counting) = Fixture::counting();
    let alice = fx.user("alice", "Alice", "Smith", Role::Instructor);
    for i in 0..5 {
        fx.user(&format!("student{i}"), "Stu", &format!("Dent{i}"), Role::Student);
    }
    let general = fx.course_wide_channel("general");
    fx.transport.clear();

    let posted = fx.post(&general, &alice, "hello everyone");

    let pushes = fx.transport.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].0, Topic::Course(fx.course_id));
    assert!(matches!(
        &pushes[0].1,
        PushEvent::Post { action: CrudAction::Create, notification: None, .. }
    ));

    let outcome = posted.dispatch.await.unwrap();
    assert_eq!(outcome.notifications, 5);
    assert_eq!(outcome.failures, 0);
    assert_eq!(counting.participant_list_queries(), 0);
}

#[tokio::test]
async fn group_chat_message_is_one_push_per_participant() {
    let fx = Fixture::new();
    let alice = fx.user("alice", "Alice", "Smith", Role::Student);
    let bob = fx.user("bob", "Bob", "Jones", Role::Student);
    let carol = fx.user("carol", "Carol", "White", Role::Tutor);
    let chat = fx.group_chat(&alice, &[&bob, &carol]);
    fx.transport.clear();

    let posted = fx.post(&chat, &alice, "study session tonight?");

    let pushes = fx.transport.pushes();
    assert_eq!(pushes.len(), 3);
    for user in [&alice, &bob, &carol] {
        let events = fx.transport.to_topic(Topic::UserConversations(user.id));
        assert_eq!(events.len(), 1, "{}", user.login);
        assert_eq!(events[0].post_id(), Some(posted.post.id));
    }

    // each push is personalised
    let to_alice = fx.transport.to_topic(Topic::UserConversations(alice.id));
    assert!(matches!(&to_alice[0], PushEvent::Post { notification: None, .. }));
    let to_bob = fx.transport.to_topic(Topic::UserConversations(bob.id));
    assert!(matches!(
        &to_bob[0],
        PushEvent::Post { notification: Some(n), .. } if n.kind == NotificationKind::NewMessage
    ));

    let outcome = posted.dispatch.await.unwrap();
    assert_eq!(outcome.notifications, 2);
    assert_eq!(outcome.unread_incremented, 2);
    assert_eq!(fx.unread(&chat, &bob), 1);
    assert_eq!(fx.unread(&chat, &carol), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_messages_never_lose_unread_increments() {
    const AUTHORS: usize = 16;

    let fx = Arc::new(Fixture::new());
    let general = fx.course_wide_channel("general");
    let observers = [
        fx.user("obs1", "Olga", "Server", Role::Student),
        fx.user("obs2", "Oscar", "Viewer", Role::Tutor),
    ];
    for observer in &observers {
        fx.open(&general, observer);
    }
    let authors: Vec<_> = (0..AUTHORS)
        .map(|i| fx.user(&format!("author{i}"), "Au", &format!("Thor{i}"), Role::Student))
        .collect();

    let mut tasks = Vec::new();
    for author in authors {
        let fx = fx.clone();
        let general = general.clone();
        // the runtime handle travels with spawn_blocking, so create_message may spawn
        tasks.push(tokio::task::spawn_blocking(move || fx.post(&general, &author, "ping")));
    }

    let mut latest = None;
    for task in tasks {
        let posted = task.await.unwrap();
        latest = latest.max(Some(posted.post.created_at));
        posted.dispatch.await.unwrap();
    }

    for observer in &observers {
        assert_eq!(fx.unread(&general, observer), AUTHORS as u32, "{}", observer.login);
    }

    let stored = fx.db.find_conversation(general.id).unwrap().unwrap();
    assert_eq!(
        stored.last_message_at.map(|t| t.timestamp_micros()),
        latest.map(|t| t.timestamp_micros())
    );
}

#[tokio::test]
async fn archived_channel_rejects_every_role() {
    let fx = Fixture::new();
    let general = fx.course_wide_channel("general");
    fx.core.channels.archive(general.id).unwrap();
    fx.transport.clear();

    for (i, role) in Role::ALL.into_iter().enumerate() {
        let user = fx.user(&format!("user{i}"), "Some", "One", role);
        let err = fx.try_post(general.id, &user, "anyone there?").err().unwrap();
        assert!(matches!(err, MessagingError::ChannelArchived { .. }), "{:?}", role);
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(fx.db.find_participant(general.id, user.id).unwrap().is_none());
    }

    assert_eq!(fx.db.count_posts(general.id).unwrap(), 0);
    assert!(fx.transport.pushes().is_empty());
}

#[tokio::test]
async fn failed_validation_leaves_no_trace() {
    let fx = Fixture::new();
    let alice = fx.user("alice", "Alice", "Smith", Role::Student);
    fx.user("jdoe", "Jane", "Doe", Role::Student);
    let general = fx.course_wide_channel("general");
    fx.transport.clear();

    let err = fx
        .try_post(general.id, &alice, "hi [user]John Doe(jdoe)[/user]")
        .err()
        .unwrap();
    assert!(matches!(err, MessagingError::MentionNameMismatch { ref login } if login == "jdoe"));

    let err = fx
        .try_post(general.id, &alice, "hi [user]Ghost(ghost)[/user]")
        .err()
        .unwrap();
    assert!(matches!(err, MessagingError::UnknownMentionedUser { .. }));

    let err = fx.try_post(general.id, &alice, "   ").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(fx.db.count_posts(general.id).unwrap(), 0);
    assert!(fx.db.find_participant(general.id, alice.id).unwrap().is_none());
    assert!(fx.transport.pushes().is_empty());
}

#[tokio::test]
async fn mention_reaches_muted_member() {
    let fx = Fixture::new();
    let alice = fx.user("alice", "Alice", "Smith", Role::Tutor);
    let jane = fx.user("jdoe", "Jane", "Doe", Role::Student);
    let carol = fx.user("carol", "Carol", "White", Role::Student);
    let team = fx.private_channel("team", &alice, &[&jane, &carol]);
    fx.core.conversations.set_muted(team.id, jane.id, true).unwrap();
    fx.transport.clear();

    let posted = fx.post(&team, &alice, "ping [user]Jane Doe(jdoe)[/user]");
    let to_jane = fx.transport.to_topic(Topic::UserConversations(jane.id));
    assert!(matches!(
        &to_jane[0],
        PushEvent::Post { notification: Some(n), .. } if n.kind == NotificationKind::Mention
    ));
    posted.dispatch.await.unwrap();

    // without the mention the mute holds
    fx.post(&team, &alice, "general update").dispatch.await.unwrap();

    let for_jane = fx.db.find_notifications(jane.id).unwrap();
    assert_eq!(for_jane.len(), 1);
    assert_eq!(for_jane[0].kind, NotificationKind::Mention);
    assert_eq!(for_jane[0].title, "Alice Smith mentioned you in team");

    let for_carol = fx.db.find_notifications(carol.id).unwrap();
    assert_eq!(for_carol.len(), 2);
    assert!(for_carol.iter().all(|n| n.kind == NotificationKind::NewMessage));

    // muted members still count unread messages
    assert_eq!(fx.unread(&team, &jane), 2);
}

#[tokio::test]
async fn first_message_announces_one_to_one_chat() {
    let fx = Fixture::new();
    let alice = fx.user("alice", "Alice", "Smith", Role::Student);
    let bob = fx.user("bob", "Bob", "Jones", Role::Student);
    let chat = fx
        .core
        .conversations
        .start_one_to_one_chat(fx.course_id, alice.id, "bob")
        .unwrap();
    assert!(fx.transport.pushes().is_empty());

    fx.post(&chat, &alice, "hey").dispatch.await.unwrap();
    for user in [&alice, &bob] {
        let events = fx.transport.to_topic(Topic::UserConversations(user.id));
        assert!(events.iter().any(|e| matches!(
            e,
            PushEvent::Conversation { action: CrudAction::Create, conversation } if conversation.id == chat.id
        )));
    }

    fx.transport.clear();
    fx.post(&chat, &bob, "hi").dispatch.await.unwrap();
    assert!(
        fx.transport
            .pushes()
            .iter()
            .all(|(_, e)| !matches!(e, PushEvent::Conversation { .. }))
    );
}

#[tokio::test]
async fn course_wide_announcement_notifies_every_group() {
    let fx = Fixture::new();
    let instructor = fx.user("prof", "Paula", "Prof", Role::Instructor);
    let student = fx.user("stud", "Sam", "Student", Role::Student);
    let announcements = fx
        .core
        .channels
        .create_default_channel(fx.course_id, DefaultChannelType::Announcement)
        .unwrap();

    let err = fx.try_post(announcements.id, &student, "can I post?").err().unwrap();
    assert!(matches!(err, MessagingError::NotAllowed(_)));

    let outcome = fx
        .post(&announcements, &instructor, "exam moved to friday")
        .dispatch
        .await
        .unwrap();
    assert_eq!(outcome.group_notifications, 4);
    assert_eq!(outcome.notifications, 0);

    let groups: Vec<Role> = fx
        .db
        .find_group_notifications(fx.course_id)
        .unwrap()
        .into_iter()
        .map(|n| n.group)
        .collect();
    for role in Role::ALL {
        assert!(groups.contains(&role), "{:?}", role);
    }
    assert!(fx.db.find_notifications(student.id).unwrap().is_empty());
}

#[tokio::test]
async fn delete_decrements_only_the_actor() {
    let fx = Fixture::new();
    let alice = fx.user("alice", "Alice", "Smith", Role::Student);
    let tutor = fx.user("tim", "Tim", "Tutor", Role::Tutor);
    let carol = fx.user("carol", "Carol", "White", Role::Student);
    let general = fx.course_wide_channel("general");
    fx.open(&general, &tutor);
    fx.open(&general, &carol);

    let first = fx.post(&general, &alice, "one");
    first.dispatch.await.unwrap();
    let second = fx.post(&general, &alice, "two");
    second.dispatch.await.unwrap();
    assert_eq!(fx.unread(&general, &tutor), 2);
    assert_eq!(fx.unread(&general, &carol), 2);

    let err = fx
        .core
        .messages
        .delete_message_by_id(fx.course_id, first.post.id, carol.id)
        .unwrap_err();
    assert!(matches!(err, MessagingError::NotPostOwner { .. }));

    fx.core
        .messages
        .delete_message_by_id(fx.course_id, first.post.id, tutor.id)
        .unwrap();
    assert_eq!(fx.unread(&general, &tutor), 1);
    assert_eq!(fx.unread(&general, &carol), 2);
    assert!(fx.db.find_post(first.post.id).unwrap().is_none());

    // reading resets the counter; deleting afterwards never goes below zero
    fx.open(&general, &tutor);
    fx.core
        .messages
        .delete_message_by_id(fx.course_id, second.post.id, tutor.id)
        .unwrap();
    assert_eq!(fx.unread(&general, &tutor), 0);
    assert_eq!(fx.unread(&general, &carol), 2);
}

#[tokio::test]
async fn deleted_message_is_broadcast_after_the_update() {
    let fx = Fixture::new();
    let alice = fx.user("alice", "Alice", "Smith", Role::Student);
    let general = fx.course_wide_channel("general");
    let posted = fx.post(&general, &alice, "oops");
    posted.dispatch.await.unwrap();
    fx.transport.clear();

    fx.core
        .messages
        .delete_message_by_id(fx.course_id, posted.post.id, alice.id)
        .unwrap();

    let actions: Vec<_> = fx
        .transport
        .to_topic(Topic::Course(fx.course_id))
        .iter()
        .map(|e| (e.post_id().is_some(), e.action()))
        .collect();
    assert_eq!(
        actions,
        vec![(false, Some(CrudAction::Update)), (true, Some(CrudAction::Delete))]
    );
}

#[tokio::test]
async fn author_edits_own_message() {
    let fx = Fixture::new();
    let alice = fx.user("alice", "Alice", "Smith", Role::Student);
    let bob = fx.user("bob", "Bob", "Jones", Role::Student);
    let general = fx.course_wide_channel("general");
    let posted = fx.post(&general, &alice, "draft");
    posted.dispatch.await.unwrap();

    let request = |content: &str| UpdatePostRequest {
        id: posted.post.id,
        title: None,
        content: content.into(),
    };

    let err = fx
        .core
        .messages
        .update_message(fx.course_id, posted.post.id, bob.id, request("hijacked"))
        .unwrap_err();
    assert!(matches!(err, MessagingError::NotPostOwner { .. }));

    let view = fx
        .core
        .messages
        .update_message(fx.course_id, posted.post.id, alice.id, request("final"))
        .unwrap();
    assert_eq!(view.content, "final");
    assert!(view.updated_at.is_some());
    assert_eq!(fx.db.find_post(posted.post.id).unwrap().unwrap().content, "final");
}

#[tokio::test]
async fn pinning_needs_moderation_rights() {
    let fx = Fixture::new();
    let alice = fx.user("alice", "Alice", "Smith", Role::Student);
    let bob = fx.user("bob", "Bob", "Jones", Role::Student);
    let prof = fx.user("prof", "Paula", "Prof", Role::Instructor);
    let general = fx.course_wide_channel("general");
    let posted = fx.post(&general, &alice, "important");
    posted.dispatch.await.unwrap();

    let err = fx
        .core
        .messages
        .change_display_priority(fx.course_id, posted.post.id, bob.id, DisplayPriority::Pinned)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let view = fx
        .core
        .messages
        .change_display_priority(fx.course_id, posted.post.id, prof.id, DisplayPriority::Pinned)
        .unwrap();
    assert_eq!(view.display_priority, DisplayPriority::Pinned);
    assert_eq!(
        fx.db.find_post(posted.post.id).unwrap().unwrap().display_priority,
        DisplayPriority::Pinned
    );
}

#[tokio::test]
async fn private_announcement_ignores_mute_and_hide() {
    let fx = Fixture::new();
    let tutor = fx.user("tim", "Tim", "Tutor", Role::Tutor);
    let muted = fx.user("mia", "Mia", "Quiet", Role::Student);
    let hidden = fx.user("hal", "Hal", "Away", Role::Student);
    let draft = ChannelDraft {
        name: "tutorial-news".into(),
        is_public: false,
        is_announcement: true,
        ..Default::default()
    };
    let news = fx
        .core
        .channels
        .create_channel(fx.course_id, draft, Some(tutor.id))
        .unwrap();
    for member in [&muted, &hidden] {
        fx.db
            .save_participant(&ConversationParticipant::new(news.id, member.id))
            .unwrap();
    }
    fx.core.conversations.set_muted(news.id, muted.id, true).unwrap();
    fx.core.conversations.set_hidden(news.id, hidden.id, true).unwrap();

    let outcome = fx
        .post(&news, &tutor, "sheet 3 is online")
        .dispatch
        .await
        .unwrap();
    assert_eq!(outcome.notifications, 2);
    assert_eq!(outcome.group_notifications, 0);

    for member in [&muted, &hidden] {
        let received = fx.db.find_notifications(member.id).unwrap();
        assert_eq!(received.len(), 1, "{}", member.login);
        assert_eq!(received[0].kind, NotificationKind::Announcement);
    }
    assert!(fx.db.find_notifications(tutor.id).unwrap().is_empty());
    assert!(fx.db.find_group_notifications(fx.course_id).unwrap().is_empty());
}

#[tokio::test]
async fn mention_outside_the_chat_notifies_nobody_new() {
    let fx = Fixture::new();
    let alice = fx.user("alice", "Alice", "Smith", Role::Student);
    let bob = fx.user("bob", "Bob", "Jones", Role::Student);
    let carol = fx.user("carol", "Carol", "White", Role::Student);
    let chat = fx.group_chat(&alice, &[&bob]);

    let outcome = fx
        .post(&chat, &alice, "ask [user]Carol White(carol)[/user] later")
        .dispatch
        .await
        .unwrap();
    assert_eq!(outcome.notifications, 1);
    assert!(fx.db.find_notifications(carol.id).unwrap().is_empty());
    assert!(fx.db.find_participant(chat.id, carol.id).unwrap().is_none());
    assert_eq!(fx.db.find_notifications(bob.id).unwrap()[0].kind, NotificationKind::NewMessage);
}

#[tokio::test]
async fn failed_notification_writes_are_counted_not_returned() {
    let (fx, counting) = Fixture::counting();
    let alice = fx.user("alice", "Alice", "Smith", Role::Student);
    let bob = fx.user("bob", "Bob", "Jones", Role::Student);
    let carol = fx.user("carol", "Carol", "White", Role::Student);
    let chat = fx.group_chat(&alice, &[&bob, &carol]);
    counting.reject_notifications(true);

    let posted = fx.post(&chat, &alice, "still stored");
    let outcome = posted.dispatch.await.unwrap();

    assert_eq!(outcome.failures, 2);
    assert_eq!(outcome.notifications, 0);
    assert_eq!(outcome.unread_incremented, 2);
    assert!(fx.db.find_post(posted.post.id).unwrap().is_some());
    assert_eq!(fx.unread(&chat, &bob), 1);
}

/// A second course with messaging switched off, holding one message by `author`.
fn message_in_closed_course(fx: &Fixture, author: &User) -> Post {
    let course = Course {
        id: Uuid::new_v4(),
        title: "Archived Seminar".into(),
        messaging_enabled: false,
        created_at: Utc::now(),
    };
    fx.db.create_course(&course).unwrap();
    fx.db.add_course_member(course.id, author.id, Role::Instructor).unwrap();

    let mut channel = Channel::new("general");
    channel.is_course_wide = true;
    let conversation = Conversation::new(course.id, None, ConversationKind::Channel(channel));
    fx.db.save_conversation(&conversation).unwrap();

    let post = Post {
        id: Uuid::new_v4(),
        conversation_id: conversation.id,
        author_id: author.id,
        title: None,
        content: "old news".into(),
        created_at: Utc::now(),
        updated_at: None,
        display_priority: DisplayPriority::None,
        answers: Vec::new(),
    };
    fx.db.save_post(&post).unwrap();
    post
}

#[tokio::test]
async fn messages_cannot_be_changed_through_another_course() {
    let fx = Fixture::new();
    let alice = fx.user("alice", "Alice", "Smith", Role::Instructor);
    let post = message_in_closed_course(&fx, &alice);
    fx.transport.clear();

    let err = fx
        .core
        .messages
        .update_message(
            fx.course_id,
            post.id,
            alice.id,
            UpdatePostRequest {
                id: post.id,
                title: None,
                content: "edited elsewhere".into(),
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = fx
        .core
        .messages
        .change_display_priority(fx.course_id, post.id, alice.id, DisplayPriority::Pinned)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = fx
        .core
        .messages
        .delete_message_by_id(fx.course_id, post.id, alice.id)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let stored = fx.db.find_post(post.id).unwrap().unwrap();
    assert_eq!(stored.content, "old news");
    assert_eq!(stored.display_priority, DisplayPriority::None);
    assert!(fx.db.find_participant(post.conversation_id, alice.id).unwrap().is_none());
    assert!(fx.transport.pushes().is_empty());

    // through its own course the disabled-messaging check applies
    let course_id = fx.db.find_conversation(post.conversation_id).unwrap().unwrap().course_id;
    let err = fx
        .core
        .messages
        .delete_message_by_id(course_id, post.id, alice.id)
        .unwrap_err();
    assert!(matches!(err, MessagingError::MessagingDisabled { .. }));
}
