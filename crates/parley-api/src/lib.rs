pub mod channels;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// Every REST route; all of them require a bearer token.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Messages
        .route("/courses/{course_id}/messages", post(messages::create_message))
        .route(
            "/courses/{course_id}/conversations/{conversation_id}/messages",
            get(messages::get_messages),
        )
        .route(
            "/courses/{course_id}/messages/{post_id}",
            put(messages::update_message).delete(messages::delete_message),
        )
        .route(
            "/courses/{course_id}/messages/{post_id}/display-priority",
            put(messages::change_display_priority),
        )
        // Channels
        .route("/courses/{course_id}/channels", post(channels::create_channel))
        .route("/courses/{course_id}/channels/defaults", post(channels::create_default_channels))
        .route(
            "/courses/{course_id}/channels/{channel_id}",
            put(channels::update_channel).delete(channels::delete_channel),
        )
        .route("/courses/{course_id}/channels/{channel_id}/archive", post(channels::archive_channel))
        .route("/courses/{course_id}/channels/{channel_id}/unarchive", post(channels::unarchive_channel))
        .route("/courses/{course_id}/channels/{channel_id}/register", post(channels::register_users))
        .route("/courses/{course_id}/channels/{channel_id}/grant-moderator", post(channels::grant_moderator))
        .route("/courses/{course_id}/channels/{channel_id}/revoke-moderator", post(channels::revoke_moderator))
        // Chats and per-user settings
        .route("/courses/{course_id}/group-chats", post(conversations::start_group_chat))
        .route("/courses/{course_id}/one-to-one-chats", post(conversations::start_one_to_one_chat))
        .route(
            "/courses/{course_id}/conversations/{conversation_id}/muted",
            put(conversations::set_muted),
        )
        .route(
            "/courses/{course_id}/conversations/{conversation_id}/hidden",
            put(conversations::set_hidden),
        )
        .route(
            "/courses/{course_id}/conversations/{conversation_id}/favorite",
            put(conversations::set_favorite),
        )
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state)
}
