use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use parley_messaging::{MessagingError, authorization};
use parley_types::api::{Claims, CreatePostRequest, DisplayPriorityRequest, MessageQuery, UpdatePostRequest};

use crate::error::{ApiError, run_blocking};
use crate::state::AppState;

/// Answers once the message is stored and broadcast; notifications and
/// unread counters follow in the background.
pub async fn create_message(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let core = state.core.clone();
    let posted = run_blocking(move || core.messages.create_message(course_id, claims.sub, req)).await?;

    debug!(post_id = %posted.post.id, "dispatch continues in background");
    Ok((StatusCode::CREATED, Json(posted.post)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path((course_id, conversation_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = run_blocking(move || {
        let core = &state.core;
        authorization::check_course_for_messaging(state.store().as_ref(), core.gate.as_ref(), course_id, claims.sub)?;
        let conversation = core.conversations.get_conversation(conversation_id)?;
        if conversation.course_id != course_id {
            return Err(MessagingError::ConversationNotFound(conversation_id));
        }
        core.conversations
            .get_messages(conversation.id, claims.sub, query.limit, query.before)
    })
    .await?;

    Ok(Json(messages))
}

pub async fn update_message(
    State(state): State<AppState>,
    Path((course_id, post_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let core = state.core.clone();
    let view = run_blocking(move || core.messages.update_message(course_id, post_id, claims.sub, req)).await?;
    Ok(Json(view))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path((course_id, post_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let core = state.core.clone();
    run_blocking(move || core.messages.delete_message_by_id(course_id, post_id, claims.sub)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn change_display_priority(
    State(state): State<AppState>,
    Path((course_id, post_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<DisplayPriorityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let core = state.core.clone();
    let view = run_blocking(move || {
        core.messages
            .change_display_priority(course_id, post_id, claims.sub, req.display_priority)
    })
    .await?;
    Ok(Json(view))
}
