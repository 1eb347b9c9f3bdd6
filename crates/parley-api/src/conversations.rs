use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_messaging::{MessagingError, authorization};
use parley_types::api::{Claims, FlagRequest, OneToOneChatRequest, UserLoginsRequest};
use parley_types::events::ConversationView;
use parley_types::models::ConversationParticipant;

use crate::error::{ApiError, run_blocking};
use crate::state::AppState;

pub async fn start_group_chat(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UserLoginsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = run_blocking(move || {
        let core = &state.core;
        authorization::check_course_for_messaging(state.store().as_ref(), core.gate.as_ref(), course_id, claims.sub)?;
        core.conversations
            .start_group_chat(course_id, claims.sub, &req.logins)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(ConversationView::from(&chat))))
}

pub async fn start_one_to_one_chat(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OneToOneChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = run_blocking(move || {
        let core = &state.core;
        authorization::check_course_for_messaging(state.store().as_ref(), core.gate.as_ref(), course_id, claims.sub)?;
        core.conversations
            .start_one_to_one_chat(course_id, claims.sub, &req.login)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(ConversationView::from(&chat))))
}

#[derive(Debug, Clone, Copy)]
enum Setting {
    Muted,
    Hidden,
    Favorite,
}

pub async fn set_muted(
    State(state): State<AppState>,
    Path((course_id, conversation_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<FlagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    update_setting(state, course_id, conversation_id, claims, Setting::Muted, req.value).await
}

pub async fn set_hidden(
    State(state): State<AppState>,
    Path((course_id, conversation_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<FlagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    update_setting(state, course_id, conversation_id, claims, Setting::Hidden, req.value).await
}

pub async fn set_favorite(
    State(state): State<AppState>,
    Path((course_id, conversation_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<FlagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    update_setting(state, course_id, conversation_id, claims, Setting::Favorite, req.value).await
}

async fn update_setting(
    state: AppState,
    course_id: Uuid,
    conversation_id: Uuid,
    claims: Claims,
    setting: Setting,
    value: bool,
) -> Result<Json<ConversationParticipant>, ApiError> {
    let participant = run_blocking(move || {
        let conversations = &state.core.conversations;
        if conversations.get_conversation(conversation_id)?.course_id != course_id {
            return Err(MessagingError::ConversationNotFound(conversation_id));
        }
        match setting {
            Setting::Muted => conversations.set_muted(conversation_id, claims.sub, value),
            Setting::Hidden => conversations.set_hidden(conversation_id, claims.sub, value),
            Setting::Favorite => conversations.set_favorite(conversation_id, claims.sub, value),
        }
    })
    .await?;
    Ok(Json(participant))
}
