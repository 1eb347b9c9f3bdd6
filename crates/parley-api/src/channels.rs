use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_messaging::{MessagingCore, MessagingError, authorization};
use parley_types::api::{ChannelDraft, ChannelPatch, Claims, RegisterUsersRequest, UserLoginsRequest};
use parley_types::events::ConversationView;
use parley_types::models::{Conversation, Role};

use crate::error::{ApiError, run_blocking};
use crate::state::AppState;

/// Loads a channel of `course_id` that `user_id` may moderate.
fn moderated_channel(core: &MessagingCore, course_id: Uuid, channel_id: Uuid, user_id: Uuid) -> parley_messaging::Result<Conversation> {
    authorization::check_course_for_messaging(
        core.conversations.store().as_ref(),
        core.gate.as_ref(),
        course_id,
        user_id,
    )?;
    let channel = core.channels.get_channel(channel_id)?;
    if channel.course_id != course_id {
        return Err(MessagingError::ConversationNotFound(channel_id));
    }
    authorization::require_moderation_rights(core.gate.as_ref(), &channel, user_id)?;
    Ok(channel)
}

/// Tutors may open channels; course-wide and announcement channels need an instructor.
pub async fn create_channel(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(draft): Json<ChannelDraft>,
) -> Result<impl IntoResponse, ApiError> {
    let core = state.core.clone();
    let channel = run_blocking(move || {
        authorization::check_course_for_messaging(
            core.conversations.store().as_ref(),
            core.gate.as_ref(),
            course_id,
            claims.sub,
        )?;
        let required = if draft.is_course_wide || draft.is_announcement {
            Role::Instructor
        } else {
            Role::Tutor
        };
        authorization::require_role(core.gate.as_ref(), required, course_id, claims.sub)?;
        core.channels.create_channel(course_id, draft, Some(claims.sub))
    })
    .await?;

    Ok((StatusCode::CREATED, Json(ConversationView::from(&channel))))
}

pub async fn create_default_channels(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let core = state.core.clone();
    let channels = run_blocking(move || {
        authorization::require_role(core.gate.as_ref(), Role::Instructor, course_id, claims.sub)?;
        core.channels.create_default_channels(course_id)
    })
    .await?;

    let views: Vec<ConversationView> = channels.iter().map(ConversationView::from).collect();
    Ok((StatusCode::CREATED, Json(views)))
}

pub async fn update_channel(
    State(state): State<AppState>,
    Path((course_id, channel_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(patch): Json<ChannelPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let core = state.core.clone();
    let channel = run_blocking(move || {
        moderated_channel(&core, course_id, channel_id, claims.sub)?;
        core.channels.update_channel(channel_id, course_id, patch)
    })
    .await?;
    Ok(Json(ConversationView::from(&channel)))
}

pub async fn archive_channel(
    State(state): State<AppState>,
    Path((course_id, channel_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let core = state.core.clone();
    let channel = run_blocking(move || {
        moderated_channel(&core, course_id, channel_id, claims.sub)?;
        core.channels.archive(channel_id)
    })
    .await?;
    Ok(Json(ConversationView::from(&channel)))
}

pub async fn unarchive_channel(
    State(state): State<AppState>,
    Path((course_id, channel_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let core = state.core.clone();
    let channel = run_blocking(move || {
        moderated_channel(&core, course_id, channel_id, claims.sub)?;
        core.channels.unarchive(channel_id)
    })
    .await?;
    Ok(Json(ConversationView::from(&channel)))
}

pub async fn delete_channel(
    State(state): State<AppState>,
    Path((course_id, channel_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let core = state.core.clone();
    run_blocking(move || {
        moderated_channel(&core, course_id, channel_id, claims.sub)?;
        core.channels.delete_channel(channel_id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn register_users(
    State(state): State<AppState>,
    Path((course_id, channel_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterUsersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let core = state.core.clone();
    let registered = run_blocking(move || {
        moderated_channel(&core, course_id, channel_id, claims.sub)?;
        core.channels.register_users_to_channel(course_id, channel_id, &req)
    })
    .await?;
    Ok(Json(registered))
}

pub async fn grant_moderator(
    State(state): State<AppState>,
    Path((course_id, channel_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UserLoginsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    set_moderator(state, course_id, channel_id, claims, req, true).await
}

pub async fn revoke_moderator(
    State(state): State<AppState>,
    Path((course_id, channel_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UserLoginsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    set_moderator(state, course_id, channel_id, claims, req, false).await
}

async fn set_moderator(
    state: AppState,
    course_id: Uuid,
    channel_id: Uuid,
    claims: Claims,
    req: UserLoginsRequest,
    is_moderator: bool,
) -> Result<StatusCode, ApiError> {
    let core = state.core.clone();
    run_blocking(move || {
        moderated_channel(&core, course_id, channel_id, claims.sub)?;
        let user_ids: Vec<Uuid> = core
            .conversations
            .resolve_users(&req.logins)?
            .iter()
            .map(|u| u.id)
            .collect();
        if is_moderator {
            core.channels.grant_moderator(channel_id, &user_ids)
        } else {
            core.channels.revoke_moderator(channel_id, &user_ids)
        }
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
