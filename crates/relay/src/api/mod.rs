pub mod groups;
pub mod notifications;

use std::sync::Arc;

use axum::{
    middleware,
    response::{IntoResponse, Response},
    Router,
};

use crate::{
    auth::{jwt::JwtAccessTokenService, middleware::require_bearer_auth},
    error::{ErrorCode, RelayError},
    notify::NotificationDispatcher,
    realtime::RealtimeHub,
    store::{Store, StoreError},
    voting::{VotingError, VotingPolicy},
};

/// Everything a handler needs. Shared by the HTTP routes and the socket.
#[derive(Debug, Clone)]
pub struct ApiState {
    pub store: Store,
    pub hub: Arc<RealtimeHub>,
    pub notifier: NotificationDispatcher,
    pub voting_policy: VotingPolicy,
}

impl ApiState {
    pub fn new(store: Store, hub: Arc<RealtimeHub>, voting_policy: VotingPolicy) -> Self {
        let notifier = NotificationDispatcher::new(store.clone(), Arc::clone(&hub));
        Self { store, hub, notifier, voting_policy }
    }
}

/// Bearer-authenticated `/v1` routes for groups, voting and the notification inbox.
pub fn router(state: ApiState, jwt_service: Arc<JwtAccessTokenService>) -> Router {
    Router::new()
        .merge(groups::routes())
        .merge(notifications::routes())
        .with_state(state)
        .route_layer(middleware::from_fn_with_state(jwt_service, require_bearer_auth))
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: ErrorCode, message: String },
    Forbidden { message: String },
    NotFound { message: String },
    Invalid(RelayError),
    Internal(anyhow::Error),
}

impl ApiError {
    fn bad_request(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::BadRequest { code, message: message.into() }
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden { message: message.into() }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    fn internal(error: anyhow::Error) -> Self {
        Self::Internal(error)
    }
}

impl From<RelayError> for ApiError {
    fn from(error: RelayError) -> Self {
        Self::Invalid(error)
    }
}

impl From<VotingError> for ApiError {
    fn from(error: VotingError) -> Self {
        let message = error.to_string();
        match error {
            VotingError::NoCandidates
            | VotingError::DuplicateCandidate(_)
            | VotingError::InvalidDuration(_) => {
                Self::bad_request(ErrorCode::ValidationFailed, message)
            }
            VotingError::NotAdmin | VotingError::NotMember => Self::forbidden(message),
            VotingError::Inactive | VotingError::Ended => {
                Self::bad_request(ErrorCode::VotingInactive, message)
            }
            VotingError::UnknownCandidate(_) => Self::not_found(message),
            VotingError::DuplicateVote(_) => Self::bad_request(ErrorCode::DuplicateVote, message),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::GroupNotFound | StoreError::NotificationNotFound => {
                Self::not_found(error.to_string())
            }
            StoreError::NotRecipient => Self::forbidden(error.to_string()),
            StoreError::AlreadyMember => {
                Self::bad_request(ErrorCode::AlreadyMember, error.to_string())
            }
            StoreError::GroupFull => Self::bad_request(ErrorCode::GroupFull, error.to_string()),
            StoreError::Voting(voting) => voting.into(),
            StoreError::Corrupt(_) | StoreError::Database(_) => Self::internal(error.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest { code, message } => RelayError::new(code, message).into_response(),
            Self::Forbidden { message } => {
                RelayError::new(ErrorCode::AuthForbidden, message).into_response()
            }
            Self::NotFound { message } => {
                RelayError::new(ErrorCode::NotFound, message).into_response()
            }
            Self::Invalid(error) => error.into_response(),
            Self::Internal(error) => {
                tracing::error!(error = ?error, "api internal error");
                RelayError::from_code(ErrorCode::InternalError).into_response()
            }
        }
    }
}
