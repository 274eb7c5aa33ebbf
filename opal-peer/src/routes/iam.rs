//! IAM mutate/reload peer handlers
//!
//! The coordinator mutates the IAM backing store, then fans these calls out
//! so every node evicts or re-reads the affected entries. All handlers are
//! idempotent.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;

use super::require;
use crate::error::{PeerError, PeerResult};
use crate::iam::UserType;
use crate::state::PeerServices;

pub async fn delete_policy(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<StatusCode> {
    services.object_layer()?;
    let policy = require(&params, "policy")?;
    services
        .iam
        .delete_policy(policy)
        .await
        .map_err(PeerError::other)?;
    Ok(StatusCode::OK)
}

pub async fn load_policy(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<StatusCode> {
    services.object_layer()?;
    let policy = require(&params, "policy")?;
    services
        .iam
        .load_policy(policy)
        .await
        .map_err(PeerError::other)?;
    Ok(StatusCode::OK)
}

pub async fn load_policy_mapping(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<StatusCode> {
    services.object_layer()?;
    let user_or_group = require(&params, "userorgroup")?;
    let is_group = params.contains_key("isgroup");
    services
        .iam
        .load_policy_mapping(user_or_group, is_group)
        .await
        .map_err(PeerError::other)?;
    Ok(StatusCode::OK)
}

pub async fn delete_user(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<StatusCode> {
    services.object_layer()?;
    let user = require(&params, "user")?;
    services
        .iam
        .delete_user(user)
        .await
        .map_err(PeerError::other)?;
    Ok(StatusCode::OK)
}

pub async fn load_user(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<StatusCode> {
    services.object_layer()?;
    let user = require(&params, "user")?;
    let temp: bool = require(&params, "usertemp")?
        .parse()
        .map_err(PeerError::other)?;
    let user_type = if temp {
        UserType::Temporary
    } else {
        UserType::Regular
    };
    services
        .iam
        .load_user(user, user_type)
        .await
        .map_err(PeerError::other)?;
    Ok(StatusCode::OK)
}

pub async fn delete_service_account(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<StatusCode> {
    services.object_layer()?;
    let user = require(&params, "user")?;
    services
        .iam
        .delete_service_account(user)
        .await
        .map_err(PeerError::other)?;
    Ok(StatusCode::OK)
}

pub async fn load_service_account(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<StatusCode> {
    services.object_layer()?;
    let user = require(&params, "user")?;
    services
        .iam
        .load_service_account(user)
        .await
        .map_err(PeerError::other)?;
    Ok(StatusCode::OK)
}

pub async fn load_group(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<StatusCode> {
    services.object_layer()?;
    let group = require(&params, "group")?;
    services
        .iam
        .load_group(group)
        .await
        .map_err(PeerError::other)?;
    Ok(StatusCode::OK)
}
