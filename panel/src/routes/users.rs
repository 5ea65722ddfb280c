//! Proxy to the identity service's admin API. Response shapes are fixed by
//! the front end: a bare array on success, `{error}` or `{success, error}` on
//! failure.

use actix_web::{web, HttpResponse};
use common::Store;
use serde_json::json;
use tracing::{error, info};

use super::State;
use crate::{identity::IdentityProvider, state::Operator};

pub async fn list_users<S: Store, I: IdentityProvider>(state: State<S, I>) -> HttpResponse {
    match state.identity.list_users().await {
        Ok(users) => HttpResponse::Ok().json(users),
        Err(e) => {
            error!("Error listing users: {}", e);
            HttpResponse::InternalServerError().json(json!({ "error": e.to_string() }))
        }
    }
}

pub async fn delete_user<S: Store, I: IdentityProvider>(
    path: web::Path<String>,
    state: State<S, I>,
    operator: Operator,
) -> HttpResponse {
    let uid = path.into_inner();

    match state.identity.delete_user(&uid).await {
        Ok(()) => {
            info!(%uid, operator = operator.name(), "Deleted identity user");
            HttpResponse::Ok().json(json!({
                "success": true,
                "message": format!("User {uid} deleted successfully"),
            }))
        }
        Err(e) => {
            error!(%uid, "Error deleting user: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": e.to_string(),
            }))
        }
    }
}
