use std::time::Duration;

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use common::Store;
use futures::future::{ok, Ready};

use crate::identity::IdentityProvider;

/// Shared handles passed to every handler.
pub struct AppState<S, I> {
    pub store: S,
    pub identity: I,
    /// Minimum age of a provisioning marker before reconciliation touches it.
    pub reconcile_grace: Duration,
}

impl<S: Store, I: IdentityProvider> AppState<S, I> {
    pub fn new(store: S, identity: I, reconcile_grace: Duration) -> Self {
        Self {
            store,
            identity,
            reconcile_grace,
        }
    }
}

pub const OPERATOR_HEADER: &str = "x-operator";

/// Admin issuing the request, taken from the `X-Operator` header set by the
/// front end. Used to attribute log lines; it does not authorize anything.
#[derive(Debug, Clone)]
pub struct Operator(pub String);

impl Operator {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl FromRequest for Operator {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let name = req
            .headers()
            .get(OPERATOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("anonymous");
        ok(Operator(name.to_string()))
    }
}
