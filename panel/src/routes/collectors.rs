use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use common::{
    models::{Collector, Transfer},
    utils::matches_search,
    Repository, Store,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use super::{delete_all, BulkDeleteRequest, ListQuery, State};
use crate::{
    error::Result,
    identity::IdentityProvider,
    provisioning::{self, CollectorForm},
    state::Operator,
};

/// Collector as returned by the API; the stored password never leaves the
/// store.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorView {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub total_payments: f64,
    pub numeric_id: u32,
    pub created_at: DateTime<Utc>,
}

impl From<Collector> for CollectorView {
    fn from(collector: Collector) -> Self {
        CollectorView {
            id: collector.id,
            name: collector.name,
            phone: collector.phone,
            email: collector.email,
            address: collector.address,
            total_payments: collector.total_payments,
            numeric_id: collector.numeric_id,
            created_at: collector.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorDetail {
    #[serde(flatten)]
    pub collector: CollectorView,
    pub transferred: f64,
    pub holding: f64,
    pub transfers: Vec<Transfer>,
}

/// Editable profile fields. Email and password belong to the credential and
/// are changed through the identity service, not here.
#[derive(Debug, Deserialize, Validate)]
pub struct CollectorUpdate {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Phone is required"))]
    pub phone: String,
    #[serde(default)]
    pub address: Option<String>,
}

pub async fn list<S: Store, I: IdentityProvider>(
    query: web::Query<ListQuery>,
    state: State<S, I>,
) -> Result<HttpResponse> {
    let mut collectors: Vec<CollectorView> = state
        .store
        .collectors()
        .list()
        .await?
        .into_iter()
        .filter(|c| {
            matches_search(
                query.search(),
                [c.name.as_str(), c.phone.as_str(), c.email.as_str()],
            )
        })
        .map(CollectorView::from)
        .collect();
    collectors.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

    Ok(HttpResponse::Ok().json(collectors))
}

pub async fn detail<S: Store, I: IdentityProvider>(
    path: web::Path<String>,
    state: State<S, I>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    let (collector, transfers) = futures::try_join!(
        state.store.collectors().require(&id),
        state.store.transfers().list(),
    )?;

    let mut transfers: Vec<Transfer> = transfers
        .into_iter()
        .filter(|t| t.collector_id == collector.id)
        .collect();
    transfers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let transferred: f64 = transfers.iter().map(|t| t.amount).sum();

    Ok(HttpResponse::Ok().json(CollectorDetail {
        holding: collector.total_payments - transferred,
        collector: collector.into(),
        transferred,
        transfers,
    }))
}

pub async fn create<S: Store, I: IdentityProvider>(
    form: web::Json<CollectorForm>,
    state: State<S, I>,
    operator: Operator,
) -> Result<HttpResponse> {
    info!(operator = operator.name(), "Creating collector");
    let collector =
        provisioning::create_collector(&state.store, &state.identity, form.into_inner()).await?;
    Ok(HttpResponse::Created().json(CollectorView::from(collector)))
}

pub async fn update<S: Store, I: IdentityProvider>(
    path: web::Path<String>,
    form: web::Json<CollectorUpdate>,
    state: State<S, I>,
    operator: Operator,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    form.validate()?;
    let CollectorUpdate {
        name,
        phone,
        address,
    } = form.into_inner();

    let mut collector = state.store.collectors().require(&id).await?;
    collector.name = name.trim().to_string();
    collector.phone = phone.trim().to_string();
    collector.address = address.filter(|a| !a.trim().is_empty());
    state.store.collectors().update(&collector).await?;
    info!(%id, operator = operator.name(), "Collector updated");

    Ok(HttpResponse::Ok().json(CollectorView::from(collector)))
}

/// Removes the profile document only; the credential is deleted through
/// `DELETE /api/users/{uid}`.
pub async fn delete<S: Store, I: IdentityProvider>(
    path: web::Path<String>,
    state: State<S, I>,
    operator: Operator,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    state.store.collectors().delete(&id).await?;
    info!(%id, operator = operator.name(), "Collector deleted");
    Ok(HttpResponse::NoContent().finish())
}

pub async fn bulk_delete<S: Store, I: IdentityProvider>(
    req: web::Json<BulkDeleteRequest>,
    state: State<S, I>,
    operator: Operator,
) -> Result<HttpResponse> {
    req.validate()?;
    let report = delete_all::<Collector, _>(state.store.collectors(), &req.ids).await;
    info!(
        deleted = report.deleted,
        failed = report.failed.len(),
        operator = operator.name(),
        "Collectors bulk deleted"
    );
    Ok(HttpResponse::Ok().json(report))
}

pub async fn reconcile<S: Store, I: IdentityProvider>(
    state: State<S, I>,
    operator: Operator,
) -> Result<HttpResponse> {
    info!(operator = operator.name(), "Reconciling collector provisioning");
    let report =
        provisioning::reconcile(&state.store, &state.identity, state.reconcile_grace).await?;
    Ok(HttpResponse::Ok().json(report))
}
