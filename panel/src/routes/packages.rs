use actix_web::{web, HttpResponse};
use common::{
    models::{new_document_id, Package},
    utils::matches_search,
    Repository, Store,
};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use super::{delete_all, BulkDeleteRequest, ListQuery, State};
use crate::{error::Result, identity::IdentityProvider, state::Operator};

#[derive(Debug, Deserialize, Validate)]
pub struct PackageForm {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(range(min = 0.0, message = "Price cannot be negative"))]
    pub price: f64,
    #[serde(default)]
    pub size: String,
}

pub async fn list<S: Store, I: IdentityProvider>(
    query: web::Query<ListQuery>,
    state: State<S, I>,
) -> Result<HttpResponse> {
    let mut packages: Vec<Package> = state
        .store
        .packages()
        .list()
        .await?
        .into_iter()
        .filter(|p| matches_search(query.search(), [p.name.as_str(), p.size.as_str()]))
        .collect();
    packages.sort_by(|a, b| a.price.total_cmp(&b.price));

    Ok(HttpResponse::Ok().json(packages))
}

pub async fn create<S: Store, I: IdentityProvider>(
    form: web::Json<PackageForm>,
    state: State<S, I>,
    operator: Operator,
) -> Result<HttpResponse> {
    form.validate()?;
    let form = form.into_inner();
    let package = Package {
        id: new_document_id(),
        name: form.name.trim().to_string(),
        price: form.price,
        size: form.size.trim().to_string(),
    };
    state.store.packages().insert(&package).await?;
    info!(id = %package.id, operator = operator.name(), "Package created");

    Ok(HttpResponse::Created().json(package))
}

/// Existing customers keep their stored final price until they are edited.
pub async fn update<S: Store, I: IdentityProvider>(
    path: web::Path<String>,
    form: web::Json<PackageForm>,
    state: State<S, I>,
    operator: Operator,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    form.validate()?;
    let form = form.into_inner();

    let mut package = state.store.packages().require(&id).await?;
    package.name = form.name.trim().to_string();
    package.price = form.price;
    package.size = form.size.trim().to_string();
    state.store.packages().update(&package).await?;
    info!(%id, operator = operator.name(), "Package updated");

    Ok(HttpResponse::Ok().json(package))
}

pub async fn delete<S: Store, I: IdentityProvider>(
    path: web::Path<String>,
    state: State<S, I>,
    operator: Operator,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    state.store.packages().delete(&id).await?;
    info!(%id, operator = operator.name(), "Package deleted");
    Ok(HttpResponse::NoContent().finish())
}

pub async fn bulk_delete<S: Store, I: IdentityProvider>(
    req: web::Json<BulkDeleteRequest>,
    state: State<S, I>,
    operator: Operator,
) -> Result<HttpResponse> {
    req.validate()?;
    let report = delete_all::<Package, _>(state.store.packages(), &req.ids).await;
    info!(
        deleted = report.deleted,
        failed = report.failed.len(),
        operator = operator.name(),
        "Packages bulk deleted"
    );
    Ok(HttpResponse::Ok().json(report))
}
