use actix_web::{web, HttpResponse};
use common::{repository::Document, Repository, Store};
use serde::{Deserialize, Serialize};
use tracing::warn;
use validator::Validate;

use crate::{identity::IdentityProvider, state::AppState};

pub mod collectors;
pub mod customers;
pub mod feed;
pub mod packages;
pub mod payments;
pub mod reports;
pub mod transfers;
pub mod users;

pub type State<S, I> = web::Data<AppState<S, I>>;

/// Registers every endpoint of the back office.
pub fn configure<S: Store, I: IdentityProvider>(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check)).service(
        web::scope("/api")
            // Identity proxy
            .route("/users", web::get().to(users::list_users::<S, I>))
            .route("/users/{uid}", web::delete().to(users::delete_user::<S, I>))
            // Customers
            .route("/customers", web::get().to(customers::list::<S, I>))
            .route("/customers", web::post().to(customers::create::<S, I>))
            .route("/customers/bulk-delete", web::post().to(customers::bulk_delete::<S, I>))
            .route("/customers/import", web::post().to(customers::import_sheet::<S, I>))
            .route("/customers/template", web::get().to(customers::template::<S, I>))
            .route("/customers/{id}", web::get().to(customers::detail::<S, I>))
            .route("/customers/{id}", web::put().to(customers::update::<S, I>))
            .route("/customers/{id}", web::delete().to(customers::delete::<S, I>))
            // Collectors
            .route("/collectors", web::get().to(collectors::list::<S, I>))
            .route("/collectors", web::post().to(collectors::create::<S, I>))
            .route("/collectors/bulk-delete", web::post().to(collectors::bulk_delete::<S, I>))
            .route("/collectors/reconcile", web::post().to(collectors::reconcile::<S, I>))
            .route("/collectors/{id}", web::get().to(collectors::detail::<S, I>))
            .route("/collectors/{id}", web::put().to(collectors::update::<S, I>))
            .route("/collectors/{id}", web::delete().to(collectors::delete::<S, I>))
            // Packages
            .route("/packages", web::get().to(packages::list::<S, I>))
            .route("/packages", web::post().to(packages::create::<S, I>))
            .route("/packages/bulk-delete", web::post().to(packages::bulk_delete::<S, I>))
            .route("/packages/{id}", web::put().to(packages::update::<S, I>))
            .route("/packages/{id}", web::delete().to(packages::delete::<S, I>))
            // Payments and transfers
            .route("/payments", web::get().to(payments::list::<S, I>))
            .route("/payments/stream", web::get().to(payments::stream::<S, I>))
            .route("/transfers", web::get().to(transfers::list::<S, I>))
            .route("/transfers/stream", web::get().to(transfers::stream::<S, I>))
            // Reports
            .route("/reports/summary", web::get().to(reports::summary::<S, I>)),
    );
}

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().content_type("text/plain").body("OK")
}

/// Query string shared by the listing endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub collector: Option<String>,
    pub status: Option<String>,
}

impl ListQuery {
    pub fn search(&self) -> &str {
        self.search.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkDeleteRequest {
    #[validate(length(min = 1, message = "Select at least one record"))]
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkFailure {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct BulkDeleteReport {
    pub deleted: usize,
    pub failed: Vec<BulkFailure>,
}

/// Delete all ids concurrently. Failures are reported, not rolled back.
pub async fn delete_all<T: Document, R: Repository<T>>(repo: &R, ids: &[String]) -> BulkDeleteReport {
    let mut report = BulkDeleteReport {
        deleted: 0,
        failed: Vec::new(),
    };
    for (id, result) in repo.delete_many(ids).await {
        match result {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                warn!(collection = T::COLLECTION, %id, "Bulk delete failed: {}", e);
                report.failed.push(BulkFailure {
                    id,
                    error: e.to_string(),
                });
            }
        }
    }
    report
}
