use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use common::{models::Transfer, Repository, Store};
use serde::Serialize;

use super::{feed, ListQuery, State};
use crate::{error::Result, identity::IdentityProvider};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRow {
    #[serde(flatten)]
    pub transfer: Transfer,
    pub collector_name: String,
}

pub async fn list<S: Store, I: IdentityProvider>(
    query: web::Query<ListQuery>,
    state: State<S, I>,
) -> Result<HttpResponse> {
    let (transfers, collectors) = futures::try_join!(
        state.store.transfers().list(),
        state.store.collectors().list(),
    )?;
    let names: HashMap<String, String> =
        collectors.into_iter().map(|c| (c.id, c.name)).collect();

    let mut rows: Vec<TransferRow> = transfers
        .into_iter()
        .filter(|t| {
            query
                .collector
                .as_deref()
                .map_or(true, |collector| t.collector_id == collector)
        })
        .map(|transfer| TransferRow {
            collector_name: names
                .get(&transfer.collector_id)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string()),
            transfer,
        })
        .collect();
    rows.sort_by(|a, b| b.transfer.created_at.cmp(&a.transfer.created_at));

    Ok(HttpResponse::Ok().json(rows))
}

pub async fn stream<S: Store, I: IdentityProvider>(state: State<S, I>) -> HttpResponse {
    feed::sse(state.store.transfers().subscribe())
}
