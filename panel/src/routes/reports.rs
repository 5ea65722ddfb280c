use std::collections::HashMap;

use actix_web::HttpResponse;
use chrono::{DateTime, Utc};
use common::{
    billing::BillingStatus,
    models::{Collector, Customer, Payment, Transfer},
    Repository, Store,
};
use serde::Serialize;

use super::State;
use crate::{error::Result, identity::IdentityProvider};

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBreakdown {
    pub active: usize,
    pub unactive: usize,
    pub defaulter: usize,
    pub unknown: usize,
}

impl StatusBreakdown {
    fn count(&mut self, status: BillingStatus) {
        match status {
            BillingStatus::Active => self.active += 1,
            BillingStatus::Unactive => self.unactive += 1,
            BillingStatus::Defaulter => self.defaulter += 1,
            BillingStatus::Unknown => self.unknown += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorHolding {
    pub id: String,
    pub name: String,
    pub total_payments: f64,
    pub transferred: f64,
    pub holding: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub customers: usize,
    pub statuses: StatusBreakdown,
    pub total_collected: f64,
    pub total_transferred: f64,
    pub collectors: Vec<CollectorHolding>,
}

pub fn summarize(
    customers: &[Customer],
    collectors: &[Collector],
    payments: &[Payment],
    transfers: &[Transfer],
    now: DateTime<Utc>,
) -> Summary {
    let mut statuses = StatusBreakdown::default();
    for customer in customers {
        statuses.count(BillingStatus::derive(customer.last_payment_date, now).0);
    }

    let mut transferred_by: HashMap<&str, f64> = HashMap::new();
    for transfer in transfers {
        *transferred_by.entry(transfer.collector_id.as_str()).or_default() += transfer.amount;
    }

    let mut holdings: Vec<CollectorHolding> = collectors
        .iter()
        .map(|c| {
            let transferred = transferred_by.get(c.id.as_str()).copied().unwrap_or(0.0);
            CollectorHolding {
                id: c.id.clone(),
                name: c.name.clone(),
                total_payments: c.total_payments,
                transferred,
                holding: c.total_payments - transferred,
            }
        })
        .collect();
    holdings.sort_by(|a, b| b.holding.total_cmp(&a.holding));

    Summary {
        customers: customers.len(),
        statuses,
        total_collected: payments.iter().map(|p| p.amount).sum(),
        total_transferred: transfers.iter().map(|t| t.amount).sum(),
        collectors: holdings,
    }
}

pub async fn summary<S: Store, I: IdentityProvider>(state: State<S, I>) -> Result<HttpResponse> {
    let (customers, collectors, payments, transfers) = futures::try_join!(
        state.store.customers().list(),
        state.store.collectors().list(),
        state.store.payments().list(),
        state.store.transfers().list(),
    )?;

    Ok(HttpResponse::Ok().json(summarize(
        &customers,
        &collectors,
        &payments,
        &transfers,
        Utc::now(),
    )))
}
