use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use common::{
    models::{Collector, Customer, Payment},
    utils::matches_search,
    Repository, Store,
};
use serde::Serialize;

use super::{feed, ListQuery, State};
use crate::{error::Result, identity::IdentityProvider};

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRow {
    #[serde(flatten)]
    pub payment: Payment,
    pub customer_name: String,
    pub collector_name: String,
}

/// Join payments to names. Customers are keyed by numeric id; on a hash
/// collision the first customer listed wins.
pub fn join_names(
    payments: Vec<Payment>,
    customers: &[Customer],
    collectors: &[Collector],
) -> Vec<PaymentRow> {
    let mut customer_names: HashMap<u32, &str> = HashMap::with_capacity(customers.len());
    for customer in customers {
        customer_names
            .entry(customer.numeric_id())
            .or_insert(customer.name.as_str());
    }
    let collector_names: HashMap<&str, &str> = collectors
        .iter()
        .map(|c| (c.id.as_str(), c.name.as_str()))
        .collect();

    payments
        .into_iter()
        .map(|payment| PaymentRow {
            customer_name: customer_names
                .get(&payment.customer_id)
                .copied()
                .unwrap_or(UNKNOWN)
                .to_string(),
            collector_name: collector_names
                .get(payment.collector_id.as_str())
                .copied()
                .unwrap_or(UNKNOWN)
                .to_string(),
            payment,
        })
        .collect()
}

pub async fn list<S: Store, I: IdentityProvider>(
    query: web::Query<ListQuery>,
    state: State<S, I>,
) -> Result<HttpResponse> {
    let (payments, customers, collectors) = futures::try_join!(
        state.store.payments().list(),
        state.store.customers().list(),
        state.store.collectors().list(),
    )?;

    let mut rows: Vec<PaymentRow> = join_names(payments, &customers, &collectors)
        .into_iter()
        .filter(|row| {
            query
                .collector
                .as_deref()
                .map_or(true, |collector| row.payment.collector_id == collector)
        })
        .filter(|row| {
            matches_search(
                query.search(),
                [row.customer_name.as_str(), row.collector_name.as_str()],
            )
        })
        .collect();
    rows.sort_by(|a, b| b.payment.created_at.cmp(&a.payment.created_at));

    Ok(HttpResponse::Ok().json(rows))
}

pub async fn stream<S: Store, I: IdentityProvider>(state: State<S, I>) -> HttpResponse {
    feed::sse(state.store.payments().subscribe())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn customer(id: &str, name: &str) -> Customer {
        Customer {
            id: id.into(),
            name: name.into(),
            phone: "0300".into(),
            email: None,
            address: "Street 1".into(),
            selected_package: "p1".into(),
            selected_collector: "uid-1".into(),
            device: 1,
            discount: 0.0,
            final_price: 1000.0,
            created_at: Utc::now(),
            last_payment_date: None,
            last_paid: 0.0,
            remaining_amount: 0.0,
        }
    }

    fn payment(customer_id: u32, collector_id: &str) -> Payment {
        Payment {
            id: "pay-1".into(),
            amount: 1000.0,
            customer_id,
            collector_id: collector_id.into(),
            created_at: Utc::now(),
            remaining_amount: 0.0,
            total_amount: 1000.0,
        }
    }

    #[test]
    fn names_resolve_through_numeric_ids() {
        let customers = vec![customer("cust-a", "Sana")];
        let collectors = vec![Collector {
            id: "uid-1".into(),
            name: "Hamza".into(),
            phone: "0311".into(),
            email: "hamza@example.com".into(),
            password: String::new(),
            address: None,
            total_payments: 0.0,
            numeric_id: common::link::numeric_id("uid-1"),
            created_at: Utc::now(),
        }];

        let rows = join_names(
            vec![
                payment(customers[0].numeric_id(), "uid-1"),
                payment(customers[0].numeric_id().wrapping_add(1) % 1_000_000, "uid-x"),
            ],
            &customers,
            &collectors,
        );

        assert_eq!(rows[0].customer_name, "Sana");
        assert_eq!(rows[0].collector_name, "Hamza");
        assert_eq!(rows[1].customer_name, UNKNOWN);
        assert_eq!(rows[1].collector_name, UNKNOWN);
    }

    #[test]
    fn colliding_numeric_ids_resolve_to_the_first_customer() {
        let first = customer("same", "First");
        let second = customer("same", "Second");
        let rows = join_names(vec![payment(first.numeric_id(), "uid-1")], &[first, second], &[]);
        assert_eq!(rows[0].customer_name, "First");
    }
}
