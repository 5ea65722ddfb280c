use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{billing, link, repository::Document};

/// Fresh document id for panel-created records.
pub fn new_document_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub address: String,
    /// Package document id. May dangle after the package is deleted.
    pub selected_package: String,
    /// Collector uid.
    pub selected_collector: String,
    pub device: u32,
    #[serde(default)]
    pub discount: f64,
    pub final_price: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_payment_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_paid: f64,
    #[serde(default, rename = "remainingamount")]
    pub remaining_amount: f64,
}

impl Customer {
    /// Numeric id the field app records on this customer's payments.
    pub fn numeric_id(&self) -> u32 {
        link::numeric_id(&self.id)
    }

    pub fn reprice(&mut self, package_price: f64) {
        self.final_price = billing::final_price(package_price, self.device, self.discount);
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Collector {
    /// Uid assigned by the identity service.
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub total_payments: f64,
    pub numeric_id: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Package {
    pub id: String,
    pub name: String,
    pub price: f64,
    /// Free-form size label, e.g. "10 Mbps".
    #[serde(default)]
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub amount: f64,
    /// `link::numeric_id` of the customer document id.
    pub customer_id: u32,
    /// Uid of the collector that took the payment.
    pub collector_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub remaining_amount: f64,
    #[serde(default)]
    pub total_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: String,
    pub amount: f64,
    pub recipient: String,
    pub collector_id: String,
    pub created_at: DateTime<Utc>,
}

/// Marker written before a collector credential is created, removed once
/// the profile document exists.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCollector {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingCollector {
    /// Profile document for the credential `uid`.
    pub fn to_collector(&self, uid: &str) -> Collector {
        Collector {
            id: uid.to_string(),
            name: self.name.clone(),
            phone: self.phone.clone(),
            email: self.email.clone(),
            password: self.password.clone(),
            address: self.address.clone(),
            total_payments: 0.0,
            numeric_id: link::numeric_id(uid),
            created_at: Utc::now(),
        }
    }
}

macro_rules! impl_document {
    ($ty:ty, $collection:literal) => {
        impl Document for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> &str {
                &self.id
            }
        }
    };
}

impl_document!(Customer, "customers");
impl_document!(Collector, "collectors");
impl_document!(Package, "packages");
impl_document!(Payment, "payments");
impl_document!(Transfer, "transfers");
impl_document!(PendingCollector, "collector_provisioning");
