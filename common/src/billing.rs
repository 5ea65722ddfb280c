use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Payment-recency tier of a customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BillingStatus {
    Active,
    Unactive,
    Defaulter,
    Unknown,
}

impl_from_str_for_enum!(BillingStatus, Active, Unactive, Defaulter, Unknown);
impl_display_for_enum!(BillingStatus, Active, Unactive, Defaulter, Unknown);

/// Whole calendar months between `last` and `now`. The day of month is
/// ignored, so the 31st and the 1st of the next month are one month apart.
pub fn month_delta(last: DateTime<Utc>, now: DateTime<Utc>) -> i32 {
    (now.year() - last.year()) * 12 + (now.month() as i32 - last.month() as i32)
}

impl BillingStatus {
    pub fn from_delta(delta: i32) -> Self {
        match delta {
            d if d > 1 => BillingStatus::Defaulter,
            1 => BillingStatus::Unactive,
            _ => BillingStatus::Active,
        }
    }

    /// Status plus the month delta it was derived from. The delta is `None`
    /// when the customer has never paid.
    pub fn derive(last_payment: Option<DateTime<Utc>>, now: DateTime<Utc>) -> (Self, Option<i32>) {
        match last_payment {
            Some(last) => {
                let delta = month_delta(last, now);
                (Self::from_delta(delta), Some(delta))
            }
            None => (BillingStatus::Unknown, None),
        }
    }
}

/// Package price scaled by device count and reduced by a percentage discount.
pub fn final_price(base_price: f64, device: u32, discount: f64) -> f64 {
    base_price * f64::from(device) * (1.0 - discount / 100.0)
}

/// Carried-over balance plus one final price per unpaid month.
pub fn amount_owed(final_price: f64, remaining: f64, delta: Option<i32>) -> f64 {
    let months = delta.unwrap_or(0).max(0);
    remaining + final_price * f64::from(months)
}

pub fn format_amount(amount: f64) -> String {
    format!("{amount:.2}")
}
