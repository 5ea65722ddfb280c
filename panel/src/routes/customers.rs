use actix_web::{http::header, web, HttpResponse};
use chrono::{DateTime, Utc};
use common::{
    billing::{self, BillingStatus},
    import,
    models::{new_document_id, Customer, Payment},
    utils::matches_search,
    Repository, Store,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use super::{delete_all, BulkDeleteRequest, ListQuery, State};
use crate::{
    error::{ApiError, Result},
    identity::IdentityProvider,
    state::Operator,
};

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CustomerForm {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Phone is required"))]
    pub phone: String,
    #[serde(default)]
    #[validate(email(message = "Enter a valid email"))]
    pub email: Option<String>,
    #[validate(length(min = 1, message = "Address is required"))]
    pub address: String,
    #[validate(length(min = 1, message = "Select a package"))]
    pub selected_package: String,
    #[validate(length(min = 1, message = "Select a collector"))]
    pub selected_collector: String,
    #[validate(range(min = 1, message = "At least one device is required"))]
    pub device: u32,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0, message = "Discount must be between 0 and 100"))]
    pub discount: f64,
}

impl CustomerForm {
    fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.phone = self.phone.trim().to_string();
        self.address = self.address.trim().to_string();
        self.email = self
            .email
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty());
        self
    }
}

/// Customer with its read-time billing projection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRow {
    #[serde(flatten)]
    pub customer: Customer,
    pub status: BillingStatus,
    pub month_delta: Option<i32>,
    pub amount_owed: f64,
}

impl CustomerRow {
    pub fn project(customer: Customer, now: DateTime<Utc>) -> Self {
        let (status, month_delta) = BillingStatus::derive(customer.last_payment_date, now);
        let amount_owed =
            billing::amount_owed(customer.final_price, customer.remaining_amount, month_delta);
        CustomerRow {
            customer,
            status,
            month_delta,
            amount_owed,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDetail {
    #[serde(flatten)]
    pub row: CustomerRow,
    pub numeric_id: u32,
    pub package_name: String,
    pub package_price: Option<f64>,
    pub collector_name: String,
    pub payments: Vec<Payment>,
}

pub async fn list<S: Store, I: IdentityProvider>(
    query: web::Query<ListQuery>,
    state: State<S, I>,
) -> Result<HttpResponse> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            raw.parse::<BillingStatus>()
                .map_err(|e| ApiError::invalid_field("status", e.to_string()))?,
        ),
        None => None,
    };

    let now = Utc::now();
    let mut rows: Vec<CustomerRow> = state
        .store
        .customers()
        .list()
        .await?
        .into_iter()
        .filter(|c| {
            matches_search(
                query.search(),
                [
                    c.name.as_str(),
                    c.phone.as_str(),
                    c.address.as_str(),
                    c.email.as_deref().unwrap_or(""),
                ],
            )
        })
        .filter(|c| {
            query
                .collector
                .as_deref()
                .map_or(true, |collector| c.selected_collector == collector)
        })
        .map(|c| CustomerRow::project(c, now))
        .filter(|row| status.map_or(true, |status| row.status == status))
        .collect();
    rows.sort_by(|a, b| b.customer.created_at.cmp(&a.customer.created_at));

    Ok(HttpResponse::Ok().json(rows))
}

pub async fn detail<S: Store, I: IdentityProvider>(
    path: web::Path<String>,
    state: State<S, I>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    let customer = state.store.customers().require(&id).await?;

    // Only this record's references are resolved.
    let (package, collector, payments) = futures::try_join!(
        state.store.packages().get(&customer.selected_package),
        state.store.collectors().get(&customer.selected_collector),
        state.store.payments().list(),
    )?;

    let numeric_id = customer.numeric_id();
    let mut payments: Vec<Payment> = payments
        .into_iter()
        .filter(|payment| payment.customer_id == numeric_id)
        .collect();
    payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(HttpResponse::Ok().json(CustomerDetail {
        row: CustomerRow::project(customer, Utc::now()),
        numeric_id,
        package_name: package
            .as_ref()
            .map_or_else(|| UNKNOWN.to_string(), |p| p.name.clone()),
        package_price: package.map(|p| p.price),
        collector_name: collector.map_or_else(|| UNKNOWN.to_string(), |c| c.name),
        payments,
    }))
}

/// Look up the referenced package and collector; both must exist when a
/// customer is written through the form.
async fn package_price<S: Store>(store: &S, form: &CustomerForm) -> Result<f64> {
    let (package, collector) = futures::try_join!(
        store.packages().get(&form.selected_package),
        store.collectors().get(&form.selected_collector),
    )?;
    let package =
        package.ok_or_else(|| ApiError::invalid_field("selectedPackage", "Unknown package"))?;
    if collector.is_none() {
        return Err(ApiError::invalid_field(
            "selectedCollector",
            "Unknown collector",
        ));
    }
    Ok(package.price)
}

pub async fn create<S: Store, I: IdentityProvider>(
    form: web::Json<CustomerForm>,
    state: State<S, I>,
    operator: Operator,
) -> Result<HttpResponse> {
    let form = form.into_inner().normalized();
    form.validate()?;
    let price = package_price(&state.store, &form).await?;

    let customer = Customer {
        id: new_document_id(),
        final_price: billing::final_price(price, form.device, form.discount),
        name: form.name,
        phone: form.phone,
        email: form.email,
        address: form.address,
        selected_package: form.selected_package,
        selected_collector: form.selected_collector,
        device: form.device,
        discount: form.discount,
        created_at: Utc::now(),
        last_payment_date: None,
        last_paid: 0.0,
        remaining_amount: 0.0,
    };
    state.store.customers().insert(&customer).await?;
    info!(id = %customer.id, operator = operator.name(), "Customer created");

    Ok(HttpResponse::Created().json(CustomerRow::project(customer, Utc::now())))
}

pub async fn update<S: Store, I: IdentityProvider>(
    path: web::Path<String>,
    form: web::Json<CustomerForm>,
    state: State<S, I>,
    operator: Operator,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    let form = form.into_inner().normalized();
    form.validate()?;

    let mut customer = state.store.customers().require(&id).await?;
    let price = package_price(&state.store, &form).await?;

    customer.name = form.name;
    customer.phone = form.phone;
    customer.email = form.email;
    customer.address = form.address;
    customer.selected_package = form.selected_package;
    customer.selected_collector = form.selected_collector;
    customer.device = form.device;
    customer.discount = form.discount;
    customer.reprice(price);

    state.store.customers().update(&customer).await?;
    info!(%id, operator = operator.name(), "Customer updated");

    Ok(HttpResponse::Ok().json(CustomerRow::project(customer, Utc::now())))
}

pub async fn delete<S: Store, I: IdentityProvider>(
    path: web::Path<String>,
    state: State<S, I>,
    operator: Operator,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    state.store.customers().delete(&id).await?;
    info!(%id, operator = operator.name(), "Customer deleted");
    Ok(HttpResponse::NoContent().finish())
}

pub async fn bulk_delete<S: Store, I: IdentityProvider>(
    req: web::Json<BulkDeleteRequest>,
    state: State<S, I>,
    operator: Operator,
) -> Result<HttpResponse> {
    req.validate()?;
    let report = delete_all::<Customer, _>(state.store.customers(), &req.ids).await;
    info!(
        deleted = report.deleted,
        failed = report.failed.len(),
        operator = operator.name(),
        "Customers bulk deleted"
    );
    Ok(HttpResponse::Ok().json(report))
}

pub async fn import_sheet<S: Store, I: IdentityProvider>(
    body: web::Bytes,
    state: State<S, I>,
    operator: Operator,
) -> Result<HttpResponse> {
    if body.is_empty() {
        return Err(ApiError::bad_request().detail("Upload a spreadsheet"));
    }

    let rows = import::read_workbook(&body)?;
    let packages = state.store.packages().list().await?;
    let plan = import::plan(&rows, &packages, Utc::now());
    info!(
        rows = rows.len(),
        ready = plan.ready.len(),
        operator = operator.name(),
        "Customer import started"
    );

    let report = import::apply(plan, state.store.customers()).await;
    Ok(HttpResponse::Ok().json(report))
}

#[derive(Debug, Default, Deserialize)]
pub struct TemplateQuery {
    #[serde(default)]
    pub demo: bool,
}

pub async fn template<S: Store, I: IdentityProvider>(
    query: web::Query<TemplateQuery>,
    _state: State<S, I>,
) -> Result<HttpResponse> {
    let workbook = import::template(query.demo)?;
    let filename = if query.demo {
        "customers-demo.xlsx"
    } else {
        "customers-template.xlsx"
    };

    Ok(HttpResponse::Ok()
        .content_type(import::XLSX_CONTENT_TYPE)
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ))
        .body(workbook))
}
