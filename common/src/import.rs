//! Customer bulk import from spreadsheets, and the matching templates.

use std::{collections::BTreeMap, io::Cursor};

use calamine::{Data, Reader, Xlsx};
use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    billing,
    models::{new_document_id, Customer, Package},
    repository::Repository,
};

/// Column headers of the import sheet and of both templates, in order.
pub const HEADERS: [&str; 8] = [
    "name",
    "phone",
    "email",
    "address",
    "selectedPackage",
    "selectedCollector",
    "device",
    "discount",
];

pub const REQUIRED: [&str; 6] = [
    "name",
    "phone",
    "address",
    "selectedPackage",
    "selectedCollector",
    "device",
];

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const DEMO_ROWS: [[&str; 8]; 3] = [
    ["Ayesha Khan", "03001234567", "ayesha@example.com", "House 12, Street 4, Gulberg", "Basic", "demo-collector", "1", "0"],
    ["Usman Tariq", "03117654321", "", "Flat 7, Block C, Johar Town", "Standard", "demo-collector", "2", "10"],
    ["Sana Malik", "03335550000", "", "Shop 3, Main Market", "Premium", "demo-collector", "3", "15"],
];

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unreadable workbook: {0}")]
    Workbook(#[from] calamine::XlsxError),

    #[error("workbook has no sheets")]
    EmptyWorkbook,

    #[error("missing columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("failed to build template: {0}")]
    Template(#[from] rust_xlsxwriter::XlsxError),
}

/// Cells of one sheet row keyed by header. Blank cells are absent.
pub type Row = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    /// 1-based row number as shown by spreadsheet programs.
    pub number: usize,
    pub cells: Row,
}

/// Why a row did not become a customer.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Missing(Vec<&'static str>),
    Invalid { field: &'static str, value: String },
}

/// Read the first sheet. The first non-empty row is the header row; fully
/// blank rows are dropped.
pub fn read_workbook(bytes: &[u8]) -> Result<Vec<SheetRow>, ImportError> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ImportError::EmptyWorkbook)??;
    let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);

    let mut rows = range.rows().enumerate();
    let headers: Vec<String> = match rows.next() {
        Some((_, cells)) => cells.iter().map(cell_text).collect(),
        None => return Ok(Vec::new()),
    };

    let missing: Vec<String> = REQUIRED
        .iter()
        .filter(|required| !headers.iter().any(|h| h == *required))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ImportError::MissingColumns(missing));
    }

    Ok(rows
        .filter_map(|(offset, cells)| {
            let cells: Row = headers
                .iter()
                .zip(cells.iter().map(cell_text))
                .filter(|(header, value)| !header.is_empty() && !value.is_empty())
                .map(|(header, value)| (header.clone(), value))
                .collect();
            (!cells.is_empty()).then(|| SheetRow {
                number: first_row + offset + 1,
                cells,
            })
        })
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        // Whole numbers come back as floats; phones and device counts must not grow a ".0".
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string().trim().to_string(),
    }
}

fn field<'a>(row: &'a Row, name: &str) -> Option<&'a str> {
    row.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Package price for a sheet reference, matched by id first and then by name.
pub fn resolve_package<'a>(packages: &'a [Package], reference: &str) -> Option<&'a Package> {
    packages
        .iter()
        .find(|p| p.id == reference)
        .or_else(|| packages.iter().find(|p| p.name.eq_ignore_ascii_case(reference)))
}

/// Turn one sheet row into a customer with zeroed payment tracking.
pub fn build_customer(
    row: &Row,
    packages: &[Package],
    now: DateTime<Utc>,
) -> Result<Customer, SkipReason> {
    let missing: Vec<&'static str> = REQUIRED
        .iter()
        .copied()
        .filter(|name| field(row, name).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(SkipReason::Missing(missing));
    }

    let text = |name: &str| field(row, name).unwrap_or_default().to_string();

    let device_text = text("device");
    let device = match device_text.parse::<u32>() {
        Ok(device) if device >= 1 => device,
        _ => {
            return Err(SkipReason::Invalid {
                field: "device",
                value: device_text,
            })
        }
    };

    let discount = match field(row, "discount") {
        None => 0.0,
        Some(value) => match value.parse::<f64>() {
            Ok(discount) if (0.0..=100.0).contains(&discount) => discount,
            _ => {
                return Err(SkipReason::Invalid {
                    field: "discount",
                    value: value.to_string(),
                })
            }
        },
    };

    let package_ref = text("selectedPackage");
    let (selected_package, base_price) = match resolve_package(packages, &package_ref) {
        Some(package) => (package.id.clone(), package.price),
        None => {
            warn!(package = %package_ref, "Imported customer references an unknown package");
            (package_ref, 0.0)
        }
    };

    Ok(Customer {
        id: new_document_id(),
        name: text("name"),
        phone: text("phone"),
        email: field(row, "email").map(str::to_string),
        address: text("address"),
        selected_package,
        selected_collector: text("selectedCollector"),
        device,
        discount,
        final_price: billing::final_price(base_price, device, discount),
        created_at: now,
        last_payment_date: None,
        last_paid: 0.0,
        remaining_amount: 0.0,
    })
}

#[derive(Debug, Default)]
pub struct ImportPlan {
    /// Customers to write, with their sheet row numbers, in sheet order.
    pub ready: Vec<(usize, Customer)>,
    pub skipped: usize,
}

pub fn plan(rows: &[SheetRow], packages: &[Package], now: DateTime<Utc>) -> ImportPlan {
    let mut plan = ImportPlan::default();
    for row in rows {
        match build_customer(&row.cells, packages, now) {
            Ok(customer) => plan.ready.push((row.number, customer)),
            Err(reason) => {
                warn!(row = row.number, reason = ?reason, "Skipping import row");
                plan.skipped += 1;
            }
        }
    }
    plan
}

#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    /// Row whose write failed. Rows after it were not attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_row: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Write the planned customers one at a time, stopping at the first failure.
/// Customers written before the failure stay written.
pub async fn apply<R: Repository<Customer>>(plan: ImportPlan, customers: &R) -> ImportReport {
    let mut report = ImportReport {
        skipped: plan.skipped,
        ..ImportReport::default()
    };

    for (row, customer) in plan.ready {
        if let Err(e) = customers.insert(&customer).await {
            error!(row, "Import stopped: {}", e);
            report.failed_row = Some(row);
            report.error = Some(e.to_string());
            break;
        }
        report.imported += 1;
    }

    info!(
        imported = report.imported,
        skipped = report.skipped,
        "Customer import finished"
    );
    report
}

/// Workbook with the header row, plus sample customers when `demo` is set.
pub fn template(demo: bool) -> Result<Vec<u8>, ImportError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();

    for (col, header) in HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *header, &bold)?;
    }

    if demo {
        for (i, cells) in DEMO_ROWS.iter().enumerate() {
            let row = i as u32 + 1;
            for (col, value) in cells.iter().enumerate() {
                let col = col as u16;
                match HEADERS[col as usize] {
                    "device" | "discount" => {
                        worksheet.write_number(row, col, value.parse::<f64>().unwrap_or(0.0))?;
                    }
                    _ if value.is_empty() => {}
                    _ => {
                        worksheet.write_string(row, col, *value)?;
                    }
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::StoreError, memory::MemoryStore, repository::Change, Store};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    fn full_row() -> Row {
        [
            ("name", "Hamza Ali"),
            ("phone", "03001112223"),
            ("address", "Street 9, Model Town"),
            ("selectedPackage", "pkg-basic"),
            ("selectedCollector", "col-1"),
            ("device", "2"),
            ("discount", "10"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn packages() -> Vec<Package> {
        vec![Package {
            id: "pkg-basic".into(),
            name: "Basic".into(),
            price: 1500.0,
            size: "8 Mbps".into(),
        }]
    }

    fn sheet(rows: Vec<Row>) -> Vec<SheetRow> {
        rows.into_iter()
            .enumerate()
            .map(|(i, cells)| SheetRow { number: i + 2, cells })
            .collect()
    }

    #[test]
    fn row_without_collector_is_skipped() {
        let mut row = full_row();
        row.remove("selectedCollector");
        assert_eq!(
            build_customer(&row, &packages(), Utc::now()),
            Err(SkipReason::Missing(vec!["selectedCollector"]))
        );
    }

    #[test]
    fn blank_required_cell_counts_as_missing() {
        let mut row = full_row();
        row.insert("phone".into(), "   ".into());
        assert!(matches!(
            build_customer(&row, &packages(), Utc::now()),
            Err(SkipReason::Missing(fields)) if fields == vec!["phone"]
        ));
    }

    #[test]
    fn full_row_is_priced_and_zeroed() {
        let customer = build_customer(&full_row(), &packages(), Utc::now()).unwrap();
        assert_eq!(customer.final_price, 2700.0);
        assert_eq!(customer.last_paid, 0.0);
        assert_eq!(customer.remaining_amount, 0.0);
        assert!(customer.last_payment_date.is_none());
        assert!(customer.email.is_none());
    }

    #[test]
    fn package_resolves_by_name() {
        let mut row = full_row();
        row.insert("selectedPackage".into(), "basic".into());
        let customer = build_customer(&row, &packages(), Utc::now()).unwrap();
        assert_eq!(customer.selected_package, "pkg-basic");
    }

    #[test]
    fn unknown_package_keeps_reference_at_zero_price() {
        let mut row = full_row();
        row.insert("selectedPackage".into(), "Gold".into());
        let customer = build_customer(&row, &packages(), Utc::now()).unwrap();
        assert_eq!(customer.selected_package, "Gold");
        assert_eq!(customer.final_price, 0.0);
    }

    #[test]
    fn unparsable_numbers_are_skipped() {
        let mut row = full_row();
        row.insert("device".into(), "0".into());
        assert!(matches!(
            build_customer(&row, &packages(), Utc::now()),
            Err(SkipReason::Invalid { field: "device", .. })
        ));

        let mut row = full_row();
        row.insert("discount".into(), "150".into());
        assert!(matches!(
            build_customer(&row, &packages(), Utc::now()),
            Err(SkipReason::Invalid { field: "discount", .. })
        ));
    }

    #[tokio::test]
    async fn import_writes_once_per_valid_row() {
        let store = MemoryStore::new();
        let mut incomplete = full_row();
        incomplete.remove("selectedCollector");

        let plan = plan(&sheet(vec![full_row(), incomplete]), &packages(), Utc::now());
        let report = apply(plan, store.customers()).await;

        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed_row, None);

        let customers = store.customers().list().await.unwrap();
        assert_eq!(customers.len(), 1);
        assert_eq!(customers[0].last_paid, 0.0);
        assert_eq!(customers[0].remaining_amount, 0.0);
    }

    /// Accepts a fixed number of inserts, then fails.
    struct FlakyCustomers {
        accepted: AtomicUsize,
        limit: usize,
        feed: broadcast::Sender<Change<Customer>>,
    }

    impl Repository<Customer> for FlakyCustomers {
        async fn list(&self) -> crate::repository::Result<Vec<Customer>> {
            Ok(Vec::new())
        }

        async fn get(&self, _id: &str) -> crate::repository::Result<Option<Customer>> {
            Ok(None)
        }

        async fn insert(&self, doc: &Customer) -> crate::repository::Result<()> {
            if self.accepted.fetch_add(1, Ordering::SeqCst) >= self.limit {
                return Err(StoreError::Conflict {
                    collection: "customers",
                    id: doc.id.clone(),
                });
            }
            Ok(())
        }

        async fn update(&self, _doc: &Customer) -> crate::repository::Result<()> {
            Ok(())
        }

        async fn delete(&self, _id: &str) -> crate::repository::Result<()> {
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<Change<Customer>> {
            self.feed.subscribe()
        }
    }

    #[tokio::test]
    async fn failed_write_stops_the_import() {
        let repo = FlakyCustomers {
            accepted: AtomicUsize::new(0),
            limit: 1,
            feed: broadcast::channel(1).0,
        };
        let rows = sheet(vec![full_row(), full_row(), full_row()]);

        let report = apply(plan(&rows, &packages(), Utc::now()), &repo).await;

        assert_eq!(report.imported, 1);
        assert_eq!(report.failed_row, Some(3));
        assert!(report.error.is_some());
        // The third row was never attempted.
        assert_eq!(repo.accepted.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn blank_template_has_only_headers() {
        let rows = read_workbook(&template(false).unwrap()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn demo_template_imports_cleanly() {
        let rows = read_workbook(&template(true).unwrap()).unwrap();
        assert_eq!(rows.len(), DEMO_ROWS.len());
        assert_eq!(rows[0].number, 2);
        assert_eq!(rows[1].cells.get("device").map(String::as_str), Some("2"));
        assert!(!rows[1].cells.contains_key("email"));

        let plan = plan(&rows, &packages(), Utc::now());
        assert_eq!(plan.ready.len(), DEMO_ROWS.len());
        assert_eq!(plan.skipped, 0);
        assert_eq!(plan.ready[0].1.selected_package, "pkg-basic");
        assert_eq!(plan.ready[0].1.final_price, 1500.0);
    }

    #[test]
    fn garbage_is_not_a_workbook() {
        assert!(matches!(
            read_workbook(b"not a spreadsheet"),
            Err(ImportError::Workbook(_))
        ));
    }
}
