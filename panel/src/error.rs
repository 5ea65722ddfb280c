//! JSON problem responses for the back-office API.

use std::{collections::BTreeMap, fmt};

use actix_web::{
    http::{header, StatusCode},
    HttpResponse, ResponseError,
};
use common::{import::ImportError, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::ValidationErrors;

use crate::identity::IdentityError;

#[derive(Error, Debug)]
pub struct ApiError {
    pub http_code: StatusCode,
    pub body: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
    /// Field-level validation messages.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Vec<String>>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.body.detail.is_empty() {
            write!(f, "{}: {}", self.body.title, self.body.detail)
        } else {
            write!(f, "{}", self.body.title)
        }
    }
}

impl ApiError {
    pub fn new(http_code: StatusCode) -> Self {
        Self {
            http_code,
            body: ErrorBody {
                error_code: Some(http_code.as_u16()),
                ..ErrorBody::default()
            },
        }
    }

    pub fn bad_request() -> Self {
        Self::new(StatusCode::BAD_REQUEST).title("Bad Request")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND).title("Not Found")
    }

    pub fn conflict() -> Self {
        Self::new(StatusCode::CONFLICT).title("Conflict")
    }

    pub fn bad_gateway(cause: impl fmt::Display) -> Self {
        Self::new(StatusCode::BAD_GATEWAY)
            .title("Identity Service Error")
            .detail(cause.to_string())
    }

    pub fn internal(cause: impl fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR)
            .title("Internal Server Error")
            .detail(cause.to_string())
    }

    /// 400 carrying one message for one field.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let mut err = Self::bad_request().title("Validation Failed");
        err.body
            .fields
            .insert(field.to_string(), vec![message.into()]);
        err
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.body.title = title.into();
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.body.detail = detail.into();
        self
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let body = serde_json::to_string(&self.body).unwrap_or_default();

        HttpResponse::build(self.http_code)
            .append_header((header::CONTENT_TYPE, "application/problem+json"))
            .body(body)
    }

    fn status_code(&self) -> StatusCode {
        self.http_code
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound { .. } => ApiError::not_found().detail(err.to_string()),
            StoreError::Conflict { .. } => ApiError::conflict().detail(err.to_string()),
            _ => ApiError::internal(err),
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let mut err = ApiError::bad_request().title("Validation Failed");
        for (field, failures) in errors.field_errors() {
            let messages = failures
                .iter()
                .map(|failure| match &failure.message {
                    Some(message) => message.to_string(),
                    None => format!("{field} is invalid ({})", failure.code),
                })
                .collect();
            err.body.fields.insert(camel_case(&field), messages);
        }
        err
    }
}

/// Request bodies are camelCase; validator reports Rust field names.
fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        match c {
            '_' => upper = true,
            c if upper => {
                out.extend(c.to_uppercase());
                upper = false;
            }
            c => out.push(c),
        }
    }
    out
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        ApiError::bad_request()
            .title("Unreadable Spreadsheet")
            .detail(err.to_string())
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::UserNotFound(_) => ApiError::not_found().detail(err.to_string()),
            IdentityError::EmailExists(_) => ApiError::conflict().detail(err.to_string()),
            other => ApiError::bad_gateway(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Form {
        #[validate(length(min = 1, message = "Name is required"))]
        name: String,
        #[validate(range(min = 1))]
        device: u32,
        #[validate(length(min = 1))]
        selected_package: String,
    }

    #[test]
    fn validation_errors_become_field_messages() {
        let errors = Form {
            name: String::new(),
            device: 0,
            selected_package: String::new(),
        }
        .validate()
        .unwrap_err();
        let err = ApiError::from(errors);

        assert_eq!(err.http_code, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.error_code, Some(400));
        assert_eq!(err.body.fields["name"], vec!["Name is required".to_string()]);
        assert!(err.body.fields["device"][0].contains("range"));
        assert!(err.body.fields.contains_key("selectedPackage"));
    }

    #[test]
    fn store_errors_map_to_status_codes() {
        let missing = StoreError::NotFound {
            collection: "packages",
            id: "p1".into(),
        };
        assert_eq!(ApiError::from(missing).http_code, StatusCode::NOT_FOUND);

        let taken = StoreError::Conflict {
            collection: "customers",
            id: "c1".into(),
        };
        assert_eq!(ApiError::from(taken).http_code, StatusCode::CONFLICT);
    }
}
