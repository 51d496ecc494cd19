pub mod github_import;
pub mod publish;
pub mod rate_limit;

use crate::error::ImportError;
use sea_orm::DbErr;

#[derive(Debug)]
pub struct ServiceError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)
    }
}

impl std::error::Error for ServiceError {}

impl ServiceError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Machine-readable error kind carried in `data.error`, if any.
    pub fn kind(&self) -> Option<&str> {
        self.data.as_ref()?.get("error")?.as_str()
    }
}

impl From<DbErr> for ServiceError {
    fn from(err: DbErr) -> Self {
        Self::new(500, format!("Database error: {}", err))
    }
}

impl From<ImportError> for ServiceError {
    fn from(err: ImportError) -> Self {
        Self::new(err.http_status() as i32, err.to_string())
            .with_data(serde_json::json!({ "error": err.code() }))
    }
}
