use serde::Serialize;

/// Envelope shared by every JSON endpoint. `code` mirrors the HTTP status;
/// failures may still carry structured `data` (e.g. `retryAfter`).
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    pub data: Option<T>,
    pub timestamp: i64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            message: "Success".to_string(),
            data: Some(data),
            timestamp: now_millis(),
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
            timestamp: now_millis(),
        }
    }

    pub fn with_data(self, data: Option<T>) -> Self {
        Self { data, ..self }
    }
}
