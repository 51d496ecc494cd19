use axum::http::HeaderValue;

/// Browser origins that may call the API with credentials, taken from the
/// comma-separated `auth.frontend_origin` setting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedOrigins(Vec<String>);

/// Scheme and host compare case-insensitively; a trailing slash is noise.
/// Opaque origins (`null`) and values without a scheme never match.
fn canonical(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() || !trimmed.contains("://") {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

impl AllowedOrigins {
    pub fn from_setting(raw: Option<&str>) -> Self {
        let mut origins: Vec<String> = Vec::new();
        for origin in raw.unwrap_or_default().split(',').filter_map(canonical) {
            if !origins.contains(&origin) {
                origins.push(origin);
            }
        }
        Self(origins)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn allows(&self, origin: &HeaderValue) -> bool {
        origin
            .to_str()
            .ok()
            .and_then(canonical)
            .map(|origin| self.0.contains(&origin))
            .unwrap_or(false)
    }
}
