use crate::auth::AuthUser;
use crate::models::ApiResponse;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::entities::backup_sync_state;
use common::entities::packages::PackageKind;
use common::services::github_import::{CandidatePreview, ImportRequest, PreviewResult};
use common::services::publish::{PackageDetail, PublishRequest, PublishResult, UploadFile};
use common::services::ServiceError;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Wraps a `ServiceError` so handlers can use `?` and still answer with the
/// `ApiResponse` envelope and the matching HTTP status.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ServiceError {
            code,
            message,
            data,
        } = self.0;
        let status = u16::try_from(code)
            .ok()
            .and_then(|c| StatusCode::from_u16(c).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(code, %message, "Request failed");
        }

        let retry_after = data
            .as_ref()
            .and_then(|d| d.get("retryAfter"))
            .and_then(|v| v.as_u64());

        let body = Json(ApiResponse::error(code, message).with_data(data));
        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after.filter(|_| status == StatusCode::TOO_MANY_REQUESTS) {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn parse_kind(raw: &str) -> Result<PackageKind, ApiError> {
    raw.parse::<PackageKind>()
        .map_err(|e| ServiceError::new(400, e.to_string()).into())
}

async fn enforce_rate_limit(
    state: &AppState,
    scope: &str,
    user: &AuthUser,
    limit: i64,
) -> Result<(), ApiError> {
    let key = format!("{}:{}", scope, user.user_id);
    let window = Duration::from_secs(state.settings.rate_limit.window_seconds.max(1) as u64);
    let now = chrono::Utc::now().timestamp_millis();

    let decision = state.rate_limiter.check_at(&key, limit, window, now).await?;
    if decision.allowed {
        return Ok(());
    }

    let retry_after = decision.retry_after_secs(now);
    tracing::info!(key = %key, retry_after, "Rate limited");
    Err(ServiceError::new(429, "Rate limit exceeded")
        .with_data(serde_json::json!({
            "error": "rate_limited",
            "retryAfter": retry_after,
        }))
        .into())
}

#[derive(Debug, Deserialize)]
pub struct PreviewBody {
    pub url: String,
}

pub async fn preview_import(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<PreviewBody>,
) -> ApiResult<PreviewResult> {
    enforce_rate_limit(
        &state,
        "import",
        &user,
        state.settings.rate_limit.import_per_window,
    )
    .await?;
    let preview = state.import.preview(&body.url).await?;
    Ok(Json(ApiResponse::success(preview)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateBody {
    pub url: String,
    pub candidate_path: String,
}

pub async fn preview_import_candidate(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<CandidateBody>,
) -> ApiResult<CandidatePreview> {
    enforce_rate_limit(
        &state,
        "import",
        &user,
        state.settings.rate_limit.import_per_window,
    )
    .await?;
    let preview = state
        .import
        .preview_candidate(&user.actor(), &body.url, &body.candidate_path)
        .await?;
    Ok(Json(ApiResponse::success(preview)))
}

pub async fn import_from_github(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<ImportRequest>,
) -> ApiResult<PublishResult> {
    enforce_rate_limit(
        &state,
        "import",
        &user,
        state.settings.rate_limit.import_per_window,
    )
    .await?;
    let result = state.import.import(&user.actor(), body).await?;
    Ok(Json(ApiResponse::success(result)))
}

#[derive(Debug, Deserialize)]
pub struct UploadBody {
    pub path: String,
    /// Base64 (standard alphabet) file content.
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectPublishBody {
    pub slug: String,
    pub display_name: String,
    pub version: String,
    #[serde(default)]
    pub changelog: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub summary: Option<String>,
    pub files: Vec<UploadBody>,
}

pub async fn publish_package(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(kind): Path<String>,
    Json(body): Json<DirectPublishBody>,
) -> ApiResult<PublishResult> {
    let kind = parse_kind(&kind)?;
    enforce_rate_limit(
        &state,
        "publish",
        &user,
        state.settings.rate_limit.publish_per_window,
    )
    .await?;

    let uploads = body
        .files
        .into_iter()
        .map(|file| {
            STANDARD
                .decode(file.content.as_bytes())
                .map(|bytes| UploadFile {
                    path: file.path.clone(),
                    bytes,
                })
                .map_err(|_| {
                    ServiceError::new(400, format!("Invalid base64 content for {}", file.path))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let files = state.publish.store_files(uploads).await?;
    let result = state
        .publish
        .publish(
            &user.actor(),
            PublishRequest {
                kind,
                slug: body.slug,
                display_name: body.display_name,
                version: body.version,
                changelog: body.changelog.unwrap_or_default(),
                tags: body.tags.unwrap_or_else(|| vec!["latest".to_string()]),
                summary: body.summary,
                files,
                source: None,
            },
        )
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

pub async fn get_package(
    State(state): State<Arc<AppState>>,
    Path((kind, slug)): Path<(String, String)>,
) -> ApiResult<PackageDetail> {
    let kind = parse_kind(&kind)?;
    let detail = state.publish.get_package(kind, &slug).await?;
    Ok(Json(ApiResponse::success(detail)))
}

pub async fn get_backup_state(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(key): Path<String>,
) -> ApiResult<backup_sync_state::Model> {
    if !user.is_admin() {
        return Err(ServiceError::new(403, "Admin role required").into());
    }
    let record = state
        .sync_state
        .get(&key)
        .await
        .map_err(ServiceError::from)?
        .ok_or_else(|| ServiceError::new(404, format!("No backup state for {}", key)))?;
    Ok(Json(ApiResponse::success(record)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::dto::JwtClaims;
    use crate::build_router;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header::AUTHORIZATION, Request},
    };
    use common::entities::backup_sync_state::SyncStatus;
    use common::github::http::{HttpFetcher, HttpRequest, HttpResponse};
    use common::repositories::{
        PackageRepositoryImpl, RateLimitRepositoryImpl, SyncStateRepository,
        SyncStateRepositoryImpl,
    };
    use common::services::github_import::GithubImportServiceImpl;
    use common::services::publish::{PublishService, PublishServiceImpl};
    use common::services::rate_limit::RateLimiter;
    use common::settings::Settings;
    use common::storage::MemoryStorage;
    use http_body_util::BodyExt;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use migration::MigratorTrait;
    use sea_orm::Database;
    use serde_json::{json, Value};
    use std::io::Write;
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &str = "test-signing-key";
    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    fn demo_zip() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let options = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            for (path, content) in [
                (
                    "b-0123456/skills/demo/SKILL.md",
                    "---\nname: demo\ndescription: A demo\n---\nSee [guide](docs/guide.md).",
                ),
                ("b-0123456/skills/demo/docs/guide.md", "guide"),
                ("b-0123456/skills/demo/notes.txt", "notes"),
            ] {
                zip.start_file(path, options).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    /// Answers the HEAD redirect and the codeload archive for `a/b`.
    struct FakeGithub;

    #[async_trait]
    impl HttpFetcher for FakeGithub {
        async fn fetch(&self, request: HttpRequest) -> anyhow::Result<HttpResponse> {
            if request.url.ends_with("/archive/HEAD.zip") {
                Ok(HttpResponse::from_bytes(302, "").with_header(
                    "location",
                    &format!("https://codeload.github.com/a/b/zip/{}", SHA),
                ))
            } else if request.url.contains("/zip/") {
                Ok(HttpResponse::from_bytes(200, demo_zip()))
            } else {
                Ok(HttpResponse::from_bytes(404, ""))
            }
        }
    }

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.auth.jwt.signing_key = Some(SECRET.to_string());
        settings
    }

    async fn setup(settings: Settings) -> (Arc<AppState>, Arc<SyncStateRepositoryImpl>) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        migration::Migrator::up(&db, None).await.unwrap();
        let db = Arc::new(db);

        let publish: Arc<dyn PublishService> = Arc::new(PublishServiceImpl::new(
            Arc::new(PackageRepositoryImpl::new(db.clone())),
            Arc::new(MemoryStorage::new()),
        ));
        let import = Arc::new(GithubImportServiceImpl::new(
            Arc::new(FakeGithub),
            publish.clone(),
            settings.github.endpoints(),
            settings.import.clone(),
        ));
        let sync_state = Arc::new(SyncStateRepositoryImpl::new(db.clone()));

        let state = Arc::new(AppState {
            settings,
            publish,
            import,
            rate_limiter: RateLimiter::new(Arc::new(RateLimitRepositoryImpl::new(db))),
            sync_state: sync_state.clone(),
        });
        (state, sync_state)
    }

    fn token(user_id: Uuid, handle: &str, role: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = JwtClaims {
            iss: "clawhub".to_string(),
            aud: "clawhub".to_string(),
            sub: user_id.to_string(),
            handle: handle.to_string(),
            role: role.to_string(),
            iat: now,
            exp: now + 3600,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn post(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn call(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn publish_body(version: &str) -> Value {
        json!({
            "slug": "notes",
            "displayName": "Notes",
            "version": version,
            "files": [
                {"path": "SKILL.md", "content": STANDARD.encode("# Notes")},
                {"path": "docs/usage.md", "content": STANDARD.encode("usage")},
            ],
        })
    }

    #[tokio::test]
    async fn publish_requires_bearer_token() {
        let (state, _) = setup(test_settings()).await;
        let (status, body) = call(
            &state,
            post("/api/packages/skill/publish", None, publish_body("1.0.0")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 401);
    }

    #[tokio::test]
    async fn token_with_path_like_handle_is_rejected() {
        let (state, _) = setup(test_settings()).await;
        for handle in ["../admin", "a/b", ".."] {
            let token = token(Uuid::new_v4(), handle, "user");
            let (status, body) = call(
                &state,
                post(
                    "/api/packages/skill/publish",
                    Some(&token),
                    publish_body("1.0.0"),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{handle}");
            assert_eq!(body["code"], 401);
        }
    }

    #[tokio::test]
    async fn direct_publish_then_lookup() {
        let (state, _) = setup(test_settings()).await;
        let token = token(Uuid::new_v4(), "alice", "user");

        let (status, body) = call(
            &state,
            post(
                "/api/packages/skill/publish",
                Some(&token),
                publish_body("1.0.0"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["slug"], "notes");
        assert_eq!(body["data"]["version"], "1.0.0");

        let (status, body) = call(&state, get("/api/packages/skill/notes", None)).await;
        assert_eq!(status, StatusCode::OK);
        let latest = &body["data"]["latestVersion"];
        assert_eq!(latest["version"], "1.0.0");
        assert_eq!(latest["files"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"]["ownerHandle"], "alice");
        assert_eq!(latest["tags"], json!(["latest"]));

        let (status, body) = call(&state, get("/api/packages/soul/notes", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 404);
    }

    #[tokio::test]
    async fn publish_rejects_bad_kind_and_content() {
        let (state, _) = setup(test_settings()).await;
        let token = token(Uuid::new_v4(), "alice", "user");

        let (status, _) = call(
            &state,
            post(
                "/api/packages/plugin/publish",
                Some(&token),
                publish_body("1.0.0"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut body = publish_body("1.0.0");
        body["files"][0]["content"] = json!("%%% not base64");
        let (status, _) = call(
            &state,
            post("/api/packages/skill/publish", Some(&token), body),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn foreign_slug_is_a_conflict() {
        let (state, _) = setup(test_settings()).await;
        let alice = token(Uuid::new_v4(), "alice", "user");
        let bob = token(Uuid::new_v4(), "bob", "user");

        let (status, _) = call(
            &state,
            post("/api/packages/skill/publish", Some(&alice), publish_body("1.0.0")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &state,
            post("/api/packages/skill/publish", Some(&bob), publish_body("2.0.0")),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], 409);
    }

    #[tokio::test]
    async fn publish_is_rate_limited_per_user() {
        let mut settings = test_settings();
        settings.rate_limit.publish_per_window = 1;
        let (state, _) = setup(settings).await;
        let token = token(Uuid::new_v4(), "alice", "user");

        let (status, _) = call(
            &state,
            post("/api/packages/skill/publish", Some(&token), publish_body("1.0.0")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let response = build_router(state.clone())
            .oneshot(post(
                "/api/packages/skill/publish",
                Some(&token),
                publish_body("1.0.1"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()[RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after >= 1 && retry_after <= 60);
    }

    #[tokio::test]
    async fn github_import_preview_candidate_and_run() {
        let (state, _) = setup(test_settings()).await;
        let token = token(Uuid::new_v4(), "alice", "user");
        let url = "https://github.com/a/b";

        let (status, body) = call(
            &state,
            post("/api/import/github/preview", Some(&token), json!({ "url": url })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["resolved"]["commit"], SHA);
        assert_eq!(body["data"]["candidates"][0]["path"], "skills/demo");

        let (status, body) = call(
            &state,
            post(
                "/api/import/github/candidate",
                Some(&token),
                json!({ "url": url, "candidatePath": "skills/demo" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let preview = &body["data"];
        assert_eq!(preview["suggestedSlug"], "demo");
        assert_eq!(preview["suggestedVersion"], "1.0.0");
        assert_eq!(
            preview["defaultSelectedPaths"],
            json!(["skills/demo/SKILL.md", "skills/demo/docs/guide.md"])
        );

        let (status, body) = call(
            &state,
            post(
                "/api/import/github",
                Some(&token),
                json!({
                    "url": url,
                    "commit": SHA,
                    "candidatePath": "skills/demo",
                    "selectedPaths": preview["defaultSelectedPaths"],
                    "slug": "demo",
                    "displayName": "Demo",
                    "version": "1.0.0",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (_, body) = call(&state, get("/api/packages/skill/demo", None)).await;
        let latest = &body["data"]["latestVersion"];
        let paths: Vec<&str> = latest["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["path"].as_str().unwrap())
            .collect();
        assert_eq!(paths, vec!["SKILL.md", "docs/guide.md"]);
        assert_eq!(latest["source"]["commit"], SHA);
        assert_eq!(latest["source"]["path"], "skills/demo");
    }

    #[tokio::test]
    async fn import_errors_carry_kind() {
        let (state, _) = setup(test_settings()).await;
        let token = token(Uuid::new_v4(), "alice", "user");

        let (status, body) = call(
            &state,
            post(
                "/api/import/github/preview",
                Some(&token),
                json!({ "url": "https://gitlab.com/a/b" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["data"]["error"], "invalid_url");
    }

    #[tokio::test]
    async fn backup_state_is_admin_only() {
        let (state, sync_state) = setup(test_settings()).await;
        let user = token(Uuid::new_v4(), "alice", "user");
        let admin = token(Uuid::new_v4(), "root", "admin");

        let (status, _) = call(&state, get("/api/admin/backup/default", Some(&user))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&state, get("/api/admin/backup/default", Some(&admin))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        sync_state
            .save("default", Some("42".to_string()), SyncStatus::Idle, None)
            .await
            .unwrap();
        let (status, body) = call(&state, get("/api/admin/backup/default", Some(&admin))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["cursor"], "42");
        assert_eq!(body["data"]["status"], "idle");
    }
}
