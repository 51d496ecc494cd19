use super::USER_AGENT;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::settings::GithubAppSettings;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Supplies a bearer token for GitHub API calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String>;
}

#[cfg(test)]
pub struct StaticToken(pub String);

#[cfg(test)]
#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Signs the short-lived RS256 JWT that authenticates as the App itself.
pub fn app_jwt(app_id: &str, key: &EncodingKey, now: DateTime<Utc>) -> Result<String> {
    let claims = AppClaims {
        iat: (now - Duration::seconds(60)).timestamp(),
        exp: (now + Duration::minutes(9)).timestamp(),
        iss: app_id.to_string(),
    };
    encode(&Header::new(Algorithm::RS256), &claims, key).context("Failed to sign app JWT")
}

/// Keys pasted into env vars often carry literal `\n` sequences.
fn normalize_pem(raw: &str) -> String {
    raw.trim().replace("\\n", "\n")
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(60) < self.expires_at
    }
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Installation access tokens, refreshed one minute before they expire.
pub struct InstallationTokenProvider {
    client: Client,
    api_url: String,
    app_id: String,
    installation_id: String,
    key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl InstallationTokenProvider {
    pub fn new(settings: &GithubAppSettings, api_url: &str) -> Result<Self> {
        let (Some(app_id), Some(private_key), Some(installation_id)) = (
            settings.app_id.as_deref(),
            settings.private_key.as_deref(),
            settings.installation_id.as_deref(),
        ) else {
            anyhow::bail!("GitHub App credentials are incomplete");
        };

        let key = EncodingKey::from_rsa_pem(normalize_pem(private_key).as_bytes())
            .context("Invalid GitHub App private key")?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            app_id: app_id.trim().to_string(),
            installation_id: installation_id.trim().to_string(),
            key,
            cached: Mutex::new(None),
        })
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let jwt = app_jwt(&self.app_id, &self.key, Utc::now())?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, self.installation_id
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!(
                "Installation token request failed: {} on url {}",
                resp.status(),
                url
            );
        }

        let body: AccessTokenResponse = resp.json().await?;
        tracing::debug!(expires_at = %body.expires_at, "Fetched installation token");
        Ok(CachedToken {
            token: body.token,
            expires_at: body.expires_at,
        })
    }
}

#[async_trait]
impl TokenSource for InstallationTokenProvider {
    async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref().filter(|c| c.is_fresh(Utc::now())) {
            return Ok(current.token.clone());
        }
        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    const PRIVATE_KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/fixtures/github_app_test_key.pem"
    ));
    const PUBLIC_KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/fixtures/github_app_test_key.pub.pem"
    ));

    #[test]
    fn app_jwt_is_backdated_and_short_lived() {
        let key = EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).unwrap();
        let now = Utc::now();
        let jwt = app_jwt("12345", &key, now).unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "iss"]);
        let decoded = decode::<AppClaims>(
            &jwt,
            &DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();

        assert_eq!(decoded.claims.iss, "12345");
        assert_eq!(decoded.claims.iat, now.timestamp() - 60);
        assert_eq!(decoded.claims.exp, now.timestamp() + 540);
    }

    #[test]
    fn escaped_newlines_in_key_are_restored() {
        let escaped = PRIVATE_KEY.trim().replace('\n', "\\n");
        let settings = GithubAppSettings {
            app_id: Some("1".into()),
            private_key: Some(escaped),
            installation_id: Some("2".into()),
        };
        assert!(InstallationTokenProvider::new(&settings, "https://api.github.com").is_ok());
    }

    #[test]
    fn incomplete_credentials_are_rejected() {
        let settings = GithubAppSettings {
            app_id: Some("1".into()),
            private_key: None,
            installation_id: Some("2".into()),
        };
        assert!(InstallationTokenProvider::new(&settings, "https://api.github.com").is_err());
    }

    #[test]
    fn cached_token_expires_a_minute_early() {
        let now = Utc::now();
        let token = CachedToken {
            token: "t".into(),
            expires_at: now + Duration::seconds(90),
        };
        assert!(token.is_fresh(now));
        assert!(!token.is_fresh(now + Duration::seconds(31)));
    }
}
