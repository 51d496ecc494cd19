use crate::domain::archive::ArchiveLimits;
use crate::github::GithubEndpoints;
use dotenvy::dotenv;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::Uncased,
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
struct Cli {
    port: Option<u16>,
    config: Option<String>,
}

fn parse_cli_from_args<I, S>(args: I) -> Cli
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut cli = Cli::default();
    let mut iter = args.into_iter().map(Into::into);

    // Skip binary name
    let _ = iter.next();

    while let Some(arg) = iter.next() {
        if let Some(raw_port) = arg.strip_prefix("--port=") {
            if let Ok(port) = raw_port.parse::<u16>() {
                cli.port = Some(port);
            }
            continue;
        }

        if arg == "--port" {
            if let Some(raw_port) = iter.next() {
                if let Ok(port) = raw_port.parse::<u16>() {
                    cli.port = Some(port);
                }
            }
            continue;
        }

        if let Some(raw_config) = arg.strip_prefix("--config=") {
            if !raw_config.is_empty() {
                cli.config = Some(raw_config.to_string());
            }
            continue;
        }

        if arg == "--config" {
            if let Some(config) = iter.next() {
                if !config.is_empty() {
                    cli.config = Some(config);
                }
            }
        }
    }

    cli
}

fn parse_cli() -> Cli {
    parse_cli_from_args(std::env::args())
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub port: u16,
    pub database: DatabaseSettings,
    pub s3: S3Settings,
    pub github: GithubSettings,
    #[serde(default)]
    pub github_app: GithubAppSettings,
    pub backup: BackupSettings,
    pub import: ImportSettings,
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseSettings {
    pub url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GithubSettings {
    pub api_url: String,
    pub web_url: String,
    pub codeload_host: String,
    pub token: Option<String>,
}

impl GithubSettings {
    pub fn endpoints(&self) -> GithubEndpoints {
        GithubEndpoints {
            web_url: self.web_url.clone(),
            api_url: self.api_url.clone(),
            codeload_host: self.codeload_host.clone(),
        }
    }
}

/// Credentials of the GitHub App that writes the backup mirrors. All three
/// must be present for the backup to run.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GithubAppSettings {
    pub app_id: Option<String>,
    pub private_key: Option<String>,
    pub installation_id: Option<String>,
}

impl GithubAppSettings {
    pub fn is_configured(&self) -> bool {
        [&self.app_id, &self.private_key, &self.installation_id]
            .iter()
            .all(|v| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackupSettings {
    pub skills_repo: String,
    pub skills_root: String,
    pub souls_repo: String,
    pub souls_root: String,
    pub interval_seconds: u64,
    pub batch_size: u64,
    pub max_batches: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ImportSettings {
    pub max_zip_bytes: u64,
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
    pub max_selected_bytes: u64,
}

impl ImportSettings {
    pub fn archive_limits(&self) -> ArchiveLimits {
        ArchiveLimits {
            max_files: self.max_files,
            max_file_bytes: self.max_file_bytes,
            max_total_bytes: self.max_total_bytes,
        }
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        let limits = ArchiveLimits::default();
        Self {
            max_zip_bytes: 50 * 1024 * 1024,
            max_files: limits.max_files,
            max_file_bytes: limits.max_file_bytes,
            max_total_bytes: limits.max_total_bytes,
            max_selected_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitSettings {
    pub window_seconds: i64,
    pub import_per_window: i64,
    pub publish_per_window: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AuthSettings {
    pub frontend_origin: Option<String>,
    #[serde(default)]
    pub jwt: JwtSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct JwtSettings {
    pub issuer: String,
    pub audience: String,
    pub signing_key: Option<String>,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            issuer: "clawhub".to_string(),
            audience: "clawhub".to_string(),
            signing_key: None,
        }
    }
}

/// Unprefixed variables honoured for compatibility with common deployment
/// setups, mapped onto their settings key.
const RAW_ENV_KEYS: [(&str, &str); 13] = [
    ("GITHUB_TOKEN", "github.token"),
    ("GITHUB_APP_ID", "github_app.app_id"),
    ("GITHUB_APP_PRIVATE_KEY", "github_app.private_key"),
    ("GITHUB_APP_INSTALLATION_ID", "github_app.installation_id"),
    ("GITHUB_SKILLS_REPO", "backup.skills_repo"),
    ("GITHUB_SKILLS_ROOT", "backup.skills_root"),
    ("GITHUB_SOULS_REPO", "backup.souls_repo"),
    ("GITHUB_SOULS_ROOT", "backup.souls_root"),
    ("AWS_REGION", "s3.region"),
    ("AWS_ENDPOINT_URL", "s3.endpoint"),
    ("AWS_ACCESS_KEY_ID", "s3.access_key_id"),
    ("AWS_SECRET_ACCESS_KEY", "s3.secret_access_key"),
    ("DATABASE_URL", "database.url"),
];

fn raw_env_key(name: &str) -> Option<&'static str> {
    RAW_ENV_KEYS
        .iter()
        .find(|(env, _)| env.eq_ignore_ascii_case(name))
        .map(|(_, key)| *key)
}

fn raw_env() -> Env {
    let names: Vec<&str> = RAW_ENV_KEYS.iter().map(|(env, _)| *env).collect();
    Env::raw().only(&names).map(|key| {
        raw_env_key(key.as_str())
            .map(Uncased::from)
            .unwrap_or_else(|| key.as_str().to_string().into())
    })
}

impl Settings {
    #[allow(clippy::result_large_err)]
    pub fn new() -> Result<Self, figment::Error> {
        dotenv().ok();
        let cli = parse_cli();

        let mut figment = Figment::from(Serialized::defaults(Settings::default()));

        figment = figment.merge(Toml::file("/etc/clawhub/config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            figment = figment.merge(Toml::file(config_dir.join("clawhub/config.toml")));
        }

        figment = figment.merge(Toml::file("clawhub.toml"));

        let config_path = cli
            .config
            .or_else(|| std::env::var("CLAWHUB_CONFIG_PATH").ok());
        if let Some(config_path) = config_path {
            figment = figment.merge(Toml::file(config_path));
        }

        figment = figment.merge(raw_env());
        figment = figment.merge(Env::prefixed("CLAWHUB_").split("__"));

        if let Some(port) = cli.port {
            figment = figment.merge(("port", port));
        }

        figment.extract()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            port: 3000,
            debug: false,
            database: DatabaseSettings {
                url: "sqlite://clawhub.db?mode=rwc".to_string(),
            },
            s3: S3Settings {
                bucket: "clawhub-files".to_string(),
                region: "us-east-1".to_string(),
                endpoint: None,
                access_key_id: None,
                secret_access_key: None,
                force_path_style: false,
            },
            github: GithubSettings {
                api_url: "https://api.github.com".to_string(),
                web_url: "https://github.com".to_string(),
                codeload_host: "codeload.github.com".to_string(),
                token: None,
            },
            github_app: GithubAppSettings::default(),
            backup: BackupSettings {
                skills_repo: "clawdbot/skills".to_string(),
                skills_root: "skills".to_string(),
                souls_repo: "clawdbot/souls".to_string(),
                souls_root: "souls".to_string(),
                interval_seconds: 3600,
                batch_size: 50,
                max_batches: 5,
            },
            import: ImportSettings::default(),
            rate_limit: RateLimitSettings {
                window_seconds: 60,
                import_per_window: 20,
                publish_per_window: 10,
            },
            auth: AuthSettings::default(),
        }
    }
}
