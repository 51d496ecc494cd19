pub mod app_auth;
pub mod mirror;

pub use app_auth::{InstallationTokenProvider, TokenSource};
pub use mirror::GitDataClient;

pub(crate) const USER_AGENT: &str = "ClawHub-Backup/1.0";
