pub use super::backup_sync_state::Entity as BackupSyncState;
pub use super::package_versions::Entity as PackageVersions;
pub use super::packages::Entity as Packages;
pub use super::rate_limits::Entity as RateLimits;
pub use super::users::Entity as Users;
