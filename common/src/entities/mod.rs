pub mod backup_sync_state;
pub mod package_versions;
pub mod packages;
pub mod prelude;
pub mod rate_limits;
pub mod users;
