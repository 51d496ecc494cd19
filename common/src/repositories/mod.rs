pub mod packages;
pub mod rate_limits;
pub mod sync_state;

pub use packages::{PackageRepository, PackageRepositoryImpl};
pub use rate_limits::{RateLimitRepository, RateLimitRepositoryImpl};
pub use sync_state::{SyncStateRepository, SyncStateRepositoryImpl};
