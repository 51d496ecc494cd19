pub mod archive;
pub mod candidates;
pub mod hashing;
pub mod markdown;
pub mod paths;
pub mod references;
pub mod skill;
