pub mod dto;
pub mod extractor;

pub use extractor::AuthUser;
