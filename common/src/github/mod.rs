pub mod http;
pub mod resolve;
pub mod url;

pub use http::{HttpFetcher, ReqwestFetcher};
pub use resolve::{fetch_github_zip_bytes, resolve_github_commit, GithubEndpoints};
pub use url::{parse_github_import_url, ParsedGithubImportUrl, ResolvedRepoRef};
