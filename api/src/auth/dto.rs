use serde::{Deserialize, Serialize};

fn default_role() -> String {
    "user".to_string()
}

/// Claims of the HS256 bearer tokens accepted by the api. Tokens are minted
/// by the identity service; the api only verifies them.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JwtClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub handle: String,
    #[serde(default = "default_role")]
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}
