use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod hoops;
pub mod router;
pub mod session_token;
pub mod two_factor;
pub mod user;
pub mod util;

pub use hoops::{AuthError, DepotAuthExt, RouterAuthExt};
pub use router::router;
pub use two_factor::TwoFactorError;
pub use user::router as user_router;

/// Name of the long-lived session cookie (rotated on each refresh/reauth).
pub const SESSION_COOKIE_NAME: &str = "session_token";
/// Name of the short-lived JWT access-token cookie.
pub const JWT_COOKIE_NAME: &str = "access_token";
/// Rolling session window before a session is no longer renewable.
pub const SESSION_EXPIRY: Duration = Duration::from_secs(7 * 24 * 3600);

static JWT_SECRET: LazyLock<[u8; 32]> = LazyLock::new(rand::random);

static JWT_ENCODING_KEY: LazyLock<jsonwebtoken::EncodingKey> =
    LazyLock::new(|| {
        jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_slice())
    });

static JWT_DECODING_KEY: LazyLock<jsonwebtoken::DecodingKey> =
    LazyLock::new(|| {
        jsonwebtoken::DecodingKey::from_secret(JWT_SECRET.as_slice())
    });

static JWT_VALIDATION: LazyLock<jsonwebtoken::Validation> =
    LazyLock::new(|| jsonwebtoken::Validation::default());

pub fn jwt_encoding_key() -> &'static jsonwebtoken::EncodingKey {
    &JWT_ENCODING_KEY
}

pub fn jwt_decoding_key() -> &'static jsonwebtoken::DecodingKey {
    &JWT_DECODING_KEY
}

pub fn jwt_validation() -> &'static jsonwebtoken::Validation {
    &JWT_VALIDATION
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: i32,
    pub sid: i32,
    pub jti: session_token::SessionTokenHashTruncated,
    pub exp: usize,
    pub iat: usize,
}
