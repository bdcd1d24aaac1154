use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::auth::{AuthConfig, AuthError, AuthResult};
use crate::models::Role;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub role: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

#[derive(Debug, Clone)]
pub struct SignedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Identity carried by a token that passed signature and expiry checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub subject: Uuid,
    pub role: Role,
}

/// Signs and verifies stateless bearer tokens.
pub trait TokenCodec: Send + Sync {
    fn issue(&self, subject: Uuid, role: Role, ttl: Duration) -> AuthResult<SignedAccessToken>;

    fn verify(&self, token: &str) -> AuthResult<VerifiedToken>;

    fn default_ttl(&self) -> Duration;

    fn issue_default(&self, subject: Uuid, role: Role) -> AuthResult<SignedAccessToken> {
        self.issue(subject, role, self.default_ttl())
    }
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    access_token_ttl: Duration,
}

impl JwtService {
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        if config.jwt_secret.trim().is_empty() {
            return Err(AuthError::Config("jwt signing secret is not configured".into()));
        }

        let secret_bytes = config.jwt_secret.as_bytes();
        let encoding_key = EncodingKey::from_secret(secret_bytes);
        let decoding_key = DecodingKey::from_secret(secret_bytes);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[config.audience.clone()]);
        validation.set_issuer(&[config.issuer.clone()]);
        validation.leeway = 30;

        Ok(Self {
            encoding_key,
            decoding_key,
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_ttl: Duration::seconds(config.access_token_ttl_secs),
        })
    }

    pub fn decode_access_token(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(map_decode_error)?;
        Ok(token_data.claims)
    }
}

impl TokenCodec for JwtService {
    fn issue(&self, subject: Uuid, role: Role, ttl: Duration) -> AuthResult<SignedAccessToken> {
        let now = Utc::now();
        let expires_at = now + ttl;

        let claims = AccessTokenClaims {
            sub: subject.to_string(),
            role: role.as_str().to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(AuthError::Jwt)?;

        Ok(SignedAccessToken { token, expires_at })
    }

    fn verify(&self, token: &str) -> AuthResult<VerifiedToken> {
        if !has_jwt_shape(token) {
            return Err(AuthError::InvalidTokenFormat);
        }
        let claims = self.decode_access_token(token)?;
        let subject = claims
            .sub
            .parse::<Uuid>()
            .map_err(|_| AuthError::TokenInvalid)?;
        let role = Role::parse(&claims.role).ok_or(AuthError::TokenInvalid)?;
        Ok(VerifiedToken { subject, role })
    }

    fn default_ttl(&self) -> Duration {
        self.access_token_ttl
    }
}

/// Three non-empty base64url segments separated by dots.
pub fn has_jwt_shape(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        })
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AuthError::InvalidTokenFormat,
        _ => AuthError::TokenInvalid,
    }
}
