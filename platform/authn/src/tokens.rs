use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind,
};
use platform_authz::Principal;
use serde::de::DeserializeOwned;

use crate::{
    AuthnError, MIN_SECRET_BYTES,
    claims::{BearerClaims, ShareClaims, TokenUse},
};

/// Signing material and lifetimes for both token families.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    bearer_ttl: Duration,
    share_ttl: Duration,
}

/// What a verified share token grants: read access to exactly one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareGrant {
    pub resource_id: String,
    pub expires_at: i64,
}

impl fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenKeys")
            .field("bearer_ttl", &self.bearer_ttl)
            .field("share_ttl", &self.share_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenKeys {
    pub fn new(secret: &[u8], bearer_ttl: Duration, share_ttl: Duration) -> Result<Self, AuthnError> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(AuthnError::WeakSecret);
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            bearer_ttl,
            share_ttl,
        })
    }

    pub fn issue_bearer(&self, principal: &Principal, now: DateTime<Utc>) -> Result<String, AuthnError> {
        let claims = BearerClaims {
            sub: principal.user_id,
            org: principal.org_id,
            role: principal.role,
            iat: now.timestamp(),
            exp: (now + self.bearer_ttl).timestamp(),
            typ: TokenUse::Bearer,
        };
        self.sign(&claims)
    }

    pub fn issue_share(&self, resource_id: &str, now: DateTime<Utc>) -> Result<String, AuthnError> {
        let claims = ShareClaims {
            rid: resource_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.share_ttl).timestamp(),
            typ: TokenUse::Share,
        };
        self.sign(&claims)
    }

    pub fn sign<T: serde::Serialize>(&self, claims: &T) -> Result<String, AuthnError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(AuthnError::Signing)
    }

    /// Signature, then token family, then expiry.
    pub fn verify_bearer(&self, token: &str, now: DateTime<Utc>) -> Result<BearerClaims, AuthnError> {
        let claims: BearerClaims = self.verify_signature(token)?;
        if claims.typ != TokenUse::Bearer {
            return Err(AuthnError::InvalidCredential);
        }
        check_expiry(claims.exp, now)?;
        Ok(claims)
    }

    /// Verifies a share token and that it was minted for `expected_resource_id`.
    pub fn verify_share(
        &self,
        token: &str,
        expected_resource_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ShareGrant, AuthnError> {
        let claims: ShareClaims = self.verify_signature(token)?;
        if claims.typ != TokenUse::Share {
            return Err(AuthnError::InvalidCredential);
        }
        check_expiry(claims.exp, now)?;
        if claims.rid != expected_resource_id {
            return Err(AuthnError::ScopeMismatch);
        }
        Ok(ShareGrant {
            resource_id: claims.rid,
            expires_at: claims.exp,
        })
    }

    fn verify_signature<T: DeserializeOwned>(&self, token: &str) -> Result<T, AuthnError> {
        // Expiry is checked by the caller against an injected clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims.clear();
        jsonwebtoken::decode::<T>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthnError::ExpiredCredential,
                _ => AuthnError::InvalidCredential,
            })
    }
}

fn check_expiry(exp: i64, now: DateTime<Utc>) -> Result<(), AuthnError> {
    if now.timestamp() > exp {
        Err(AuthnError::ExpiredCredential)
    } else {
        Ok(())
    }
}

/// Extracts the credential from an `Authorization: Bearer ...` header value.
pub fn bearer_from_header(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
