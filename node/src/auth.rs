//! Bearer token verification

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use dashmap::DashMap;
use ras_core::{IdentityVerifier, RasError, RasResult, ReviewerId};

/// In-memory token table mapping opaque bearer tokens to reviewers
#[derive(Default)]
pub struct TokenRegistry {
    tokens: DashMap<String, ReviewerId>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue or re-point a token
    pub fn insert(&self, token: impl Into<String>, reviewer: ReviewerId) {
        self.tokens.insert(token.into(), reviewer);
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityVerifier for TokenRegistry {
    async fn verify(&self, credential: &str) -> RasResult<ReviewerId> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(RasError::Unauthorized);
        }
        self.tokens
            .get(credential)
            .map(|entry| *entry.value())
            .ok_or(RasError::Unauthorized)
    }
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
