//! Bearer-credential authentication (spec.md §3 "Subject ... derived from a
//! bearer credential").
//!
//! Generalizes the teacher's flat `api_keys: Vec<String>` allow-list
//! (`api::server::ApiConfig`) into a keyed table mapping each credential to
//! a `Subject` (opaque key + tier), since tier is required to resolve caps.

use std::collections::HashMap;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::domain::{Subject, Tier};

#[derive(Debug, Clone, Default)]
pub struct AuthTable {
    credentials: HashMap<String, Subject>,
}

impl AuthTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, credential: impl Into<String>, subject_key: impl Into<String>, tier: Tier) {
        self.credentials
            .insert(credential.into(), Subject::new(subject_key, tier));
    }

    pub fn resolve(&self, credential: &str) -> Option<Subject> {
        self.credentials.get(credential).cloned()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Unauthorized {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, Json(self)).into_response()
    }
}

/// Extracted from `Authorization: Bearer <credential>`, resolved against the
/// shared `AuthTable` in request state.
pub struct AuthenticatedSubject(pub Subject);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedSubject
where
    S: Send + Sync,
    AuthTable: axum::extract::FromRef<S>,
{
    type Rejection = Unauthorized;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let unauthorized = || Unauthorized {
            error: "unauthorized",
            message: "missing or invalid bearer credential".to_string(),
        };

        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(unauthorized)?;

        let credential = header.strip_prefix("Bearer ").ok_or_else(unauthorized)?;

        let table = AuthTable::from_ref(state);
        table.resolve(credential).map(AuthenticatedSubject).ok_or_else(unauthorized)
    }
}
