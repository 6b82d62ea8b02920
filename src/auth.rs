//! Bearer-token authentication for the HTTP transport.
//!
//! When tokens are configured, every request under `/api` and the MCP
//! endpoint must carry `Authorization: Bearer <token>`. Tokens are compared
//! in constant time.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashSet;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Accepted bearer tokens. Empty means authentication is off.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    tokens: HashSet<String>,
}

impl AuthConfig {
    /// Create a new AuthConfig from a list of tokens.
    pub fn from_tokens(tokens: Vec<String>) -> Result<Self, String> {
        let mut valid_tokens = HashSet::new();
        for token in tokens {
            let trimmed = token.trim().to_string();
            if trimmed.is_empty() {
                return Err("Empty token value in configuration".to_string());
            }
            valid_tokens.insert(trimmed);
        }
        Ok(Self {
            tokens: valid_tokens,
        })
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        !self.tokens.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Check a presented token against every configured token.
    pub fn verify(&self, provided: &str) -> bool {
        // Compare against every token, no early exit
        let mut found = false;
        for expected in &self.tokens {
            if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
                found = true;
            }
        }
        found
    }
}

/// Authentication middleware for HTTP requests.
pub async fn auth_middleware(
    State(auth_config): State<Arc<AuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !auth_config.is_enabled() {
        return next.run(request).await;
    }

    let token = match extract_bearer_token(&request) {
        Ok(Some(token)) => token,
        Ok(None) => {
            warn!(path = %request.uri().path(), "Authentication failed: missing Authorization header");
            return unauthorized_response(
                "Missing Bearer token in Authorization header",
                "Include a valid token: 'Authorization: Bearer <token>'",
            );
        }
        Err(msg) => {
            warn!(path = %request.uri().path(), "Authentication failed: invalid header format");
            return unauthorized_response(
                msg,
                "Use the format: 'Authorization: Bearer <your-token>'",
            );
        }
    };

    if auth_config.verify(token) {
        next.run(request).await
    } else {
        warn!(token_prefix = %mask_token(token), "Authentication failed: invalid token");
        unauthorized_response(
            "Invalid Bearer token",
            "Check that you are using a valid token configured on the server",
        )
    }
}

fn extract_bearer_token(request: &Request<Body>) -> Result<Option<&str>, &'static str> {
    let Some(auth_header) = request.headers().get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Authorization header contains invalid characters")?;

    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return Err("Invalid Authorization header format. Expected 'Bearer <token>'");
    };

    let token = token.trim();
    if token.is_empty() {
        return Err("Bearer token is empty");
    }

    Ok(Some(token))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

fn mask_token(token: &str) -> String {
    if token.chars().count() <= 3 {
        "***".to_string()
    } else {
        format!("{}***", token.chars().take(3).collect::<String>())
    }
}

fn unauthorized_response(message: impl Into<String>, suggestion: impl Into<String>) -> Response {
    let body = serde_json::json!({
        "error": message.into(),
        "suggestion": suggestion.into(),
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
