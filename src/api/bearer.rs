//! Bearer token extraction middleware
//!
//! Tokens are looked up in the `Authorization: Bearer <token>` header first
//! and in the `Bearer` cookie second. The first source that decodes wins;
//! when every present source fails, the last failure is reported. A request
//! without any token passes through with an empty [`BearerContext`].

use super::GatewayError;
use crate::tokens::{BearerToken, TokenError};
use axum::body::Body;
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

const AUTHORIZATION_PREFIX: &str = "Bearer ";
const BEARER_COOKIE: &str = "Bearer";

/// Bearer token of the current request, stored in request extensions.
#[derive(Debug, Clone, Default)]
pub struct BearerContext(pub Option<BearerToken>);

impl BearerContext {
    pub fn token(&self) -> Option<&BearerToken> {
        self.0.as_ref()
    }
}

fn token_from_header(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix(AUTHORIZATION_PREFIX)
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn token_from_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == BEARER_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|token| !token.is_empty())
}

/// Decode the request's bearer token, if any.
pub fn fetch_bearer_token(headers: &HeaderMap) -> Result<Option<BearerToken>, TokenError> {
    let sources: [fn(&HeaderMap) -> Option<&str>; 2] = [token_from_header, token_from_cookie];
    let mut last_error = None;

    for source in sources {
        let Some(encoded) = source(headers) else {
            continue;
        };
        match BearerToken::from_base64(encoded) {
            Ok(token) => return Ok(Some(token)),
            Err(err) => last_error = Some(err),
        }
    }

    match last_error {
        Some(err) => Err(err),
        None => Ok(None),
    }
}

/// Axum middleware attaching a [`BearerContext`] to every request.
///
/// An undecodable token is rejected with 400.
pub async fn bearer_middleware(mut request: Request<Body>, next: Next) -> Response {
    match fetch_bearer_token(request.headers()) {
        Ok(token) => {
            if let Some(token) = &token {
                debug!("bearer token issued by {}", token.issuer);
            }
            request.extensions_mut().insert(BearerContext(token));
            next.run(request).await
        }
        Err(err) => {
            GatewayError::bad_request(format!("could not fetch bearer token: {}", err))
                .into_response()
        }
    }
}
