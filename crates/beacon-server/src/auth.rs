use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

/// Trivial bearer-string check shared by the WebSocket hello and the HTTP
/// API middleware. No token configured means auth is disabled.
pub fn token_matches(expected: &Option<String>, provided: &Option<String>) -> bool {
    match expected {
        None => true,
        Some(exp) => provided.as_deref() == Some(exp.as_str()),
    }
}

/// Axum middleware that validates Bearer token authentication on the HTTP
/// API. If no token is configured, all requests are allowed through.
pub async fn require_bearer(
    expected: &Option<String>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(expected) = expected {
        let provided = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match provided {
            Some(token) if token == expected => {},
            _ => return Err(StatusCode::UNAUTHORIZED),
        }
    }

    Ok(next.run(request).await)
}
