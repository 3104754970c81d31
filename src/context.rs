//! Per-request context passed explicitly through the handler and relay.

use axum::http::HeaderMap;

/// Header carrying a caller-supplied correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Header carrying the authenticated caller, set by whatever fronts the relay.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity and correlation data for one chat exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Correlation id, caller supplied or derived from the session id.
    pub request_id: String,
    /// Caller identity, if the fronting layer provided one.
    pub user_id: Option<String>,
    /// Relay-local session counter.
    pub session_id: u64,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap, session_id: u64) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            request_id: header(REQUEST_ID_HEADER)
                .unwrap_or_else(|| format!("session-{}", session_id)),
            user_id: header(USER_ID_HEADER),
            session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_defaults_without_headers() {
        let ctx = RequestContext::from_headers(&HeaderMap::new(), 7);
        assert_eq!(ctx.request_id, "session-7");
        assert_eq!(ctx.user_id, None);
    }

    #[test]
    fn test_reads_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-42"));
        headers.insert(USER_ID_HEADER, HeaderValue::from_static(" owner-1 "));
        let ctx = RequestContext::from_headers(&headers, 1);
        assert_eq!(ctx.request_id, "req-42");
        assert_eq!(ctx.user_id.as_deref(), Some("owner-1"));
    }
}
