//! Author extraction from forwarded-identity headers.

use axum::http::HeaderMap;

/// Fallback author for unauthenticated API callers.
pub const API_CLIENT: &str = "api-client";

/// Resolve who submitted a request, in priority order:
/// `X-Forwarded-User` > `X-Forwarded-Email` > `X-Remote-User` >
/// `"api-client"`.
pub fn extract_author(headers: &HeaderMap) -> String {
    for header in ["x-forwarded-user", "x-forwarded-email", "x-remote-user"] {
        if let Some(value) = headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return value.to_owned();
        }
    }
    API_CLIENT.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_user_wins_over_email() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-user", HeaderValue::from_static("alice"));
        headers.insert("x-forwarded-email", HeaderValue::from_static("bob@example.com"));
        assert_eq!(extract_author(&headers), "alice");
    }

    #[test]
    fn email_wins_over_remote_user() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-email", HeaderValue::from_static("bob@example.com"));
        headers.insert("x-remote-user", HeaderValue::from_static("carol"));
        assert_eq!(extract_author(&headers), "bob@example.com");
    }

    #[test]
    fn no_headers_fall_back_to_api_client() {
        assert_eq!(extract_author(&HeaderMap::new()), API_CLIENT);
    }

    #[test]
    fn blank_header_values_are_skipped() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-user", HeaderValue::from_static("  "));
        headers.insert("x-remote-user", HeaderValue::from_static("dave"));
        assert_eq!(extract_author(&headers), "dave");
    }
}
