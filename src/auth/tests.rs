use super::*;
use axum::http::HeaderValue;

fn headers_with_auth(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", HeaderValue::from_str(value).unwrap());
    headers
}

#[test]
fn test_valid_bearer_token() {
    let headers = headers_with_auth("Bearer abc-123");
    assert_eq!(extract_bearer_token(&headers).unwrap(), "abc-123");
}

#[test]
fn test_bearer_scheme_case_insensitive() {
    let headers = headers_with_auth("bearer abc-123");
    assert_eq!(extract_bearer_token(&headers).unwrap(), "abc-123");

    let headers = headers_with_auth("BEARER abc-123");
    assert_eq!(extract_bearer_token(&headers).unwrap(), "abc-123");
}

#[test]
fn test_missing_header() {
    let headers = HeaderMap::new();
    assert_eq!(extract_bearer_token(&headers), Err(BearerError::Missing));
}

#[test]
fn test_wrong_scheme() {
    let headers = headers_with_auth("Basic dXNlcjpwYXNz");
    assert_eq!(
        extract_bearer_token(&headers),
        Err(BearerError::InvalidFormat)
    );
}

#[test]
fn test_no_space() {
    let headers = headers_with_auth("Bearerabc");
    assert_eq!(
        extract_bearer_token(&headers),
        Err(BearerError::InvalidFormat)
    );
}

#[test]
fn test_empty_token() {
    let headers = headers_with_auth("Bearer  ");
    assert_eq!(extract_bearer_token(&headers), Err(BearerError::Empty));
}
