use axum::http::HeaderMap;

#[cfg(test)]
mod tests;

/// Extract bearer credential from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
/// Returns the token string if present and valid.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, BearerError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(BearerError::Missing)?
        .to_str()
        .map_err(|_| BearerError::InvalidFormat)?;

    let (scheme, token) = auth_header
        .split_once(' ')
        .ok_or(BearerError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(BearerError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(BearerError::Empty);
    }

    Ok(token.to_string())
}

/// Bearer credential extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum BearerError {
    /// Authorization header not present
    Missing,
    /// Not in "Bearer <token>" form
    InvalidFormat,
    /// Token is empty string
    Empty,
}

impl std::fmt::Display for BearerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BearerError::Missing => write!(f, "Authorization header not provided"),
            BearerError::InvalidFormat => write!(f, "Invalid authorization header format"),
            BearerError::Empty => write!(f, "Authorization token is empty"),
        }
    }
}

impl std::error::Error for BearerError {}
