use super::ApiError;
use crate::constants::tradingview::MAX_USERNAME_LENGTH;

pub fn validate_limit(limit: u64) -> Result<u64, ApiError> {
    const MAX_LIMIT: u64 = 1000;
    const MIN_LIMIT: u64 = 1;

    if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::validation(format!(
            "Invalid limit: {}. Limit must be between {} and {}",
            limit, MIN_LIMIT, MAX_LIMIT
        )));
    }
    Ok(limit)
}

pub fn validate_pine_id(pine_id: &str) -> Result<&str, ApiError> {
    let trimmed = pine_id.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("pine_id cannot be empty"));
    }

    if trimmed.len() > 128 || trimmed.chars().any(char::is_whitespace) {
        return Err(ApiError::validation(format!("Invalid pine_id: {trimmed}")));
    }

    Ok(trimmed)
}

pub fn validate_tradingview_username(username: &str) -> Result<&str, ApiError> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("Username cannot be empty"));
    }

    if trimmed.len() > MAX_USERNAME_LENGTH {
        return Err(ApiError::validation(format!(
            "Username must be {MAX_USERNAME_LENGTH} characters or less"
        )));
    }

    if !trimmed
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(ApiError::validation(
            "Username can only contain letters, numbers, dots, hyphens, and underscores",
        ));
    }

    Ok(trimmed)
}

pub fn validate_key_count(count: usize) -> Result<usize, ApiError> {
    use crate::constants::keys::MAX_BATCH_SIZE;

    if !(1..=MAX_BATCH_SIZE).contains(&count) {
        return Err(ApiError::validation(format!(
            "Invalid count: {count}. Count must be between 1 and {MAX_BATCH_SIZE}"
        )));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_limit() {
        assert!(validate_limit(1).is_ok());
        assert!(validate_limit(1000).is_ok());
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(1001).is_err());
    }

    #[test]
    fn test_validate_pine_id() {
        assert_eq!(validate_pine_id(" PUB;abc123 ").unwrap(), "PUB;abc123");
        assert!(validate_pine_id("").is_err());
        assert!(validate_pine_id("PUB; abc").is_err());
    }

    #[test]
    fn test_validate_tradingview_username() {
        assert!(validate_tradingview_username("trader_01").is_ok());
        assert!(validate_tradingview_username("john.doe-x").is_ok());
        assert!(validate_tradingview_username("  ").is_err());
        assert!(validate_tradingview_username("bad name").is_err());
        assert!(validate_tradingview_username("x/../y").is_err());
    }

    #[test]
    fn test_validate_key_count() {
        assert!(validate_key_count(1).is_ok());
        assert!(validate_key_count(0).is_err());
    }
}
