//! Wire format of rotation messages: the decimal string of an application id

use crate::{Result, RotationError};

/// Encode an application id as a rotation message body
///
/// # Example
///
/// ```
/// use credential_rotation::encode_application_id;
///
/// assert_eq!(encode_application_id(42), "42");
/// ```
pub fn encode_application_id(app_id: i64) -> String {
    app_id.to_string()
}

/// Parse a rotation message body into an application id
///
/// Surrounding whitespace is ignored.
///
/// # Example
///
/// ```
/// use credential_rotation::parse_application_id;
///
/// assert_eq!(parse_application_id("7").unwrap(), 7);
/// assert_eq!(parse_application_id(" 42\n").unwrap(), 42);
/// assert!(parse_application_id("abc").is_err());
/// ```
pub fn parse_application_id(payload: &str) -> Result<i64> {
    payload
        .trim()
        .parse::<i64>()
        .map_err(|_| RotationError::InvalidMessage(format!("invalid app id: {:?}", payload)))
}
