// Copyright (c) 2022 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Generate random alphanumeric string.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// Length of data exceeds 64KiB.
    TooManyData,

    /// Contains disallowed control characters.
    InvalidChar,

    /// Server or client shall DISCONNECT immediately.
    SeriousError,
}

impl From<std::string::FromUtf8Error> for StringError {
    fn from(_e: std::string::FromUtf8Error) -> StringError {
        StringError::SeriousError
    }
}

/// Check data length exceeds 64k or not.
///
/// # Errors
///
/// Returns error if `data` is larger than 64KiB.
#[inline]
pub fn validate_two_bytes_data(data: &[u8]) -> Result<(), StringError> {
    if data.len() > u16::MAX as usize {
        Err(StringError::TooManyData)
    } else {
        Ok(())
    }
}

/// Check string characters and length.
///
/// # Errors
///
/// Returns error if `s` is larger than 64KiB or contains disallowed characters.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > u16::MAX as usize {
        return Err(StringError::TooManyData);
    }

    for c in s.chars() {
        // U+0000 is disallowed anywhere in a packet [MQTT-1.5.3-2].
        if c == '\u{0000}' {
            return Err(StringError::SeriousError);
        }

        if ('\u{0001}'..='\u{001f}').contains(&c) || ('\u{007f}'..='\u{009f}').contains(&c) {
            return Err(StringError::InvalidChar);
        }
    }

    // Empty string is valid.
    Ok(())
}

/// Convert range of bytes to valid UTF-8 string.
///
/// # Errors
///
/// Returns error if `buf` contains invalid UTF-8 bytes or disallowed characters.
pub fn to_utf8_string(buf: &[u8]) -> Result<String, StringError> {
    let s = String::from_utf8(buf.to_vec())?;
    validate_utf8_string(&s)?;
    Ok(s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientIdError {
    /// Larger than 23 chars.
    TooLong,

    /// Can only contain 0-9a-zA-Z.
    InvalidChar,
}

/// Check client id characters and length.
///
/// A zero length client id is valid; the Server then assigns a unique
/// one on behalf of the client [MQTT-3.1.3-6].
///
/// # Errors
///
/// Returns error if `id` is longer than 23 bytes or contains characters
/// outside of "0123456789a-zA-Z".
pub fn validate_client_id(id: &str) -> Result<(), ClientIdError> {
    if id.len() > 23 {
        return Err(ClientIdError::TooLong);
    }
    if id.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(ClientIdError::InvalidChar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string() {
        let s = random_string(8);
        assert_eq!(s.len(), 8);
        assert!(validate_client_id(&s).is_ok());
    }

    #[test]
    fn test_validate_utf8_string() {
        assert!(validate_utf8_string("").is_ok());
        assert!(validate_utf8_string("sensors/室内/温度").is_ok());
        assert_eq!(
            validate_utf8_string("a\u{0000}b"),
            Err(StringError::SeriousError)
        );
        assert_eq!(
            validate_utf8_string("a\u{0007}b"),
            Err(StringError::InvalidChar)
        );
    }

    #[test]
    fn test_validate_client_id() {
        assert!(validate_client_id("").is_ok());
        assert!(validate_client_id("lian01").is_ok());
        assert_eq!(
            validate_client_id("too-long-client-id-xxxxxxxxxxxxx"),
            Err(ClientIdError::TooLong)
        );
        assert_eq!(
            validate_client_id("bad id"),
            Err(ClientIdError::InvalidChar)
        );
    }
}
