//! Environment variable parsing with type safety.
//!
//! Provides a type-safe parser for `DTR_*` environment variables. Invalid
//! values are collected instead of aborting so every problem can be reported
//! at once; an invalid variable leaves the corresponding setting untouched.

use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },
}

/// Type-safe environment variable parser.
///
/// Every getter returns `None` when the variable is unset or invalid.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvParser {
    /// Create a new parser with the DTR_ prefix.
    pub fn new() -> Self {
        Self {
            prefix: "DTR_",
            errors: Vec::new(),
        }
    }

    /// Get all accumulated errors.
    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get a non-empty string value.
    pub fn get_string(&mut self, name: &str) -> Option<String> {
        env::var(self.var_name(name))
            .ok()
            .filter(|value| !value.is_empty())
    }

    /// Get a path value.
    pub fn get_path(&mut self, name: &str) -> Option<PathBuf> {
        self.get_string(name).map(PathBuf::from)
    }

    /// Get a boolean value.
    ///
    /// Accepts: 1, true, yes, on (for true)
    ///          0, false, no, off, "" (for false)
    pub fn get_bool(&mut self, name: &str) -> Option<bool> {
        let var_name = self.var_name(name);
        let value = env::var(&var_name).ok()?;
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get a u32 value with range validation.
    pub fn get_u32_range(&mut self, name: &str, min: u32, max: u32) -> Option<u32> {
        let var_name = self.var_name(name);
        let value = env::var(&var_name).ok()?;
        match value.parse::<u32>() {
            Ok(n) if n >= min && n <= max => Some(n),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var_name,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                None
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "unsigned 32-bit integer".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get a TCP port value (1..=65535).
    pub fn get_u16(&mut self, name: &str) -> Option<u16> {
        self.get_u32_range(name, 1, u16::MAX as u32)
            .and_then(|n| u16::try_from(n).ok())
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(env)]
    fn test_unset_is_none() {
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_bool("NEVER_SET_FLAG"), None);
        assert_eq!(parser.get_u32_range("NEVER_SET_NUMBER", 0, 10), None);
        assert!(!parser.has_errors());
    }

    #[test]
    #[serial(env)]
    fn test_bool_spellings() {
        let mut parser = EnvParser::new();
        for (raw, expected) in [("on", true), ("YES", true), ("0", false), ("off", false)] {
            // SAFETY: env mutation is serialized by the `env` test group.
            unsafe { env::set_var("DTR_TEST_BOOL", raw) };
            assert_eq!(parser.get_bool("TEST_BOOL"), Some(expected), "raw={raw}");
        }
        unsafe { env::remove_var("DTR_TEST_BOOL") };
        assert!(!parser.has_errors());
    }

    #[test]
    #[serial(env)]
    fn test_out_of_range_is_recorded() {
        unsafe { env::set_var("DTR_TEST_PORT", "70000") };
        let mut parser = EnvParser::new();
        let port = parser.get_u16("TEST_PORT");
        unsafe { env::remove_var("DTR_TEST_PORT") };

        assert_eq!(port, None);
        assert_eq!(parser.errors().len(), 1);
        assert!(parser.errors()[0].to_string().contains("DTR_TEST_PORT"));
    }

    #[test]
    #[serial(env)]
    fn test_empty_string_is_unset() {
        unsafe { env::set_var("DTR_TEST_HOST", "") };
        let mut parser = EnvParser::new();
        let host = parser.get_string("TEST_HOST");
        unsafe { env::remove_var("DTR_TEST_HOST") };
        assert_eq!(host, None);
    }
}
