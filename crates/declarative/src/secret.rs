//! Secret values and their generation

use crate::error::TemplateError;
use rand::Rng;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

const ALPHANUMERIC: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// A secret string that never shows up in Debug or Display output
///
/// Use [`Secret::expose`] at the single point where the raw value is
/// written to the host.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// How to generate a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretSpec {
    /// Number of characters
    pub length: usize,
    /// Characters to draw from
    pub alphabet: String,
}

impl Default for SecretSpec {
    fn default() -> Self {
        Self {
            length: 16,
            alphabet: ALPHANUMERIC.to_string(),
        }
    }
}

impl SecretSpec {
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    pub fn with_alphabet(mut self, alphabet: impl Into<String>) -> Self {
        self.alphabet = alphabet.into();
        self
    }

    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.length == 0 {
            return Err(TemplateError::InvalidSecretSpec(
                "length must be at least 1".into(),
            ));
        }
        if self.alphabet.is_empty() {
            return Err(TemplateError::InvalidSecretSpec(
                "alphabet is empty".into(),
            ));
        }
        Ok(())
    }

    /// Draw a fresh secret from the OS random source
    pub fn generate(&self) -> Result<Secret, TemplateError> {
        self.validate()?;
        let alphabet: Vec<char> = self.alphabet.chars().collect();
        let mut rng = OsRng;
        let value: String = (0..self.length)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
            .collect();
        Ok(Secret(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_redacted() {
        let secret = Secret::new("hunter2hunter2");
        assert_eq!(format!("{secret}"), "<redacted>");
        assert!(!format!("{secret:?}").contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2hunter2");
    }

    #[test]
    fn default_spec_is_sixteen_alphanumerics() {
        let secret = SecretSpec::default().generate().unwrap();
        assert_eq!(secret.len(), 16);
        assert!(secret.expose().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn custom_alphabet_is_respected() {
        let secret = SecretSpec::default()
            .with_length(40)
            .with_alphabet("ab")
            .generate()
            .unwrap();
        assert_eq!(secret.len(), 40);
        assert!(secret.expose().chars().all(|c| c == 'a' || c == 'b'));
    }

    #[test]
    fn empty_spec_is_rejected() {
        assert!(SecretSpec::default().with_length(0).generate().is_err());
        assert!(SecretSpec::default().with_alphabet("").generate().is_err());
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&Secret::new("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }
}
