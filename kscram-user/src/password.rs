//! Random passwords for newly created users.

use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Default password length.
pub const DEFAULT_LENGTH: usize = 27;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password length must be positive")]
    EmptyLength,

    #[error("cannot read from the system random source")]
    Entropy(#[source] rand::Error),
}

/// Produces one fresh secret per call.
pub trait PasswordGenerator: Send + Sync {
    fn generate(&self) -> Result<String, PasswordError>;
}

/// Alphanumeric passwords drawn from the operating system's random source.
#[derive(Debug, Clone)]
pub struct RandomPassword {
    length: usize,
}

impl RandomPassword {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomPassword {
    fn default() -> Self {
        Self::new(DEFAULT_LENGTH)
    }
}

impl PasswordGenerator for RandomPassword {
    fn generate(&self) -> Result<String, PasswordError> {
        if self.length == 0 {
            return Err(PasswordError::EmptyLength);
        }

        // Rejection sampling keeps every character equally likely.
        let limit = (256 / CHARSET.len() * CHARSET.len()) as u8;
        let mut password = String::with_capacity(self.length);
        let mut buf = [0u8; 64];
        while password.len() < self.length {
            OsRng.try_fill_bytes(&mut buf).map_err(PasswordError::Entropy)?;
            for byte in buf.iter().copied().filter(|b| *b < limit) {
                if password.len() == self.length {
                    break;
                }
                password.push(CHARSET[byte as usize % CHARSET.len()] as char);
            }
        }
        Ok(password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_length_and_charset() {
        let password = RandomPassword::default().generate().unwrap();
        assert_eq!(password.len(), DEFAULT_LENGTH);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_passwords_differ() {
        let generator = RandomPassword::new(32);
        let a = generator.generate().unwrap();
        let b = generator.generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_long_password_spans_buffers() {
        let password = RandomPassword::new(500).generate().unwrap();
        assert_eq!(password.len(), 500);
    }

    #[test]
    fn test_zero_length_fails() {
        assert!(matches!(
            RandomPassword::new(0).generate(),
            Err(PasswordError::EmptyLength)
        ));
    }
}
