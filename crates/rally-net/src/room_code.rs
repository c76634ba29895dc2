//! Short numeric room codes used as the rendezvous key between two players.
//!
//! Codes are read aloud or typed by hand, so they are 4 decimal digits.
//! They are not checked for uniqueness against other live sessions.

use std::fmt;

use rand::Rng;

/// Smallest generated code.
pub const MIN_CODE: u16 = 1000;
/// Largest generated code.
pub const MAX_CODE: u16 = 9999;
/// Longest code accepted from user input.
const MAX_INPUT_DIGITS: usize = 8;

/// A room code such as `"4821"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

/// Error returned when user input is not a valid room code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid room code {0:?}: expected 1 to 8 digits")]
pub struct InvalidRoomCode(pub String);

impl RoomCode {
    /// Generate a random code in `MIN_CODE..=MAX_CODE`.
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::rng())
    }

    /// Generate a code from the given RNG.
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let n: u16 = rng.random_range(MIN_CODE..=MAX_CODE);
        Self(n.to_string())
    }

    /// Parse a code typed by a player. Surrounding whitespace is ignored.
    pub fn parse(input: &str) -> Result<Self, InvalidRoomCode> {
        let trimmed = input.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= MAX_INPUT_DIGITS
            && trimmed.bytes().all(|b| b.is_ascii_digit());
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidRoomCode(input.to_string()))
        }
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RoomCode {
    type Err = InvalidRoomCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
