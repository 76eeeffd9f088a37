//! Token model - issued credentials and their status flags.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use uuid::Uuid;

/// Set of independent token status flags stored as an integer bitmask.
///
/// The empty set means the token is fully valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenStatus(i32);

impl TokenStatus {
    pub const VALID: TokenStatus = TokenStatus(0);
    pub const DEPROVISIONED: TokenStatus = TokenStatus(1);
    pub const REVOKED: TokenStatus = TokenStatus(2);
    pub const LOGGED_OUT: TokenStatus = TokenStatus(4);
    pub const STALE: TokenStatus = TokenStatus(8);

    /// Flags that make a token unusable for authentication.
    pub const REJECTED: TokenStatus = TokenStatus(1 | 2 | 4);

    pub const fn from_bits(bits: i32) -> Self {
        TokenStatus(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every flag in `other` is set.
    pub const fn contains(self, other: TokenStatus) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: TokenStatus) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn with(self, other: TokenStatus) -> Self {
        TokenStatus(self.0 | other.0)
    }

    pub const fn without(self, other: TokenStatus) -> Self {
        TokenStatus(self.0 & !other.0)
    }
}

impl BitOr for TokenStatus {
    type Output = TokenStatus;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.with(rhs)
    }
}

impl BitOrAssign for TokenStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for TokenStatus {
    type Output = TokenStatus;

    fn bitand(self, rhs: Self) -> Self::Output {
        TokenStatus(self.0 & rhs.0)
    }
}

impl Not for TokenStatus {
    type Output = TokenStatus;

    fn not(self) -> Self::Output {
        TokenStatus(!self.0)
    }
}

/// Token type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
    /// Protection API token, issued to service accounts.
    Pat,
    /// Token re-issued against current privileges at audit time.
    Rpt,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
            TokenType::Pat => "pat",
            TokenType::Rpt => "rpt",
        }
    }
}

impl std::str::FromStr for TokenType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(TokenType::Access),
            "refresh" => Ok(TokenType::Refresh),
            "pat" => Ok(TokenType::Pat),
            "rpt" => Ok(TokenType::Rpt),
            _ => Err(format!("Invalid token type: {}", s)),
        }
    }
}

/// Persisted token record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Token {
    pub token_id: Uuid,
    pub identity_id: Uuid,
    pub token_type: String,
    pub status: i32,
    pub expiry_time: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl Token {
    /// Create a new valid token expiring `lifetime_seconds` from now.
    pub fn new(identity_id: Uuid, token_type: TokenType, lifetime_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            token_id: Uuid::new_v4(),
            identity_id,
            token_type: token_type.as_str().to_string(),
            status: TokenStatus::VALID.bits(),
            expiry_time: now + Duration::seconds(lifetime_seconds),
            created_utc: now,
        }
    }

    pub fn status(&self) -> TokenStatus {
        TokenStatus::from_bits(self.status)
    }

    /// True only when no status flag is set.
    pub fn valid(&self) -> bool {
        self.status().is_empty()
    }

    pub fn has_status(&self, status: TokenStatus) -> bool {
        self.status().contains(status)
    }

    pub fn set_status(&mut self, status: TokenStatus, value: bool) {
        let current = self.status();
        self.status = if value {
            current.with(status)
        } else {
            current.without(status)
        }
        .bits();
    }

    pub fn token_type(&self) -> Option<TokenType> {
        self.token_type.parse().ok()
    }

    pub fn is_expired(&self) -> bool {
        self.expiry_time <= Utc::now()
    }
}

/// Link between a token and a privilege cache snapshot it was issued against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TokenPrivilege {
    pub token_id: Uuid,
    pub privilege_cache_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_is_valid() {
        let token = Token::new(Uuid::new_v4(), TokenType::Access, 3600);
        assert!(token.valid());
        assert!(!token.is_expired());
        assert_eq!(token.token_type(), Some(TokenType::Access));
    }

    #[test]
    fn test_flags_are_independent() {
        let mut token = Token::new(Uuid::new_v4(), TokenType::Refresh, 3600);
        token.set_status(TokenStatus::STALE, true);
        token.set_status(TokenStatus::REVOKED, true);

        assert!(!token.valid());
        assert!(token.has_status(TokenStatus::STALE));
        assert!(token.has_status(TokenStatus::REVOKED));
        assert!(token.has_status(TokenStatus::STALE | TokenStatus::REVOKED));
        assert!(!token.has_status(TokenStatus::LOGGED_OUT));

        token.set_status(TokenStatus::REVOKED, false);
        assert_eq!(token.status(), TokenStatus::STALE);
    }

    #[test]
    fn test_setting_flag_twice_is_idempotent() {
        let mut token = Token::new(Uuid::new_v4(), TokenType::Access, 3600);
        token.set_status(TokenStatus::STALE, true);
        let once = token.status;
        token.set_status(TokenStatus::STALE, true);
        assert_eq!(token.status, once);
    }

    #[test]
    fn test_rejected_flags_exclude_stale() {
        assert!(!TokenStatus::REJECTED.intersects(TokenStatus::STALE));
        assert!(TokenStatus::REJECTED.contains(TokenStatus::REVOKED));
        assert!(TokenStatus::REJECTED.contains(TokenStatus::LOGGED_OUT));
        assert!(TokenStatus::REJECTED.contains(TokenStatus::DEPROVISIONED));
        assert_eq!((TokenStatus::STALE & !TokenStatus::STALE), TokenStatus::VALID);
    }
}
