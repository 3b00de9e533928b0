//! Credential lookup for signing remote requests
//!
//! Token issuance and refresh live outside this service; we only map a user
//! to the bearer token it should be signed with.

use std::collections::HashMap;

pub trait TokenSource: Send + Sync {
    fn token_for(&self, user_id: i64) -> Option<String>;
}

/// Fixed user → token table, usually loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<i64, String>,
}

impl StaticTokens {
    pub fn new(tokens: HashMap<i64, String>) -> Self {
        Self { tokens }
    }

    /// Parse `user:token` pairs separated by commas. Malformed entries are
    /// skipped with a warning.
    pub fn parse(table: &str) -> Self {
        let mut tokens = HashMap::new();

        for entry in table.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once(':') {
                Some((user, token)) if !token.trim().is_empty() => match user.trim().parse() {
                    Ok(user_id) => {
                        tokens.insert(user_id, token.trim().to_string());
                    }
                    Err(_) => tracing::warn!("Ignoring token entry with invalid user id: {}", user),
                },
                _ => tracing::warn!("Ignoring malformed token entry"),
            }
        }

        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenSource for StaticTokens {
    fn token_for(&self, user_id: i64) -> Option<String> {
        self.tokens.get(&user_id).cloned()
    }
}
