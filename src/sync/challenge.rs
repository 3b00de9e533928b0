//! Challenge protocol for remote creation
//!
//! The platform may refuse to create courses and lessons until the caller
//! proves it is human. A refused create returns a site key in place of the
//! new id; the caller solves the challenge and retries the same create
//! with the resulting token. A successful create may also hand back a
//! token, which is kept per user and offered on the next create.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

use crate::remote::{CreateAck, RemoteError, RemoteNode};

/// Result of a single create attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created {
        remote_id: i64,
        challenge_token: Option<String>,
    },
    ChallengeRequired {
        site_key: String,
    },
}

impl CreateOutcome {
    /// Numeric identifiers are remote ids, anything else is a site key
    pub fn classify(ack: CreateAck) -> Result<Self, RemoteError> {
        let identifier = ack.identifier.trim();
        if identifier.is_empty() {
            return Err(RemoteError::Decode(
                "create acknowledged without an identifier".to_string(),
            ));
        }

        match identifier.parse::<i64>() {
            Ok(remote_id) if remote_id > 0 => Ok(CreateOutcome::Created {
                remote_id,
                challenge_token: ack.challenge_token,
            }),
            Ok(_) => Err(RemoteError::Decode(format!(
                "invalid remote id {}",
                identifier
            ))),
            Err(_) => Ok(CreateOutcome::ChallengeRequired {
                site_key: identifier.to_string(),
            }),
        }
    }
}

/// Outcome of syncing a new node, as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Synced { node: RemoteNode },
    ChallengeRequired { site_key: String },
}

impl SyncOutcome {
    pub fn remote(&self) -> Option<&RemoteNode> {
        match self {
            SyncOutcome::Synced { node } => Some(node),
            SyncOutcome::ChallengeRequired { .. } => None,
        }
    }
}

/// Per-user cache of challenge tokens handed out by the platform
#[derive(Default)]
pub struct ChallengeTokens {
    tokens: Mutex<HashMap<i64, String>>,
}

impl ChallengeTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: i64) -> Option<String> {
        self.tokens.lock().get(&user_id).cloned()
    }

    pub fn remember(&self, user_id: i64, token: String) {
        self.tokens.lock().insert(user_id, token);
    }

    pub fn forget(&self, user_id: i64) {
        self.tokens.lock().remove(&user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(identifier: &str, token: Option<&str>) -> CreateAck {
        CreateAck {
            identifier: identifier.to_string(),
            position: None,
            challenge_token: token.map(str::to_string),
        }
    }

    #[test]
    fn test_numeric_identifier_is_created() {
        let outcome = CreateOutcome::classify(ack("1234", Some("tok"))).unwrap();
        assert_eq!(
            outcome,
            CreateOutcome::Created {
                remote_id: 1234,
                challenge_token: Some("tok".to_string())
            }
        );
    }

    #[test]
    fn test_site_key_is_challenge() {
        let outcome = CreateOutcome::classify(ack("6LcKey-abc", None)).unwrap();
        assert_eq!(
            outcome,
            CreateOutcome::ChallengeRequired {
                site_key: "6LcKey-abc".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_identifiers() {
        assert!(CreateOutcome::classify(ack("", None)).is_err());
        assert!(CreateOutcome::classify(ack("0", None)).is_err());
        assert!(CreateOutcome::classify(ack("-5", None)).is_err());
    }

    #[test]
    fn test_token_cache_is_per_user() {
        let tokens = ChallengeTokens::new();
        tokens.remember(1, "a".to_string());
        tokens.remember(2, "b".to_string());

        assert_eq!(tokens.get(1).as_deref(), Some("a"));
        tokens.forget(1);
        assert_eq!(tokens.get(1), None);
        assert_eq!(tokens.get(2).as_deref(), Some("b"));
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(SyncOutcome::ChallengeRequired {
            site_key: "key".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "challenge_required");
        assert_eq!(json["site_key"], "key");
    }
}
