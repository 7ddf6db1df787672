use crate::contract::{StoreResult, TokenStore};
use crate::TokenId;
use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use quench::choose;
use quench::crypto;
use quench::logging;
use serde_derive::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Fixed prefix carried by every ingress token.
pub const TOKEN_PREFIX: &str = "hlxn_";

/// Canonical raw token length: the prefix plus 40 key characters.
pub const TOKEN_LEN: usize = 45;

/// Leading characters of the raw token kept as the non-secret display prefix.
pub const DISPLAY_PREFIX_LEN: usize = 12;

/// A server token record. Created by external admin tooling; the daemon only
/// ever writes the debounced `last_used_at` stamp.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerToken {
    pub id: TokenId,
    pub token_hash: String,
    pub token_prefix: String,
    pub name: String,
    pub encrypted_rcon_password: String,
    pub game: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Result of a token lookup. The revoked/expired variants carry the display
/// prefix so the denial can be logged without the secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenLookup {
    Valid(ServerToken),
    NotFound,
    Revoked(String),
    Expired(String),
}

/// Hashes a raw token into its storage key (lowercase hex SHA-256).
#[inline]
pub fn hash_token(raw: &str) -> String {
    crypto::hex(&crypto::hash_sha256(raw.as_bytes()))
}

/// Checks the domain format of a raw token: printable, fixed prefix and
/// canonical length, key charset `[A-Za-z0-9_-]`.
pub fn format_valid(raw: &str) -> bool {
    raw.len() == TOKEN_LEN
        && raw.starts_with(TOKEN_PREFIX)
        && raw[TOKEN_PREFIX.len()..]
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-')
}

/// Returns the non-secret display prefix of a raw token.
pub fn display_prefix(raw: &str) -> String {
    raw.chars().take(DISPLAY_PREFIX_LEN).collect()
}

/// Masks a raw token for logging, keeping only the last 8 characters.
pub fn protect_token(raw: &str) -> String {
    let visible_from = raw.chars().count().saturating_sub(8);

    raw.chars()
        .enumerate()
        .map(|(idx, chr)| choose!(idx < visible_from => '*', chr))
        .collect()
}

/// Evaluates the revocation and expiry fields of a record against `now`.
/// Applied on every lookup, including token-cache hits, so a record that
/// crossed its expiry while cached never authenticates.
pub fn classify(token: ServerToken, now: DateTime<Utc>) -> TokenLookup {
    if token.revoked_at.is_some() {
        return TokenLookup::Revoked(token.token_prefix);
    }

    if let Some(expires_at) = token.expires_at {
        if expires_at < now {
            return TokenLookup::Expired(token.token_prefix);
        }
    }

    TokenLookup::Valid(token)
}

/// Lookup front of the token store with in-memory debouncing of the
/// `last_used_at` writes. Lookup failures raise; touch failures are logged
/// and swallowed.
pub struct TokenRepository {
    store: Arc<dyn TokenStore>,
    touched: Mutex<HashMap<TokenId, Instant>>,
    debounce: Duration,
    log: logging::Logger,
}

impl TokenRepository {
    pub fn new(store: Arc<dyn TokenStore>, debounce: Duration, log: &logging::Logger) -> TokenRepository {
        TokenRepository {
            store,
            touched: Mutex::new(HashMap::new()),
            debounce,
            log: log.new(logging::o!()),
        }
    }

    /// Looks up a record by token hash and classifies it against `now`.
    pub fn find_by_hash(&self, token_hash: &str, now: DateTime<Utc>) -> StoreResult<TokenLookup> {
        match self.store.find_by_hash(token_hash)? {
            Some(token) => Ok(classify(token, now)),
            None => Ok(TokenLookup::NotFound),
        }
    }

    pub fn find_by_id(&self, id: TokenId) -> StoreResult<Option<ServerToken>> {
        self.store.find_by_id(id)
    }

    /// Persists the `last_used_at` stamp unless a write for this id already
    /// went out within the debounce window. A failed write is warned about
    /// and swallowed; the attempt still consumes the window.
    pub fn update_last_used(&self, id: TokenId, now: Instant) {
        {
            let mut touched = self.touched.lock().expect("Token touch table poisoned");

            if let Some(last) = touched.get(&id) {
                if now.duration_since(*last) < self.debounce {
                    return;
                }
            }

            touched.insert(id, now);
        }

        if let Err(err) = self.store.touch_last_used(id, Utc::now()) {
            logging::warn!(self.log, "failed to persist last-used stamp";
                           "context" => "update_last_used",
                           "token_id" => id,
                           "error" => ?err);
        }
    }
}
