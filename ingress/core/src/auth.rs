use crate::contract::{EventPublisher, NewServer, ServerStore, StoreResult};
use crate::event::{AuthData, Event, Payload};
use crate::limiter::{Cooldown, RateLimiter};
use crate::token::{self, TokenLookup, TokenRepository};
use crate::{ServerId, TokenId};
use chrono::Utc;
use hashbrown::HashMap;
use indexmap::IndexMap;
use quench::ident::IdentSource;
use quench::logging;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Outcome of a beacon. `Authenticated` and `AutoRegistered` both mean the
/// source is now live in the source cache.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthOutcome {
    Authenticated(ServerId),
    AutoRegistered { server_id: ServerId, token_id: TokenId },
    Unauthorized(DenyReason),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DenyReason {
    RateLimited,
    InvalidFormat,
    NotFound,
    Revoked,
    Expired,
}

struct CachedToken {
    token: token::ServerToken,
    cached_at: Instant,
}

struct CachedSource {
    server_id: ServerId,
    token_id: TokenId,
    cached_at: Instant,
}

/// Knobs of the authenticator; defaults match the daemon configuration.
#[derive(Clone, Debug)]
pub struct AuthSettings {
    pub token_cache_ttl: Duration,
    pub source_cache_ttl: Duration,
    pub warn_cooldown: Duration,
}

impl Default for AuthSettings {
    fn default() -> AuthSettings {
        AuthSettings {
            token_cache_ttl: Duration::from_millis(60_000),
            source_cache_ttl: Duration::from_millis(300_000),
            warn_cooldown: Duration::from_millis(300_000),
        }
    }
}

/// Validates token beacons and owns the token cache, the source cache and
/// the rate limiter. The source cache maps the UDP ephemeral source, not the
/// game port: a source is only trusted after its own successful beacon.
pub struct Authenticator {
    tokens: TokenRepository,
    servers: Arc<dyn ServerStore>,
    limiter: RateLimiter,
    publisher: Arc<dyn EventPublisher>,
    idents: Arc<dyn IdentSource>,
    token_cache: Mutex<HashMap<String, CachedToken>>,
    source_cache: Mutex<IndexMap<String, CachedSource>>,
    warn_cooldown: Cooldown,
    token_ttl: Duration,
    source_ttl: Duration,
    log: logging::Logger,
}

fn source_key(source: SocketAddr) -> String {
    format!("{}:{}", source.ip(), source.port())
}

impl Authenticator {
    pub fn new(
        tokens: TokenRepository,
        servers: Arc<dyn ServerStore>,
        limiter: RateLimiter,
        publisher: Arc<dyn EventPublisher>,
        idents: Arc<dyn IdentSource>,
        settings: AuthSettings,
        log: &logging::Logger,
    ) -> Authenticator {
        Authenticator {
            tokens,
            servers,
            limiter,
            publisher,
            idents,
            token_cache: Mutex::new(HashMap::new()),
            source_cache: Mutex::new(IndexMap::new()),
            warn_cooldown: Cooldown::new(settings.warn_cooldown),
            token_ttl: settings.token_cache_ttl,
            source_ttl: settings.source_cache_ttl,
            log: log.new(logging::o!()),
        }
    }

    /// Handles one token beacon. Every non-success short-circuits; every
    /// failure except rate limiting itself feeds the rate limiter.
    pub fn handle_beacon(
        &self,
        raw_token: &str,
        game_port: u16,
        source: SocketAddr,
        now: Instant,
    ) -> StoreResult<AuthOutcome> {
        if self.limiter.is_blocked(source.ip(), now) {
            logging::debug!(self.log, "beacon from blocked source";
                            "context" => "handle_beacon",
                            "source" => %source);

            return Ok(AuthOutcome::Unauthorized(DenyReason::RateLimited));
        }

        if !token::format_valid(raw_token) {
            self.limiter.record_failure(source.ip(), now);

            if self.warn_cooldown.permit(&format!("format:{}", source.ip()), now) {
                logging::warn!(self.log, "beacon with malformed token";
                               "context" => "handle_beacon",
                               "source" => %source,
                               "token" => token::protect_token(raw_token));
            }

            return Ok(AuthOutcome::Unauthorized(DenyReason::InvalidFormat));
        }

        let token = match self.validate_token(&token::hash_token(raw_token), now)? {
            TokenLookup::Valid(token) => token,
            TokenLookup::NotFound => {
                return Ok(self.deny(DenyReason::NotFound, token::protect_token(raw_token), source, now));
            }
            TokenLookup::Revoked(prefix) => {
                return Ok(self.deny(DenyReason::Revoked, prefix, source, now));
            }
            TokenLookup::Expired(prefix) => {
                return Ok(self.deny(DenyReason::Expired, prefix, source, now));
            }
        };

        self.tokens.update_last_used(token.id, now);

        let address = source.ip().to_string();

        let (server_id, auto_registered) =
            match self.servers.find_by_token_and_port(token.id, game_port)? {
                Some(existing) => {
                    // Identity is (token, game port); the address follows the
                    // container wherever it respawns.
                    if existing.address != address {
                        self.servers.update_address(existing.server_id, &address)?;

                        logging::info!(self.log, "server address updated";
                                       "context" => "handle_beacon",
                                       "server_id" => existing.server_id,
                                       "old_address" => &existing.address,
                                       "new_address" => &address);
                    }

                    (existing.server_id, false)
                }
                None => {
                    let created = self.servers.register(NewServer {
                        address: address.clone(),
                        port: game_port,
                        game: token.game.clone(),
                        auth_token_id: token.id,
                        rcon_password: token.encrypted_rcon_password.clone(),
                        name: format!("{}:{}", address, game_port),
                    })?;

                    logging::info!(self.log, "server auto-registered";
                                   "context" => "handle_beacon",
                                   "server_id" => created.server_id,
                                   "token_id" => token.id,
                                   "address" => &address,
                                   "game_port" => game_port,
                                   "game" => &token.game);

                    (created.server_id, true)
                }
            };

        self.source_cache
            .lock()
            .expect("Source cache poisoned")
            .insert(
                source_key(source),
                CachedSource {
                    server_id,
                    token_id: token.id,
                    cached_at: now,
                },
            );

        self.emit_authenticated(server_id, &address, game_port, &token.game, auto_registered);

        logging::info!(self.log, "beacon accepted";
                       "context" => "handle_beacon",
                       "server_id" => server_id,
                       "source" => %source,
                       "game_port" => game_port,
                       "auto_registered" => auto_registered);

        Ok(match auto_registered {
            true => AuthOutcome::AutoRegistered {
                server_id,
                token_id: token.id,
            },
            false => AuthOutcome::Authenticated(server_id),
        })
    }

    /// Resolves an authenticated source to its server id. Expired entries
    /// are pruned lazily.
    pub fn lookup_source(&self, source: SocketAddr, now: Instant) -> Option<ServerId> {
        let mut cache = self.source_cache.lock().expect("Source cache poisoned");
        let key = source_key(source);

        let hit = cache
            .get(&key)
            .map(|entry| (entry.server_id, now.duration_since(entry.cached_at) < self.source_ttl));

        match hit {
            Some((server_id, true)) => Some(server_id),
            Some((_, false)) => {
                cache.swap_remove(&key);
                None
            }
            None => None,
        }
    }

    /// Server ids with at least one live source entry.
    pub fn authenticated_server_ids(&self, now: Instant) -> Vec<ServerId> {
        let mut cache = self.source_cache.lock().expect("Source cache poisoned");
        let source_ttl = self.source_ttl;

        cache.retain(|_, entry| now.duration_since(entry.cached_at) < source_ttl);

        let mut ids: Vec<ServerId> = cache.values().map(|entry| entry.server_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Looks the hash up in the token cache, re-evaluating revocation and
    /// expiry on every hit; falls back to the repository and caches only
    /// valid records.
    fn validate_token(&self, token_hash: &str, now: Instant) -> StoreResult<TokenLookup> {
        let wallclock = Utc::now();

        {
            let mut cache = self.token_cache.lock().expect("Token cache poisoned");

            if let Some(cached) = cache.get(token_hash) {
                if now.duration_since(cached.cached_at) < self.token_ttl {
                    return Ok(token::classify(cached.token.clone(), wallclock));
                }

                cache.remove(token_hash);
            }
        }

        let lookup = self.tokens.find_by_hash(token_hash, wallclock)?;

        if let TokenLookup::Valid(ref token) = lookup {
            self.token_cache.lock().expect("Token cache poisoned").insert(
                token_hash.into(),
                CachedToken {
                    token: token.clone(),
                    cached_at: now,
                },
            );
        }

        Ok(lookup)
    }

    fn deny(&self, reason: DenyReason, prefix: String, source: SocketAddr, now: Instant) -> AuthOutcome {
        self.limiter.record_failure(source.ip(), now);

        if self.warn_cooldown.permit(&format!("deny:{}", prefix), now) {
            logging::warn!(self.log, "beacon denied";
                           "context" => "handle_beacon",
                           "source" => %source,
                           "token_prefix" => prefix,
                           "reason" => ?reason);
        }

        AuthOutcome::Unauthorized(reason)
    }

    /// Emits the `SERVER_AUTHENTICATED` event. Emission failure is warned
    /// about and never propagates.
    fn emit_authenticated(
        &self,
        server_id: ServerId,
        address: &str,
        game_port: u16,
        game: &str,
        auto_registered: bool,
    ) {
        let event = Event {
            event_id: self.idents.event_id(),
            correlation_id: self.idents.correlation_id(),
            server_id,
            timestamp: Utc::now(),
            payload: Payload::ServerAuthenticated(AuthData {
                address: address.into(),
                port: game_port,
                game: game.into(),
                auto_registered,
            }),
            meta: None,
            raw: String::new(),
        };

        if let Err(err) = self.publisher.publish(&event) {
            logging::warn!(self.log, "failed to publish authentication event";
                           "context" => "emit_authenticated",
                           "server_id" => server_id,
                           "error" => ?err);
        }
    }
}
