//! Capability contracts for the external collaborators of the ingress
//! pipeline. The database, player/match services, queue and RCON client live
//! behind these traits; `memory` provides the reference implementations used
//! by the runner and the tests.

use crate::event::Event;
use crate::token::ServerToken;
use crate::{PlayerId, ServerId, TokenId};
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::io;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure raised by a backing store. Read failures propagate to the caller;
/// whether a write failure propagates is decided per call site.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StoreError {
    /// The store cannot be reached at all.
    Unavailable(&'static str),
    /// The store rejected the operation.
    Rejected(String),
}

#[derive(Debug, Eq, PartialEq)]
pub enum PublishError {
    Closed,
    Serialization(String),
    Io(io::ErrorKind),
}

impl From<io::Error> for PublishError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        PublishError::Io(io_error.kind())
    }
}

/// A registered game server. Identity is `(auth_token_id, port)`; the
/// address is rewritten in place when a containerized server comes back with
/// a new IP.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerRecord {
    pub server_id: ServerId,
    pub address: String,
    pub port: u16,
    pub game: String,
    pub auth_token_id: TokenId,
    pub rcon_password: String,
    pub name: String,
}

/// Server row to be created by auto-registration.
#[derive(Clone, Debug)]
pub struct NewServer {
    pub address: String,
    pub port: u16,
    pub game: String,
    pub auth_token_id: TokenId,
    pub rcon_password: String,
    pub name: String,
}

/// A row of the action catalog, keyed `(game, code, team)` with the empty
/// team as the fallback key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionDef {
    pub id: u32,
    pub game: String,
    pub code: String,
    #[serde(default)]
    pub team: String,
    pub reward_player: i32,
    pub reward_team: i32,
    pub for_player_actions: bool,
    pub for_player_player_actions: bool,
    pub for_team_actions: bool,
    pub for_world_actions: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerActionRow {
    pub player_id: PlayerId,
    pub action_id: u32,
    pub server_id: ServerId,
    pub map: String,
    pub bonus: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerPlayerActionRow {
    pub player_id: PlayerId,
    pub victim_id: PlayerId,
    pub action_id: u32,
    pub server_id: ServerId,
    pub map: String,
    pub bonus: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeamActionRow {
    pub player_id: PlayerId,
    pub action_id: u32,
    pub server_id: ServerId,
    pub map: String,
    pub bonus: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorldActionRow {
    pub action_id: u32,
    pub server_id: ServerId,
    pub map: String,
    pub bonus: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkillDelta {
    pub player_id: PlayerId,
    pub skill_delta: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerProfile {
    pub id: PlayerId,
    pub name: String,
    pub skill: i32,
}

/// Reward notification handed to the optional event-notification
/// collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewardNotice {
    pub server_id: ServerId,
    pub player_id: Option<PlayerId>,
    pub action_code: String,
    pub total_points: i32,
    pub current_skill: Option<i32>,
}

/// Persistent token records, indexed uniquely on the token hash.
pub trait TokenStore: Send + Sync {
    fn find_by_hash(&self, token_hash: &str) -> StoreResult<Option<ServerToken>>;

    fn find_by_id(&self, id: TokenId) -> StoreResult<Option<ServerToken>>;

    /// Persists the `last_used_at` stamp. Callers debounce; the store writes.
    fn touch_last_used(&self, id: TokenId, at: DateTime<Utc>) -> StoreResult<()>;
}

/// Persistent server rows, unique on `(auth_token_id, port)`.
pub trait ServerStore: Send + Sync {
    fn find_by_token_and_port(&self, token_id: TokenId, port: u16) -> StoreResult<Option<ServerRecord>>;

    fn find_by_id(&self, server_id: ServerId) -> StoreResult<Option<ServerRecord>>;

    fn update_address(&self, server_id: ServerId, address: &str) -> StoreResult<()>;

    /// Creates the server row and copies the admin-provisioned config
    /// defaults for the new server in a single transaction.
    fn register(&self, server: NewServer) -> StoreResult<ServerRecord>;
}

/// Action definition catalog. `find` is an exact `(game, code, team)`
/// lookup; the caller decides the empty-team fallback order.
pub trait ActionCatalog: Send + Sync {
    fn find(&self, game: &str, code: &str, team: &str) -> StoreResult<Option<ActionDef>>;
}

/// Append-only event log tables.
pub trait EventLog: Send + Sync {
    fn log_player_action(&self, row: PlayerActionRow) -> StoreResult<()>;

    fn log_player_player_action(&self, row: PlayerPlayerActionRow) -> StoreResult<()>;

    /// Writes the whole batch in one call with insert-skip-duplicates
    /// semantics, so a retried batch never double-logs a teammate.
    fn log_team_action_batch(&self, rows: &[TeamActionRow]) -> StoreResult<()>;

    fn log_world_action(&self, row: WorldActionRow) -> StoreResult<()>;
}

/// Downstream player service owning the engine-identity to player-id
/// mapping and the skill ratings.
pub trait PlayerService: Send + Sync {
    fn get(&self, id: PlayerId) -> StoreResult<Option<PlayerProfile>>;

    /// Batch form of `get`; unknown ids are simply absent from the result.
    fn get_many(&self, ids: &[PlayerId]) -> StoreResult<Vec<PlayerProfile>>;

    fn resolve(&self, steam_id: &str, name: &str, game: &str) -> StoreResult<Option<PlayerId>>;

    fn update_skill(&self, id: PlayerId, delta: i32) -> StoreResult<()>;

    /// Applies the whole batch in one call.
    fn update_skill_batch(&self, deltas: &[SkillDelta]) -> StoreResult<()>;

    fn skill(&self, id: PlayerId) -> StoreResult<i32>;
}

/// Downstream match service consulted for team rosters and live match maps.
pub trait MatchService: Send + Sync {
    fn team_members(&self, server_id: ServerId, team: &str) -> StoreResult<Vec<PlayerId>>;

    fn current_map(&self, server_id: ServerId) -> StoreResult<Option<String>>;
}

/// Live map as reported over RCON, when an RCON session is available.
pub trait RconStatus: Send + Sync {
    fn reported_map(&self, server_id: ServerId) -> Option<String>;
}

/// Outbound queue for parsed events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &Event) -> Result<(), PublishError>;
}

/// Optional reward notification sink. Failures are always swallowed by the
/// caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: RewardNotice) -> Result<(), PublishError>;
}
