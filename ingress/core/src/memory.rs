//! In-memory reference implementations of the capability contracts. The
//! runner feeds them from the operator's JSON files; tests use them as
//! recording fakes.

use crate::contract::{
    ActionCatalog, ActionDef, EventLog, EventPublisher, MatchService, NewServer, Notifier,
    PlayerActionRow, PlayerPlayerActionRow, PlayerProfile, PlayerService, PublishError,
    RconStatus, RewardNotice, ServerRecord, ServerStore, SkillDelta, StoreError, StoreResult,
    TeamActionRow, TokenStore, WorldActionRow,
};
use crate::event::Event;
use crate::token::ServerToken;
use crate::{PlayerId, ServerId, TokenId};
use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use quench::ident::IdentSource;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Token records held in memory, keyed by token hash. The on-disk format is
/// the JSON map maintained by the `gen_tokens` tool.
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, ServerToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> MemoryTokenStore {
        MemoryTokenStore {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<MemoryTokenStore, String> {
        let content = fs::read_to_string(path).map_err(|err| err.to_string())?;
        let tokens: HashMap<String, ServerToken> =
            serde_json::from_str(&content).map_err(|err| err.to_string())?;

        Ok(MemoryTokenStore {
            tokens: Mutex::new(tokens),
        })
    }

    pub fn insert(&self, token: ServerToken) {
        self.tokens
            .lock()
            .expect("Token table poisoned")
            .insert(token.token_hash.clone(), token);
    }
}

impl TokenStore for MemoryTokenStore {
    fn find_by_hash(&self, token_hash: &str) -> StoreResult<Option<ServerToken>> {
        Ok(self
            .tokens
            .lock()
            .expect("Token table poisoned")
            .get(token_hash)
            .cloned())
    }

    fn find_by_id(&self, id: TokenId) -> StoreResult<Option<ServerToken>> {
        Ok(self
            .tokens
            .lock()
            .expect("Token table poisoned")
            .values()
            .find(|token| token.id == id)
            .cloned())
    }

    fn touch_last_used(&self, id: TokenId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tokens = self.tokens.lock().expect("Token table poisoned");

        for token in tokens.values_mut() {
            if token.id == id {
                token.last_used_at = Some(at);
                return Ok(());
            }
        }

        Err(StoreError::Rejected(format!("unknown token id {}", id)))
    }
}

struct ServerTable {
    servers: Vec<ServerRecord>,
    config_defaults: HashMap<String, String>,
    configs: HashMap<ServerId, HashMap<String, String>>,
    next_id: ServerId,
}

/// Server rows unique on `(auth_token_id, port)`. Registration creates the
/// row and copies the config defaults under one lock, standing in for the
/// registration transaction.
pub struct MemoryServerStore {
    inner: Mutex<ServerTable>,
}

impl MemoryServerStore {
    pub fn new() -> MemoryServerStore {
        MemoryServerStore::with_defaults(HashMap::new())
    }

    pub fn with_defaults(config_defaults: HashMap<String, String>) -> MemoryServerStore {
        MemoryServerStore {
            inner: Mutex::new(ServerTable {
                servers: Vec::new(),
                config_defaults,
                configs: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Seeds an existing server row (tests and pre-provisioned setups).
    pub fn seed(&self, record: ServerRecord) {
        let mut table = self.inner.lock().expect("Server table poisoned");

        table.next_id = table.next_id.max(record.server_id + 1);
        table.servers.push(record);
    }

    /// The config rows copied for a server at registration time.
    pub fn config_of(&self, server_id: ServerId) -> Option<HashMap<String, String>> {
        self.inner
            .lock()
            .expect("Server table poisoned")
            .configs
            .get(&server_id)
            .cloned()
    }
}

impl ServerStore for MemoryServerStore {
    fn find_by_token_and_port(&self, token_id: TokenId, port: u16) -> StoreResult<Option<ServerRecord>> {
        Ok(self
            .inner
            .lock()
            .expect("Server table poisoned")
            .servers
            .iter()
            .find(|server| server.auth_token_id == token_id && server.port == port)
            .cloned())
    }

    fn find_by_id(&self, server_id: ServerId) -> StoreResult<Option<ServerRecord>> {
        Ok(self
            .inner
            .lock()
            .expect("Server table poisoned")
            .servers
            .iter()
            .find(|server| server.server_id == server_id)
            .cloned())
    }

    fn update_address(&self, server_id: ServerId, address: &str) -> StoreResult<()> {
        let mut table = self.inner.lock().expect("Server table poisoned");

        match table
            .servers
            .iter_mut()
            .find(|server| server.server_id == server_id)
        {
            Some(server) => {
                server.address = address.into();
                Ok(())
            }
            None => Err(StoreError::Rejected(format!("unknown server id {}", server_id))),
        }
    }

    fn register(&self, server: NewServer) -> StoreResult<ServerRecord> {
        let mut table = self.inner.lock().expect("Server table poisoned");

        let duplicate = table
            .servers
            .iter()
            .any(|existing| existing.auth_token_id == server.auth_token_id && existing.port == server.port);

        if duplicate {
            return Err(StoreError::Rejected(format!(
                "server already registered for token {} port {}",
                server.auth_token_id, server.port
            )));
        }

        let record = ServerRecord {
            server_id: table.next_id,
            address: server.address,
            port: server.port,
            game: server.game,
            auth_token_id: server.auth_token_id,
            rcon_password: server.rcon_password,
            name: server.name,
        };

        table.next_id += 1;

        let defaults = table.config_defaults.clone();
        table.configs.insert(record.server_id, defaults);
        table.servers.push(record.clone());

        Ok(record)
    }
}

/// Action definitions keyed exactly on `(game, code, team)`.
pub struct MemoryActionCatalog {
    defs: Mutex<Vec<ActionDef>>,
}

impl MemoryActionCatalog {
    pub fn new() -> MemoryActionCatalog {
        MemoryActionCatalog {
            defs: Mutex::new(Vec::new()),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<MemoryActionCatalog, String> {
        let content = fs::read_to_string(path).map_err(|err| err.to_string())?;
        let defs: Vec<ActionDef> = serde_json::from_str(&content).map_err(|err| err.to_string())?;

        Ok(MemoryActionCatalog {
            defs: Mutex::new(defs),
        })
    }

    pub fn insert(&self, def: ActionDef) {
        self.defs.lock().expect("Action table poisoned").push(def);
    }
}

impl ActionCatalog for MemoryActionCatalog {
    fn find(&self, game: &str, code: &str, team: &str) -> StoreResult<Option<ActionDef>> {
        Ok(self
            .defs
            .lock()
            .expect("Action table poisoned")
            .iter()
            .find(|def| def.game == game && def.code == code && def.team == team)
            .cloned())
    }
}

/// Recording event log. Team batches are stored per call so tests can assert
/// on the batch boundaries, not just the rows.
pub struct MemoryEventLog {
    player_rows: Mutex<Vec<PlayerActionRow>>,
    pair_rows: Mutex<Vec<PlayerPlayerActionRow>>,
    team_batches: Mutex<Vec<Vec<TeamActionRow>>>,
    world_rows: Mutex<Vec<WorldActionRow>>,
}

impl MemoryEventLog {
    pub fn new() -> MemoryEventLog {
        MemoryEventLog {
            player_rows: Mutex::new(Vec::new()),
            pair_rows: Mutex::new(Vec::new()),
            team_batches: Mutex::new(Vec::new()),
            world_rows: Mutex::new(Vec::new()),
        }
    }

    pub fn player_rows(&self) -> Vec<PlayerActionRow> {
        self.player_rows.lock().expect("Event log poisoned").clone()
    }

    pub fn pair_rows(&self) -> Vec<PlayerPlayerActionRow> {
        self.pair_rows.lock().expect("Event log poisoned").clone()
    }

    pub fn team_batches(&self) -> Vec<Vec<TeamActionRow>> {
        self.team_batches.lock().expect("Event log poisoned").clone()
    }

    pub fn world_rows(&self) -> Vec<WorldActionRow> {
        self.world_rows.lock().expect("Event log poisoned").clone()
    }
}

impl EventLog for MemoryEventLog {
    fn log_player_action(&self, row: PlayerActionRow) -> StoreResult<()> {
        self.player_rows.lock().expect("Event log poisoned").push(row);
        Ok(())
    }

    fn log_player_player_action(&self, row: PlayerPlayerActionRow) -> StoreResult<()> {
        self.pair_rows.lock().expect("Event log poisoned").push(row);
        Ok(())
    }

    fn log_team_action_batch(&self, rows: &[TeamActionRow]) -> StoreResult<()> {
        let mut batches = self.team_batches.lock().expect("Event log poisoned");

        // Insert-skip-duplicates: a retried batch never double-logs a row
        let fresh: Vec<TeamActionRow> = rows
            .iter()
            .filter(|row| !batches.iter().any(|batch| batch.contains(*row)))
            .cloned()
            .collect();

        batches.push(fresh);
        Ok(())
    }

    fn log_world_action(&self, row: WorldActionRow) -> StoreResult<()> {
        self.world_rows.lock().expect("Event log poisoned").push(row);
        Ok(())
    }
}

struct PlayerTable {
    players: HashMap<PlayerId, PlayerProfile>,
    by_steam: HashMap<String, PlayerId>,
    skill_updates: Vec<SkillDelta>,
    skill_batches: Vec<Vec<SkillDelta>>,
}

/// Recording player service with seeded profiles and steam-id resolution.
pub struct MemoryPlayerService {
    inner: Mutex<PlayerTable>,
}

impl MemoryPlayerService {
    pub fn new() -> MemoryPlayerService {
        MemoryPlayerService {
            inner: Mutex::new(PlayerTable {
                players: HashMap::new(),
                by_steam: HashMap::new(),
                skill_updates: Vec::new(),
                skill_batches: Vec::new(),
            }),
        }
    }

    pub fn seed(&self, profile: PlayerProfile, steam_id: Option<&str>) {
        let mut table = self.inner.lock().expect("Player table poisoned");

        if let Some(steam_id) = steam_id {
            table.by_steam.insert(steam_id.into(), profile.id);
        }

        table.players.insert(profile.id, profile);
    }

    pub fn skill_updates(&self) -> Vec<SkillDelta> {
        self.inner.lock().expect("Player table poisoned").skill_updates.clone()
    }

    pub fn skill_batches(&self) -> Vec<Vec<SkillDelta>> {
        self.inner.lock().expect("Player table poisoned").skill_batches.clone()
    }
}

impl PlayerService for MemoryPlayerService {
    fn get(&self, id: PlayerId) -> StoreResult<Option<PlayerProfile>> {
        Ok(self
            .inner
            .lock()
            .expect("Player table poisoned")
            .players
            .get(&id)
            .cloned())
    }

    fn get_many(&self, ids: &[PlayerId]) -> StoreResult<Vec<PlayerProfile>> {
        let table = self.inner.lock().expect("Player table poisoned");

        Ok(ids
            .iter()
            .filter_map(|id| table.players.get(id).cloned())
            .collect())
    }

    fn resolve(&self, steam_id: &str, _name: &str, _game: &str) -> StoreResult<Option<PlayerId>> {
        Ok(self
            .inner
            .lock()
            .expect("Player table poisoned")
            .by_steam
            .get(steam_id)
            .copied())
    }

    fn update_skill(&self, id: PlayerId, delta: i32) -> StoreResult<()> {
        let mut table = self.inner.lock().expect("Player table poisoned");

        if let Some(profile) = table.players.get_mut(&id) {
            profile.skill += delta;
        }

        table.skill_updates.push(SkillDelta {
            player_id: id,
            skill_delta: delta,
        });

        Ok(())
    }

    fn update_skill_batch(&self, deltas: &[SkillDelta]) -> StoreResult<()> {
        let mut table = self.inner.lock().expect("Player table poisoned");

        for delta in deltas {
            if let Some(profile) = table.players.get_mut(&delta.player_id) {
                profile.skill += delta.skill_delta;
            }
        }

        table.skill_batches.push(deltas.to_vec());
        Ok(())
    }

    fn skill(&self, id: PlayerId) -> StoreResult<i32> {
        let table = self.inner.lock().expect("Player table poisoned");

        match table.players.get(&id) {
            Some(profile) => Ok(profile.skill),
            None => Err(StoreError::Rejected(format!("unknown player {}", id))),
        }
    }
}

/// Team rosters and live maps by server.
pub struct MemoryMatchService {
    rosters: Mutex<HashMap<(ServerId, String), Vec<PlayerId>>>,
    maps: Mutex<HashMap<ServerId, String>>,
}

impl MemoryMatchService {
    pub fn new() -> MemoryMatchService {
        MemoryMatchService {
            rosters: Mutex::new(HashMap::new()),
            maps: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_roster(&self, server_id: ServerId, team: &str, members: Vec<PlayerId>) {
        self.rosters
            .lock()
            .expect("Roster table poisoned")
            .insert((server_id, team.into()), members);
    }

    pub fn set_map(&self, server_id: ServerId, map: &str) {
        self.maps
            .lock()
            .expect("Map table poisoned")
            .insert(server_id, map.into());
    }
}

impl MatchService for MemoryMatchService {
    fn team_members(&self, server_id: ServerId, team: &str) -> StoreResult<Vec<PlayerId>> {
        Ok(self
            .rosters
            .lock()
            .expect("Roster table poisoned")
            .get(&(server_id, team.into()))
            .cloned()
            .unwrap_or_default())
    }

    fn current_map(&self, server_id: ServerId) -> StoreResult<Option<String>> {
        Ok(self.maps.lock().expect("Map table poisoned").get(&server_id).cloned())
    }
}

/// RCON-reported maps, when a session is live.
pub struct MemoryRcon {
    maps: Mutex<HashMap<ServerId, String>>,
}

impl MemoryRcon {
    pub fn new() -> MemoryRcon {
        MemoryRcon {
            maps: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_map(&self, server_id: ServerId, map: &str) {
        self.maps
            .lock()
            .expect("Rcon map table poisoned")
            .insert(server_id, map.into());
    }
}

impl RconStatus for MemoryRcon {
    fn reported_map(&self, server_id: ServerId) -> Option<String> {
        self.maps
            .lock()
            .expect("Rcon map table poisoned")
            .get(&server_id)
            .cloned()
    }
}

/// Publisher that records every event; can be flipped into failure mode.
pub struct RecordingPublisher {
    events: Mutex<Vec<Event>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> RecordingPublisher {
        RecordingPublisher {
            events: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("Event buffer poisoned").clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: &Event) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Closed);
        }

        self.events.lock().expect("Event buffer poisoned").push(event.clone());
        Ok(())
    }
}

/// Notification sink that records every notice; can be flipped into failure
/// mode to exercise the swallow path.
pub struct RecordingNotifier {
    notices: Mutex<Vec<RewardNotice>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> RecordingNotifier {
        RecordingNotifier {
            notices: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn notices(&self) -> Vec<RewardNotice> {
        self.notices.lock().expect("Notice buffer poisoned").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: RewardNotice) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Closed);
        }

        self.notices.lock().expect("Notice buffer poisoned").push(notice);
        Ok(())
    }
}

/// Serializes each event as one JSON line. The runner points this at stdout;
/// a queue client would implement `EventPublisher` the same way.
pub struct JsonLinePublisher<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinePublisher<W> {
    pub fn new(out: W) -> JsonLinePublisher<W> {
        JsonLinePublisher { out: Mutex::new(out) }
    }
}

impl<W: Write + Send> EventPublisher for JsonLinePublisher<W> {
    fn publish(&self, event: &Event) -> Result<(), PublishError> {
        let encoded =
            serde_json::to_string(event).map_err(|err| PublishError::Serialization(err.to_string()))?;

        let mut out = self.out.lock().expect("Publisher output poisoned");

        writeln!(out, "{}", encoded)?;
        Ok(())
    }
}

/// Deterministic id source for tests.
pub struct SequentialIdent {
    counter: AtomicU64,
}

impl SequentialIdent {
    pub fn new() -> SequentialIdent {
        SequentialIdent {
            counter: AtomicU64::new(0),
        }
    }
}

impl IdentSource for SequentialIdent {
    fn event_id(&self) -> String {
        format!("msg_test_{:016x}", self.counter.fetch_add(1, Ordering::Relaxed))
    }

    fn correlation_id(&self) -> String {
        format!("corr_test_{:012x}", self.counter.fetch_add(1, Ordering::Relaxed))
    }
}
