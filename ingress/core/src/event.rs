use crate::{PlayerId, ServerId};
use chrono::{DateTime, Utc};
use serde_derive::Serialize;

/// Maximum number of raw-line characters quoted in error reports.
pub const RAW_EXCERPT_LEN: usize = 100;

/// Returns a char-boundary safe excerpt of the raw line for error paths.
pub fn excerpt(line: &str) -> &str {
    match line.char_indices().nth(RAW_EXCERPT_LEN) {
        Some((at, _)) => &line[..at],
        None => line,
    }
}

/// Envelope published for every parsed event. The payload carries the
/// `eventType`/`data` pair on the wire; `meta` carries unresolved in-game
/// identity for downstream player resolution.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    pub correlation_id: String,
    pub server_id: ServerId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<PlayerMeta>,
    pub raw: String,
}

/// Unresolved in-game identity of the acting player.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMeta {
    pub steam_id: String,
    pub player_name: String,
    pub is_bot: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "eventType", content = "data")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    PlayerKill(KillData),
    PlayerDamage(DamageData),
    PlayerSuicide(SuicideData),
    PlayerConnect(ConnectData),
    PlayerEntry(EntryData),
    PlayerDisconnect(DisconnectData),
    PlayerChangeTeam(TeamChangeData),
    PlayerChangeRole(RoleChangeData),
    PlayerChangeName(NameChangeData),
    ChatMessage(ChatData),
    ActionPlayer(ActionPlayerData),
    ActionPlayerPlayer(ActionPlayerPlayerData),
    ActionTeam(ActionTeamData),
    ActionWorld(ActionWorldData),
    RoundStart(RoundStartData),
    RoundEnd(RoundEndData),
    TeamWin(TeamWinData),
    MapChange(MapChangeData),
    ServerAuthenticated(AuthData),
}

impl Payload {
    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::PlayerKill(_) => "PLAYER_KILL",
            Payload::PlayerDamage(_) => "PLAYER_DAMAGE",
            Payload::PlayerSuicide(_) => "PLAYER_SUICIDE",
            Payload::PlayerConnect(_) => "PLAYER_CONNECT",
            Payload::PlayerEntry(_) => "PLAYER_ENTRY",
            Payload::PlayerDisconnect(_) => "PLAYER_DISCONNECT",
            Payload::PlayerChangeTeam(_) => "PLAYER_CHANGE_TEAM",
            Payload::PlayerChangeRole(_) => "PLAYER_CHANGE_ROLE",
            Payload::PlayerChangeName(_) => "PLAYER_CHANGE_NAME",
            Payload::ChatMessage(_) => "CHAT_MESSAGE",
            Payload::ActionPlayer(_) => "ACTION_PLAYER",
            Payload::ActionPlayerPlayer(_) => "ACTION_PLAYER_PLAYER",
            Payload::ActionTeam(_) => "ACTION_TEAM",
            Payload::ActionWorld(_) => "ACTION_WORLD",
            Payload::RoundStart(_) => "ROUND_START",
            Payload::RoundEnd(_) => "ROUND_END",
            Payload::TeamWin(_) => "TEAM_WIN",
            Payload::MapChange(_) => "MAP_CHANGE",
            Payload::ServerAuthenticated(_) => "SERVER_AUTHENTICATED",
        }
    }

    /// True for the four action event types consumed by the action processor.
    pub fn is_action(&self) -> bool {
        match self {
            Payload::ActionPlayer(_)
            | Payload::ActionPlayerPlayer(_)
            | Payload::ActionTeam(_)
            | Payload::ActionWorld(_) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KillData {
    pub killer_name: String,
    pub killer_slot: i32,
    pub killer_steam_id: String,
    pub killer_team: String,
    pub victim_name: String,
    pub victim_slot: i32,
    pub victim_steam_id: String,
    pub victim_team: String,
    pub weapon: String,
    pub headshot: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DamageData {
    pub attacker_name: String,
    pub attacker_slot: i32,
    pub attacker_steam_id: String,
    pub attacker_team: String,
    pub victim_name: String,
    pub victim_slot: i32,
    pub victim_steam_id: String,
    pub victim_team: String,
    pub weapon: String,
    pub damage: i32,
    pub damage_armor: i32,
    pub health: i32,
    pub armor: i32,
    pub hitgroup: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SuicideData {
    pub name: String,
    pub slot: i32,
    pub steam_id: String,
    pub team: String,
    pub weapon: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectData {
    pub name: String,
    pub slot: i32,
    pub steam_id: String,
    pub address: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntryData {
    pub name: String,
    pub slot: i32,
    pub steam_id: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectData {
    pub name: String,
    pub slot: i32,
    pub steam_id: String,
    pub team: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamChangeData {
    pub name: String,
    pub slot: i32,
    pub steam_id: String,
    pub team: String,
    pub new_team: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoleChangeData {
    pub name: String,
    pub slot: i32,
    pub steam_id: String,
    pub team: String,
    pub role: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NameChangeData {
    pub name: String,
    pub slot: i32,
    pub steam_id: String,
    pub team: String,
    pub new_name: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatData {
    pub name: String,
    pub slot: i32,
    pub steam_id: String,
    pub team: String,
    pub message: String,
    pub team_chat: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionPlayerData {
    pub name: String,
    pub slot: i32,
    pub steam_id: String,
    pub team: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    pub action_code: String,
    pub bonus: i32,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionPlayerPlayerData {
    pub name: String,
    pub slot: i32,
    pub steam_id: String,
    pub team: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    pub victim_name: String,
    pub victim_slot: i32,
    pub victim_steam_id: String,
    pub victim_team: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub victim_player_id: Option<PlayerId>,
    pub action_code: String,
    pub bonus: i32,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionTeamData {
    pub team: String,
    pub action_code: String,
    pub bonus: i32,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionWorldData {
    pub action_code: String,
    pub bonus: i32,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoundStartData {
    pub map: String,
    pub round: u32,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoundEndData {
    pub round: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_team: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamWinData {
    pub team: String,
    pub map: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MapChangeData {
    pub map: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_map: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthData {
    pub address: String,
    pub port: u16,
    pub game: String,
    pub auto_registered: bool,
}
