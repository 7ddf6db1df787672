use crate::classify::strip_timestamp;
use crate::event::{
    excerpt, ActionPlayerData, ActionPlayerPlayerData, ActionTeamData, ActionWorldData, ChatData,
    ConnectData, DamageData, DisconnectData, EntryData, Event, KillData, MapChangeData,
    NameChangeData, Payload, PlayerMeta, RoleChangeData, RoundEndData, RoundStartData, SuicideData,
    TeamChangeData, TeamWinData,
};
use crate::parser::{GameParser, ParseError, ParseResult};
use crate::state::StateManager;
use crate::ServerId;
use chrono::Utc;
use hashbrown::HashMap;
use lazy_static::lazy_static;
use quench::ident::IdentSource;
use quench::logging;
use regex::{Captures, Regex};
use std::sync::Arc;
use std::time::Instant;

/// Builds the pattern for one quoted player token:
/// `"<name><slotId><steamIdOrBOT><team>"`. Slot ids may be negative (legacy
/// fakeclients report -1) and the steam id may be empty.
fn player(prefix: &str) -> String {
    format!(
        r#""(?P<{p}_name>.*?)<(?P<{p}_slot>-?\d+)><(?P<{p}_steam>[^<>]*)><(?P<{p}_team>[^<>]*)>""#,
        p = prefix
    )
}

lazy_static! {
    static ref KILL: Regex = Regex::new(&format!(
        r#"^{} killed {} with "(?P<weapon>[^"]+)"(?P<headshot> \(headshot\))?$"#,
        player("killer"),
        player("victim")
    ))
    .expect("Invalid kill pattern");
    static ref DAMAGE_STRICT: Regex = Regex::new(&format!(
        r#"^{} attacked {} with "(?P<weapon>[^"]+)" \(damage "(?P<damage>\d+)"\) \(damage_armor "(?P<damage_armor>\d+)"\) \(health "(?P<health>-?\d+)"\) \(armor "(?P<armor>\d+)"\)(?: \(hitgroup "(?P<hitgroup>[^"]+)"\))?$"#,
        player("attacker"),
        player("victim")
    ))
    .expect("Invalid strict damage pattern");
    static ref DAMAGE_TOLERANT: Regex = Regex::new(&format!(
        r#"^{} attacked {} with "(?P<weapon>[^"]+)"\s*\(damage\s+"?(?P<damage>\d+)"?\)\s*\(damage_armor\s+"?(?P<damage_armor>\d+)"?\)\s*\(health\s+"?(?P<health>-?\d+)"?\)\s*\(armor\s+"?(?P<armor>\d+)"?\)(?:\s*\(hitgroup\s+"?(?P<hitgroup>[^")]+)"?\))?\s*$"#,
        player("attacker"),
        player("victim")
    ))
    .expect("Invalid tolerant damage pattern");
    static ref SUICIDE: Regex = Regex::new(&format!(
        r#"^{} committed suicide with "(?P<weapon>[^"]+)"$"#,
        player("actor")
    ))
    .expect("Invalid suicide pattern");
    static ref KILLED_SELF: Regex = Regex::new(&format!(
        r#"^{} killed self(?: with "(?P<weapon>[^"]+)")?$"#,
        player("actor")
    ))
    .expect("Invalid killed-self pattern");
    static ref CONNECT: Regex = Regex::new(&format!(
        r#"^{} connected, address "(?P<address>[^"]*)"$"#,
        player("actor")
    ))
    .expect("Invalid connect pattern");
    static ref ENTRY: Regex = Regex::new(&format!(r#"^{} entered the game$"#, player("actor")))
        .expect("Invalid entry pattern");
    static ref DISCONNECT_REASON: Regex = Regex::new(&format!(
        r#"^{} disconnected \(reason "(?P<reason>.*)"\)$"#,
        player("actor")
    ))
    .expect("Invalid disconnect pattern");
    static ref DISCONNECT_LEGACY: Regex = Regex::new(&format!(r#"^{} disconnected$"#, player("actor")))
        .expect("Invalid legacy disconnect pattern");
    static ref TEAM_JOIN: Regex = Regex::new(&format!(
        r#"^{} joined team "(?P<team>[^"]*)"$"#,
        player("actor")
    ))
    .expect("Invalid team join pattern");
    static ref TEAM_SWITCH: Regex = Regex::new(&format!(
        r#"^{} changed team to "(?P<team>[^"]*)"$"#,
        player("actor")
    ))
    .expect("Invalid team switch pattern");
    static ref ROLE_CHANGE: Regex = Regex::new(&format!(
        r#"^{} changed role to "(?P<role>[^"]*)"$"#,
        player("actor")
    ))
    .expect("Invalid role change pattern");
    static ref NAME_CHANGE: Regex = Regex::new(&format!(
        r#"^{} changed name to "(?P<name>.*)"$"#,
        player("actor")
    ))
    .expect("Invalid name change pattern");
    static ref CHAT: Regex = Regex::new(&format!(
        r#"^{} say(?P<team_chat>_team)? "(?P<message>.*)"(?: \(dead\))?$"#,
        player("actor")
    ))
    .expect("Invalid chat pattern");
    static ref MAPCHANGE: Regex =
        Regex::new(r"Mapchange to (?P<map>[^\s]+)").expect("Invalid mapchange pattern");
    static ref STARTED_MAP: Regex =
        Regex::new(r#"^Started map "(?P<map>[^"]+)""#).expect("Invalid started-map pattern");
    static ref CHANGELEVEL: Regex =
        Regex::new(r#"changelevel: "?(?P<map>[^\s"]+)"?"#).expect("Invalid changelevel pattern");
    static ref ACTION_PAIR: Regex = Regex::new(&format!(
        r#"^{} triggered "(?P<code>[^"]+)" against {}$"#,
        player("actor"),
        player("victim")
    ))
    .expect("Invalid pair action pattern");
    static ref ACTION_PLAYER: Regex = Regex::new(&format!(
        r#"^{} triggered "(?P<code>[^"]+)"( \(.*\))?$"#,
        player("actor")
    ))
    .expect("Invalid player action pattern");
    static ref ACTION_TEAM: Regex =
        Regex::new(r#"^Team "(?P<team>[^"]*)" triggered "(?P<code>[^"]+)"( \(.*\))?$"#)
            .expect("Invalid team action pattern");
    static ref ACTION_WORLD: Regex =
        Regex::new(r#"^World triggered "(?P<code>[^"]+)"( \(.*\))?$"#)
            .expect("Invalid world action pattern");
}

struct PlayerTag {
    name: String,
    slot: i32,
    steam_id: String,
    team: String,
}

impl PlayerTag {
    fn from_captures(caps: &Captures, prefix: &str) -> PlayerTag {
        let field = |suffix: &str| -> String {
            caps.name(&format!("{}_{}", prefix, suffix))
                .map(|found| found.as_str())
                .unwrap_or("")
                .into()
        };

        PlayerTag {
            name: field("name"),
            slot: field("slot").parse().unwrap_or(-1),
            steam_id: field("steam"),
            team: field("team"),
        }
    }

    fn is_bot(&self) -> bool {
        self.steam_id == "BOT"
    }

    fn meta(&self) -> PlayerMeta {
        PlayerMeta {
            steam_id: self.steam_id.clone(),
            player_name: self.name.clone(),
            is_bot: self.is_bot(),
        }
    }
}

/// RCON echoes and admin-chat triggers must never reach the dispatcher: a
/// quoted kill line inside an `amx_say` would otherwise count as a kill.
fn is_noise(line: &str) -> bool {
    line.starts_with("Rcon:")
        || line.contains(r#"triggered "amx_"#)
        || line.contains(r#"triggered "say""#)
}

/// Counter-Strike family log parser. One instance per server; cross-line
/// state (map, round, winning-team latch) lives in the shared state manager.
pub struct CsParser {
    server_id: ServerId,
    state: Arc<StateManager>,
    idents: Arc<dyn IdentSource>,
    slots: HashMap<i32, String>,
    errors: u64,
    log: logging::Logger,
}

impl CsParser {
    pub fn new(
        server_id: ServerId,
        state: Arc<StateManager>,
        idents: Arc<dyn IdentSource>,
        log: &logging::Logger,
    ) -> CsParser {
        CsParser {
            server_id,
            state,
            idents,
            slots: HashMap::new(),
            errors: 0,
            log: log.new(logging::o!("server_id" => server_id)),
        }
    }

    fn emit(&self, payload: Payload, meta: Option<PlayerMeta>, raw: &str) -> Event {
        Event {
            event_id: self.idents.event_id(),
            correlation_id: self.idents.correlation_id(),
            server_id: self.server_id,
            timestamp: Utc::now(),
            payload,
            meta,
            raw: raw.into(),
        }
    }

    fn mismatch(&self, trigger: &str, line: &str) -> ParseError {
        ParseError {
            message: format!("{} trigger did not parse: {}", trigger, excerpt(line)),
        }
    }

    fn dispatch(&mut self, line: &str, raw: &str) -> ParseResult {
        if line.contains(r#" killed ""#) {
            return self.on_kill(line, raw);
        }

        if line.contains(r#" attacked ""#) {
            return self.on_damage(line, raw);
        }

        if line.contains(" committed suicide with ") || line.contains(" killed self") {
            return self.on_suicide(line, raw);
        }

        if line.contains(" connected, address ") {
            return self.on_connect(line, raw);
        }

        if line.contains(" entered the game") {
            return self.on_entry(line, raw);
        }

        if line.contains(" disconnected (reason ") {
            return self.on_disconnect(line, raw, true);
        }

        if line.contains(" disconnected") {
            return self.on_disconnect(line, raw, false);
        }

        if line.contains(" joined team ") || line.contains(" changed team to ") {
            return self.on_team_change(line, raw);
        }

        if line.contains(" changed role ") {
            return self.on_role_change(line, raw);
        }

        if line.contains(" changed name to ") {
            return self.on_name_change(line, raw);
        }

        if line.contains(r#" say_team ""#) || line.contains(r#" say ""#) {
            return self.on_chat(line, raw);
        }

        if line.contains("Mapchange to ") || line.starts_with(r#"Started map ""#) || line.contains("changelevel:")
        {
            return self.on_map_change(line, raw);
        }

        if line.contains(r#"World triggered "Round_Start""#) {
            return self.on_round_start(raw);
        }

        if line.contains(r#"triggered "Terrorists_Win""#) {
            return self.on_team_win("TERRORIST", raw);
        }

        if line.contains(r#"triggered "CTs_Win""#) {
            return self.on_team_win("CT", raw);
        }

        if line.contains(r#"World triggered "Round_End""#) {
            return self.on_round_end(raw);
        }

        if line.contains(r#"triggered ""#) {
            return self.on_action(line, raw);
        }

        Ok(None)
    }

    fn on_kill(&self, line: &str, raw: &str) -> ParseResult {
        let caps = KILL.captures(line).ok_or_else(|| self.mismatch("kill", line))?;
        let killer = PlayerTag::from_captures(&caps, "killer");
        let victim = PlayerTag::from_captures(&caps, "victim");

        let data = KillData {
            killer_name: killer.name.clone(),
            killer_slot: killer.slot,
            killer_steam_id: killer.steam_id.clone(),
            killer_team: killer.team.clone(),
            victim_name: victim.name,
            victim_slot: victim.slot,
            victim_steam_id: victim.steam_id,
            victim_team: victim.team,
            weapon: caps["weapon"].into(),
            headshot: caps.name("headshot").is_some(),
        };

        Ok(Some(self.emit(Payload::PlayerKill(data), Some(killer.meta()), raw)))
    }

    fn on_damage(&self, line: &str, raw: &str) -> ParseResult {
        let caps = DAMAGE_STRICT
            .captures(line)
            .or_else(|| DAMAGE_TOLERANT.captures(line))
            .ok_or_else(|| self.mismatch("damage", line))?;

        let attacker = PlayerTag::from_captures(&caps, "attacker");
        let victim = PlayerTag::from_captures(&caps, "victim");

        let number = |group: &str| -> i32 {
            caps.name(group)
                .map(|found| found.as_str().parse().unwrap_or(0))
                .unwrap_or(0)
        };

        let data = DamageData {
            attacker_name: attacker.name.clone(),
            attacker_slot: attacker.slot,
            attacker_steam_id: attacker.steam_id.clone(),
            attacker_team: attacker.team.clone(),
            victim_name: victim.name,
            victim_slot: victim.slot,
            victim_steam_id: victim.steam_id,
            victim_team: victim.team,
            weapon: caps["weapon"].into(),
            damage: number("damage"),
            damage_armor: number("damage_armor"),
            health: number("health"),
            armor: number("armor"),
            hitgroup: caps
                .name("hitgroup")
                .map(|found| found.as_str())
                .unwrap_or("generic")
                .into(),
        };

        Ok(Some(self.emit(Payload::PlayerDamage(data), Some(attacker.meta()), raw)))
    }

    fn on_suicide(&self, line: &str, raw: &str) -> ParseResult {
        let caps = SUICIDE
            .captures(line)
            .or_else(|| KILLED_SELF.captures(line))
            .ok_or_else(|| self.mismatch("suicide", line))?;

        let actor = PlayerTag::from_captures(&caps, "actor");

        let data = SuicideData {
            name: actor.name.clone(),
            slot: actor.slot,
            steam_id: actor.steam_id.clone(),
            team: actor.team.clone(),
            weapon: caps
                .name("weapon")
                .map(|found| found.as_str())
                .unwrap_or("world")
                .into(),
        };

        Ok(Some(self.emit(Payload::PlayerSuicide(data), Some(actor.meta()), raw)))
    }

    fn on_connect(&self, line: &str, raw: &str) -> ParseResult {
        let caps = CONNECT
            .captures(line)
            .ok_or_else(|| self.mismatch("connect", line))?;

        let actor = PlayerTag::from_captures(&caps, "actor");

        let data = ConnectData {
            name: actor.name.clone(),
            slot: actor.slot,
            steam_id: actor.steam_id.clone(),
            address: caps["address"].into(),
        };

        Ok(Some(self.emit(Payload::PlayerConnect(data), Some(actor.meta()), raw)))
    }

    fn on_entry(&self, line: &str, raw: &str) -> ParseResult {
        let caps = ENTRY.captures(line).ok_or_else(|| self.mismatch("entry", line))?;
        let actor = PlayerTag::from_captures(&caps, "actor");

        let data = EntryData {
            name: actor.name.clone(),
            slot: actor.slot,
            steam_id: actor.steam_id.clone(),
        };

        Ok(Some(self.emit(Payload::PlayerEntry(data), Some(actor.meta()), raw)))
    }

    fn on_disconnect(&mut self, line: &str, raw: &str, with_reason: bool) -> ParseResult {
        let caps = match with_reason {
            true => DISCONNECT_REASON.captures(line),
            false => DISCONNECT_LEGACY.captures(line),
        }
        .ok_or_else(|| self.mismatch("disconnect", line))?;

        let actor = PlayerTag::from_captures(&caps, "actor");

        self.slots.remove(&actor.slot);
        self.record_team_count(&actor.team);

        let data = DisconnectData {
            name: actor.name.clone(),
            slot: actor.slot,
            steam_id: actor.steam_id.clone(),
            team: actor.team.clone(),
            reason: caps.name("reason").map(|found| found.as_str().into()),
        };

        Ok(Some(self.emit(Payload::PlayerDisconnect(data), Some(actor.meta()), raw)))
    }

    fn on_team_change(&mut self, line: &str, raw: &str) -> ParseResult {
        let caps = TEAM_JOIN
            .captures(line)
            .or_else(|| TEAM_SWITCH.captures(line))
            .ok_or_else(|| self.mismatch("team change", line))?;

        let actor = PlayerTag::from_captures(&caps, "actor");
        let new_team: String = caps["team"].into();

        self.slots.insert(actor.slot, new_team.clone());
        self.record_team_count(&new_team);
        if !actor.team.is_empty() && actor.team != new_team {
            self.record_team_count(&actor.team);
        }

        let data = TeamChangeData {
            name: actor.name.clone(),
            slot: actor.slot,
            steam_id: actor.steam_id.clone(),
            team: actor.team.clone(),
            new_team,
        };

        Ok(Some(self.emit(Payload::PlayerChangeTeam(data), Some(actor.meta()), raw)))
    }

    fn on_role_change(&self, line: &str, raw: &str) -> ParseResult {
        let caps = ROLE_CHANGE
            .captures(line)
            .ok_or_else(|| self.mismatch("role change", line))?;

        let actor = PlayerTag::from_captures(&caps, "actor");

        let data = RoleChangeData {
            name: actor.name.clone(),
            slot: actor.slot,
            steam_id: actor.steam_id.clone(),
            team: actor.team.clone(),
            role: caps["role"].into(),
        };

        Ok(Some(self.emit(Payload::PlayerChangeRole(data), Some(actor.meta()), raw)))
    }

    fn on_name_change(&self, line: &str, raw: &str) -> ParseResult {
        let caps = NAME_CHANGE
            .captures(line)
            .ok_or_else(|| self.mismatch("name change", line))?;

        let actor = PlayerTag::from_captures(&caps, "actor");

        let data = NameChangeData {
            name: actor.name.clone(),
            slot: actor.slot,
            steam_id: actor.steam_id.clone(),
            team: actor.team.clone(),
            new_name: caps["name"].into(),
        };

        Ok(Some(self.emit(Payload::PlayerChangeName(data), Some(actor.meta()), raw)))
    }

    fn on_chat(&self, line: &str, raw: &str) -> ParseResult {
        let caps = CHAT.captures(line).ok_or_else(|| self.mismatch("chat", line))?;
        let actor = PlayerTag::from_captures(&caps, "actor");

        let data = ChatData {
            name: actor.name.clone(),
            slot: actor.slot,
            steam_id: actor.steam_id.clone(),
            team: actor.team.clone(),
            message: caps["message"].into(),
            team_chat: caps.name("team_chat").is_some(),
        };

        Ok(Some(self.emit(Payload::ChatMessage(data), Some(actor.meta()), raw)))
    }

    fn on_map_change(&self, line: &str, raw: &str) -> ParseResult {
        let caps = MAPCHANGE
            .captures(line)
            .or_else(|| STARTED_MAP.captures(line))
            .or_else(|| CHANGELEVEL.captures(line))
            .ok_or_else(|| self.mismatch("map change", line))?;

        let map: String = caps["map"].into();
        let transition = self.state.update_map(self.server_id, &map);

        logging::debug!(self.log, "map changed";
                        "context" => "on_map_change",
                        "map" => &map,
                        "previous" => ?transition.previous_map);

        let data = MapChangeData {
            map,
            previous_map: transition.previous_map,
        };

        Ok(Some(self.emit(Payload::MapChange(data), None, raw)))
    }

    fn on_round_start(&self, raw: &str) -> ParseResult {
        let round = self.state.start_round(self.server_id);
        let map = self.state.get_state(self.server_id).current_map;

        Ok(Some(self.emit(
            Payload::RoundStart(RoundStartData { map, round }),
            None,
            raw,
        )))
    }

    fn on_team_win(&self, team: &str, raw: &str) -> ParseResult {
        self.state.set_winning_team(self.server_id, team);

        let map = self.state.get_state(self.server_id).current_map;

        Ok(Some(self.emit(
            Payload::TeamWin(TeamWinData {
                team: team.into(),
                map,
            }),
            None,
            raw,
        )))
    }

    fn on_round_end(&self, raw: &str) -> ParseResult {
        let close = self.state.end_round(self.server_id);

        Ok(Some(self.emit(
            Payload::RoundEnd(RoundEndData {
                round: close.round,
                winning_team: close.winning_team,
            }),
            None,
            raw,
        )))
    }

    fn on_action(&self, line: &str, raw: &str) -> ParseResult {
        if let Some(caps) = ACTION_PAIR.captures(line) {
            let actor = PlayerTag::from_captures(&caps, "actor");
            let victim = PlayerTag::from_captures(&caps, "victim");

            let data = ActionPlayerPlayerData {
                name: actor.name.clone(),
                slot: actor.slot,
                steam_id: actor.steam_id.clone(),
                team: actor.team.clone(),
                player_id: None,
                victim_name: victim.name,
                victim_slot: victim.slot,
                victim_steam_id: victim.steam_id,
                victim_team: victim.team,
                victim_player_id: None,
                action_code: caps["code"].into(),
                bonus: 0,
            };

            return Ok(Some(self.emit(
                Payload::ActionPlayerPlayer(data),
                Some(actor.meta()),
                raw,
            )));
        }

        if let Some(caps) = ACTION_PLAYER.captures(line) {
            let actor = PlayerTag::from_captures(&caps, "actor");

            let data = ActionPlayerData {
                name: actor.name.clone(),
                slot: actor.slot,
                steam_id: actor.steam_id.clone(),
                team: actor.team.clone(),
                player_id: None,
                action_code: caps["code"].into(),
                bonus: 0,
            };

            return Ok(Some(self.emit(Payload::ActionPlayer(data), Some(actor.meta()), raw)));
        }

        if let Some(caps) = ACTION_TEAM.captures(line) {
            let data = ActionTeamData {
                team: caps["team"].into(),
                action_code: caps["code"].into(),
                bonus: 0,
            };

            return Ok(Some(self.emit(Payload::ActionTeam(data), None, raw)));
        }

        if let Some(caps) = ACTION_WORLD.captures(line) {
            let data = ActionWorldData {
                action_code: caps["code"].into(),
                bonus: 0,
            };

            return Ok(Some(self.emit(Payload::ActionWorld(data), None, raw)));
        }

        Err(self.mismatch("action", line))
    }

    fn record_team_count(&self, team: &str) {
        if team.is_empty() {
            return;
        }

        let count = self.slots.values().filter(|joined| joined.as_str() == team).count();
        self.state.record_team_count(self.server_id, team, count as u32);
    }
}

impl GameParser for CsParser {
    fn parse_line(&mut self, raw: &str) -> ParseResult {
        let line = strip_timestamp(raw).trim();

        if line.is_empty() || is_noise(line) {
            return Ok(None);
        }

        self.state.touch(self.server_id, Instant::now());

        let result = self.dispatch(line, raw);

        if let Err(ref err) = result {
            self.errors += 1;

            logging::warn!(self.log, "parse failure on recognized trigger";
                           "context" => "parse_line",
                           "errors" => self.errors,
                           "detail" => &err.message);
        }

        result
    }

    fn error_count(&self) -> u64 {
        self.errors
    }
}
