use crate::contract::{
    ActionCatalog, ActionDef, EventLog, MatchService, Notifier, PlayerActionRow, PlayerPlayerActionRow,
    PlayerProfile, PlayerService, RconStatus, RewardNotice, ServerStore, SkillDelta, StoreResult,
    TeamActionRow, WorldActionRow,
};
use crate::event::{Event, Payload, PlayerMeta};
use crate::limiter::Cooldown;
use crate::{PlayerId, ServerId};
use quench::logging;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of processing one event. Skips are successes with no effect; the
/// pipeline never stops over them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Processed {
    Applied { recipients: usize, points: i32 },
    Skipped(SkipReason),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SkipReason {
    NotAnAction,
    UnknownServer,
    UnknownAction,
    NotApplicable,
    MissingPlayer,
    EmptyTeam,
}

#[derive(Clone, Debug)]
pub struct ActionSettings {
    pub warn_cooldown: Duration,
    pub baseline_skill: i32,
}

impl Default for ActionSettings {
    fn default() -> ActionSettings {
        ActionSettings {
            warn_cooldown: Duration::from_millis(300_000),
            baseline_skill: 1000,
        }
    }
}

/// Correlates action events with the action catalog and distributes rewards.
/// Team rewards fan out as single batch calls; per-player row writes and the
/// final notification are issued in that order.
pub struct ActionProcessor {
    catalog: Arc<dyn ActionCatalog>,
    servers: Arc<dyn ServerStore>,
    players: Arc<dyn PlayerService>,
    matches: Arc<dyn MatchService>,
    event_log: Arc<dyn EventLog>,
    rcon: Option<Arc<dyn RconStatus>>,
    notifier: Option<Arc<dyn Notifier>>,
    cooldown: Cooldown,
    baseline_skill: i32,
    log: logging::Logger,
}

impl ActionProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<dyn ActionCatalog>,
        servers: Arc<dyn ServerStore>,
        players: Arc<dyn PlayerService>,
        matches: Arc<dyn MatchService>,
        event_log: Arc<dyn EventLog>,
        rcon: Option<Arc<dyn RconStatus>>,
        notifier: Option<Arc<dyn Notifier>>,
        settings: ActionSettings,
        log: &logging::Logger,
    ) -> ActionProcessor {
        ActionProcessor {
            catalog,
            servers,
            players,
            matches,
            event_log,
            rcon,
            notifier,
            cooldown: Cooldown::new(settings.warn_cooldown),
            baseline_skill: settings.baseline_skill,
            log: log.new(logging::o!()),
        }
    }

    /// Processes one event. Non-action events and guard failures are skips;
    /// store write errors propagate.
    pub fn process(&self, event: &Event, now: Instant) -> StoreResult<Processed> {
        let game = match self.servers.find_by_id(event.server_id)? {
            Some(server) => server.game,
            None => {
                if self.cooldown.permit(&format!("server:{}", event.server_id), now) {
                    logging::warn!(self.log, "action event for unknown server";
                                   "context" => "process",
                                   "server_id" => event.server_id);
                }

                return Ok(Processed::Skipped(SkipReason::UnknownServer));
            }
        };

        match &event.payload {
            Payload::ActionPlayer(data) => self.on_player(event, &game, &data.action_code, &data.team, data.player_id, data.bonus, now),
            Payload::ActionPlayerPlayer(data) => self.on_pair(
                event,
                &game,
                &data.action_code,
                &data.team,
                data.player_id,
                data.victim_player_id,
                data.bonus,
                now,
            ),
            Payload::ActionTeam(data) => {
                self.on_team(event, &game, &data.action_code, &data.team, data.bonus, now)
            }
            Payload::ActionWorld(data) => self.on_world(event, &game, &data.action_code, data.bonus, now),
            _ => Ok(Processed::Skipped(SkipReason::NotAnAction)),
        }
    }

    /// Exact-team definitions win; the empty team is the fallback key.
    fn find_def(&self, game: &str, code: &str, team: &str) -> StoreResult<Option<ActionDef>> {
        if !team.is_empty() {
            if let Some(def) = self.catalog.find(game, code, team)? {
                return Ok(Some(def));
            }
        }

        self.catalog.find(game, code, "")
    }

    fn unknown_action(&self, game: &str, code: &str, now: Instant) -> Processed {
        if self.cooldown.permit(&format!("action:{}:{}", game, code), now) {
            logging::warn!(self.log, "unknown action code";
                           "context" => "process",
                           "game" => game,
                           "code" => code);
        }

        Processed::Skipped(SkipReason::UnknownAction)
    }

    fn missing_player(&self, code: &str, meta: Option<&PlayerMeta>, now: Instant) -> Processed {
        let key = meta.map(|meta| meta.steam_id.clone()).unwrap_or_default();

        if self.cooldown.permit(&format!("player:{}", key), now) {
            logging::warn!(self.log, "action for unresolvable player";
                           "context" => "process",
                           "code" => code,
                           "steam_id" => key);
        }

        Processed::Skipped(SkipReason::MissingPlayer)
    }

    /// Live RCON map first, then the match state, else empty.
    fn resolve_map(&self, server_id: ServerId) -> String {
        if let Some(rcon) = &self.rcon {
            if let Some(map) = rcon.reported_map(server_id) {
                return map;
            }
        }

        match self.matches.current_map(server_id) {
            Ok(Some(map)) => map,
            _ => String::new(),
        }
    }

    /// Validates the acting player: the carried id if it resolves, otherwise
    /// a lookup from the event meta.
    fn validated_player(
        &self,
        known: Option<PlayerId>,
        meta: Option<&PlayerMeta>,
        game: &str,
    ) -> StoreResult<Option<PlayerProfile>> {
        if let Some(id) = known {
            if let Some(profile) = self.players.get(id)? {
                return Ok(Some(profile));
            }
        }

        if let Some(meta) = meta {
            if let Some(id) = self.players.resolve(&meta.steam_id, &meta.player_name, game)? {
                return self.players.get(id);
            }
        }

        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_player(
        &self,
        event: &Event,
        game: &str,
        code: &str,
        team: &str,
        player_id: Option<PlayerId>,
        bonus: i32,
        now: Instant,
    ) -> StoreResult<Processed> {
        let def = match self.find_def(game, code, team)? {
            Some(def) => def,
            None => return Ok(self.unknown_action(game, code, now)),
        };

        if !def.for_player_actions {
            return Ok(Processed::Skipped(SkipReason::NotApplicable));
        }

        let player = match self.validated_player(player_id, event.meta.as_ref(), game)? {
            Some(player) => player,
            None => return Ok(self.missing_player(code, event.meta.as_ref(), now)),
        };

        let points = def.reward_player + bonus;
        let map = self.resolve_map(event.server_id);

        self.event_log.log_player_action(PlayerActionRow {
            player_id: player.id,
            action_id: def.id,
            server_id: event.server_id,
            map,
            bonus: points,
        })?;

        if points != 0 {
            self.players.update_skill(player.id, points)?;
        }

        self.notify(event.server_id, Some(player.id), code, points);

        Ok(Processed::Applied {
            recipients: 1,
            points,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn on_pair(
        &self,
        event: &Event,
        game: &str,
        code: &str,
        team: &str,
        player_id: Option<PlayerId>,
        victim_id: Option<PlayerId>,
        bonus: i32,
        now: Instant,
    ) -> StoreResult<Processed> {
        let def = match self.find_def(game, code, team)? {
            Some(def) => def,
            None => return Ok(self.unknown_action(game, code, now)),
        };

        if !def.for_player_player_actions {
            return Ok(Processed::Skipped(SkipReason::NotApplicable));
        }

        let actor_id = match player_id {
            Some(id) => Some(id),
            None => match event.meta.as_ref() {
                Some(meta) => self.players.resolve(&meta.steam_id, &meta.player_name, game)?,
                None => None,
            },
        };

        let (actor_id, victim_id) = match (actor_id, victim_id) {
            (Some(actor_id), Some(victim_id)) => (actor_id, victim_id),
            _ => return Ok(self.missing_player(code, event.meta.as_ref(), now)),
        };

        // One batched fetch validates both participants
        let found = self.players.get_many(&[actor_id, victim_id])?;

        if found.len() != 2 {
            return Ok(self.missing_player(code, event.meta.as_ref(), now));
        }

        let points = def.reward_player + bonus;
        let map = self.resolve_map(event.server_id);

        self.event_log.log_player_player_action(PlayerPlayerActionRow {
            player_id: actor_id,
            victim_id,
            action_id: def.id,
            server_id: event.server_id,
            map,
            bonus: points,
        })?;

        if points != 0 {
            self.players.update_skill(actor_id, points)?;
        }

        self.notify(event.server_id, Some(actor_id), code, points);

        Ok(Processed::Applied {
            recipients: 1,
            points,
        })
    }

    fn on_team(
        &self,
        event: &Event,
        game: &str,
        code: &str,
        team: &str,
        bonus: i32,
        now: Instant,
    ) -> StoreResult<Processed> {
        let def = match self.find_def(game, code, team)? {
            Some(def) => def,
            None => return Ok(self.unknown_action(game, code, now)),
        };

        if !def.for_team_actions {
            return Ok(Processed::Skipped(SkipReason::NotApplicable));
        }

        let members: Vec<PlayerId> = self
            .matches
            .team_members(event.server_id, team)?
            .into_iter()
            .filter(|&id| id > 0)
            .collect();

        if members.is_empty() {
            return Ok(Processed::Skipped(SkipReason::EmptyTeam));
        }

        let reward = def.reward_team + bonus;
        let map = self.resolve_map(event.server_id);

        let rows: Vec<TeamActionRow> = members
            .iter()
            .map(|&player_id| TeamActionRow {
                player_id,
                action_id: def.id,
                server_id: event.server_id,
                map: map.clone(),
                bonus: reward,
            })
            .collect();

        // One call for the whole team; per-member writes would multiply the
        // round trips by the roster size
        self.event_log.log_team_action_batch(&rows)?;

        if def.reward_team != 0 {
            let deltas: Vec<SkillDelta> = members
                .iter()
                .map(|&player_id| SkillDelta {
                    player_id,
                    skill_delta: reward,
                })
                .collect();

            self.players.update_skill_batch(&deltas)?;
        }

        self.notify(event.server_id, None, code, reward);

        Ok(Processed::Applied {
            recipients: members.len(),
            points: reward,
        })
    }

    fn on_world(
        &self,
        event: &Event,
        game: &str,
        code: &str,
        bonus: i32,
        now: Instant,
    ) -> StoreResult<Processed> {
        let def = match self.find_def(game, code, "")? {
            Some(def) => def,
            None => return Ok(self.unknown_action(game, code, now)),
        };

        if !def.for_world_actions {
            return Ok(Processed::Skipped(SkipReason::NotApplicable));
        }

        let map = self.resolve_map(event.server_id);

        // World actions reward nobody; the row carries only the bonus the
        // event itself brought in
        self.event_log.log_world_action(WorldActionRow {
            action_id: def.id,
            server_id: event.server_id,
            map,
            bonus,
        })?;

        Ok(Processed::Applied {
            recipients: 0,
            points: 0,
        })
    }

    /// Best-effort notification; failures never propagate. The actor's skill
    /// is fetched best-effort and defaults to the configured baseline.
    fn notify(&self, server_id: ServerId, player_id: Option<PlayerId>, code: &str, total_points: i32) {
        if total_points == 0 {
            return;
        }

        let notifier = match &self.notifier {
            Some(notifier) => notifier,
            None => return,
        };

        let current_skill =
            player_id.map(|id| self.players.skill(id).unwrap_or(self.baseline_skill));

        let notice = RewardNotice {
            server_id,
            player_id,
            action_code: code.into(),
            total_points,
            current_skill,
        };

        if let Err(err) = notifier.notify(notice) {
            logging::warn!(self.log, "reward notification failed";
                           "context" => "notify",
                           "code" => code,
                           "error" => ?err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ServerRecord;
    use crate::event::{ActionPlayerData, ActionPlayerPlayerData, ActionTeamData, ActionWorldData};
    use crate::memory::{
        MemoryActionCatalog, MemoryEventLog, MemoryMatchService, MemoryPlayerService, MemoryRcon,
        MemoryServerStore, RecordingNotifier,
    };
    use chrono::Utc;

    struct Fixture {
        processor: ActionProcessor,
        catalog: Arc<MemoryActionCatalog>,
        players: Arc<MemoryPlayerService>,
        matches: Arc<MemoryMatchService>,
        event_log: Arc<MemoryEventLog>,
        notifier: Arc<RecordingNotifier>,
        rcon: Arc<MemoryRcon>,
    }

    fn make_fixture() -> Fixture {
        let catalog = Arc::new(MemoryActionCatalog::new());
        let servers = Arc::new(MemoryServerStore::new());
        let players = Arc::new(MemoryPlayerService::new());
        let matches = Arc::new(MemoryMatchService::new());
        let event_log = Arc::new(MemoryEventLog::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let rcon = Arc::new(MemoryRcon::new());

        servers.seed(ServerRecord {
            server_id: 42,
            address: "192.168.1.100".into(),
            port: 27015,
            game: "cstrike".into(),
            auth_token_id: 1,
            rcon_password: "sealed".into(),
            name: "192.168.1.100:27015".into(),
        });

        let processor = ActionProcessor::new(
            catalog.clone(),
            servers,
            players.clone(),
            matches.clone(),
            event_log.clone(),
            Some(rcon.clone()),
            Some(notifier.clone()),
            ActionSettings::default(),
            &logging::discard(),
        );

        Fixture {
            processor,
            catalog,
            players,
            matches,
            event_log,
            notifier,
            rcon,
        }
    }

    fn make_def(id: u32, code: &str, team: &str) -> ActionDef {
        ActionDef {
            id,
            game: "cstrike".into(),
            code: code.into(),
            team: team.into(),
            reward_player: 0,
            reward_team: 0,
            for_player_actions: false,
            for_player_player_actions: false,
            for_team_actions: false,
            for_world_actions: false,
        }
    }

    fn make_event(payload: Payload) -> Event {
        Event {
            event_id: "msg_test_0".into(),
            correlation_id: "corr_test_0".into(),
            server_id: 42,
            timestamp: Utc::now(),
            payload,
            meta: None,
            raw: "raw line".into(),
        }
    }

    fn team_event(code: &str, team: &str, bonus: i32) -> Event {
        make_event(Payload::ActionTeam(ActionTeamData {
            team: team.into(),
            action_code: code.into(),
            bonus,
        }))
    }

    fn player_event(code: &str, player_id: Option<PlayerId>, bonus: i32) -> Event {
        make_event(Payload::ActionPlayer(ActionPlayerData {
            name: "Player1".into(),
            slot: 2,
            steam_id: "STEAM_0:1:12345".into(),
            team: "TERRORIST".into(),
            player_id,
            action_code: code.into(),
            bonus,
        }))
    }

    fn seed_player(fixture: &Fixture, id: PlayerId, steam_id: Option<&str>) {
        fixture.players.seed(
            PlayerProfile {
                id,
                name: format!("player{}", id),
                skill: 1000,
            },
            steam_id,
        );
    }

    // Team fan-out: one log batch and one skill batch, both at R + B per
    // valid teammate
    #[test]
    fn test_team_bonus_fan_out() {
        let fixture = make_fixture();

        let mut def = make_def(11, "Target_Bombed", "");
        def.reward_team = 3;
        def.for_team_actions = true;
        fixture.catalog.insert(def);

        fixture.matches.set_roster(42, "TERRORIST", vec![5, 9, 0, -1]);
        fixture.matches.set_map(42, "de_dust2");
        seed_player(&fixture, 5, None);
        seed_player(&fixture, 9, None);

        let outcome = fixture
            .processor
            .process(&team_event("Target_Bombed", "TERRORIST", 4), Instant::now())
            .unwrap();

        assert_eq!(
            outcome,
            Processed::Applied {
                recipients: 2,
                points: 7
            }
        );

        let batches = fixture.event_log.team_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0][0].player_id, 5);
        assert_eq!(batches[0][0].bonus, 7);
        assert_eq!(batches[0][1].player_id, 9);
        assert_eq!(batches[0][1].bonus, 7);

        let skill_batches = fixture.players.skill_batches();
        assert_eq!(skill_batches.len(), 1);
        assert_eq!(
            skill_batches[0],
            vec![
                SkillDelta {
                    player_id: 5,
                    skill_delta: 7
                },
                SkillDelta {
                    player_id: 9,
                    skill_delta: 7
                },
            ]
        );

        // No per-player singles snuck in
        assert!(fixture.players.skill_updates().is_empty());
    }

    // Zero team reward still logs the rows but issues no skill batch
    #[test]
    fn test_team_zero_reward_skips_skill_batch() {
        let fixture = make_fixture();

        let mut def = make_def(11, "Target_Saved", "");
        def.for_team_actions = true;
        fixture.catalog.insert(def);
        fixture.matches.set_roster(42, "CT", vec![5, 9]);

        let outcome = fixture
            .processor
            .process(&team_event("Target_Saved", "CT", 2), Instant::now())
            .unwrap();

        assert_eq!(
            outcome,
            Processed::Applied {
                recipients: 2,
                points: 2
            }
        );
        assert_eq!(fixture.event_log.team_batches().len(), 1);
        assert!(fixture.players.skill_batches().is_empty());
    }

    #[test]
    fn test_team_with_no_valid_members() {
        let fixture = make_fixture();

        let mut def = make_def(11, "Target_Bombed", "");
        def.reward_team = 3;
        def.for_team_actions = true;
        fixture.catalog.insert(def);
        fixture.matches.set_roster(42, "TERRORIST", vec![0, -1]);

        let outcome = fixture
            .processor
            .process(&team_event("Target_Bombed", "TERRORIST", 0), Instant::now())
            .unwrap();

        assert_eq!(outcome, Processed::Skipped(SkipReason::EmptyTeam));
        assert!(fixture.event_log.team_batches().is_empty());
        assert!(fixture.players.skill_batches().is_empty());
    }

    #[test]
    fn test_unknown_action_code_no_effect() {
        let fixture = make_fixture();

        let outcome = fixture
            .processor
            .process(&team_event("Did_Something_Odd", "CT", 0), Instant::now())
            .unwrap();

        assert_eq!(outcome, Processed::Skipped(SkipReason::UnknownAction));
        assert!(fixture.event_log.team_batches().is_empty());
    }

    #[test]
    fn test_capability_flag_gates_event_type() {
        let fixture = make_fixture();

        // Known code, but not enabled for team actions
        let mut def = make_def(11, "Target_Bombed", "");
        def.for_player_actions = true;
        fixture.catalog.insert(def);
        fixture.matches.set_roster(42, "TERRORIST", vec![5]);

        let outcome = fixture
            .processor
            .process(&team_event("Target_Bombed", "TERRORIST", 0), Instant::now())
            .unwrap();

        assert_eq!(outcome, Processed::Skipped(SkipReason::NotApplicable));
    }

    #[test]
    fn test_exact_team_definition_preferred() {
        let fixture = make_fixture();

        let mut exact = make_def(11, "Round_Win", "TERRORIST");
        exact.reward_team = 5;
        exact.for_team_actions = true;
        fixture.catalog.insert(exact);

        let mut fallback = make_def(12, "Round_Win", "");
        fallback.reward_team = 1;
        fallback.for_team_actions = true;
        fixture.catalog.insert(fallback);

        fixture.matches.set_roster(42, "TERRORIST", vec![5]);
        fixture.matches.set_roster(42, "CT", vec![9]);
        seed_player(&fixture, 5, None);
        seed_player(&fixture, 9, None);

        fixture
            .processor
            .process(&team_event("Round_Win", "TERRORIST", 0), Instant::now())
            .unwrap();
        fixture
            .processor
            .process(&team_event("Round_Win", "CT", 0), Instant::now())
            .unwrap();

        let batches = fixture.event_log.team_batches();
        assert_eq!(batches[0][0].action_id, 11);
        assert_eq!(batches[0][0].bonus, 5);
        assert_eq!(batches[1][0].action_id, 12);
        assert_eq!(batches[1][0].bonus, 1);
    }

    #[test]
    fn test_player_action_rewards_and_notifies() {
        let fixture = make_fixture();

        let mut def = make_def(21, "Planted_The_Bomb", "");
        def.reward_player = 5;
        def.for_player_actions = true;
        fixture.catalog.insert(def);
        seed_player(&fixture, 9, Some("STEAM_0:1:12345"));
        fixture.matches.set_map(42, "de_dust2");

        let outcome = fixture
            .processor
            .process(&player_event("Planted_The_Bomb", Some(9), 0), Instant::now())
            .unwrap();

        assert_eq!(
            outcome,
            Processed::Applied {
                recipients: 1,
                points: 5
            }
        );

        let rows = fixture.event_log.player_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].player_id, 9);
        assert_eq!(rows[0].action_id, 21);
        assert_eq!(rows[0].map, "de_dust2");
        assert_eq!(rows[0].bonus, 5);

        assert_eq!(
            fixture.players.skill_updates(),
            vec![SkillDelta {
                player_id: 9,
                skill_delta: 5
            }]
        );

        let notices = fixture.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].player_id, Some(9));
        assert_eq!(notices[0].total_points, 5);
        assert_eq!(notices[0].current_skill, Some(1005));
    }

    #[test]
    fn test_player_action_zero_points_logs_only() {
        let fixture = make_fixture();

        let mut def = make_def(21, "Spawned_With_The_Bomb", "");
        def.for_player_actions = true;
        fixture.catalog.insert(def);
        seed_player(&fixture, 9, None);

        let outcome = fixture
            .processor
            .process(&player_event("Spawned_With_The_Bomb", Some(9), 0), Instant::now())
            .unwrap();

        assert_eq!(
            outcome,
            Processed::Applied {
                recipients: 1,
                points: 0
            }
        );
        assert_eq!(fixture.event_log.player_rows().len(), 1);
        assert!(fixture.players.skill_updates().is_empty());
        assert!(fixture.notifier.notices().is_empty());
    }

    #[test]
    fn test_player_resolved_from_meta() {
        let fixture = make_fixture();

        let mut def = make_def(21, "Planted_The_Bomb", "");
        def.reward_player = 5;
        def.for_player_actions = true;
        fixture.catalog.insert(def);
        seed_player(&fixture, 9, Some("STEAM_0:1:12345"));

        let mut event = player_event("Planted_The_Bomb", None, 0);
        event.meta = Some(PlayerMeta {
            steam_id: "STEAM_0:1:12345".into(),
            player_name: "Player1".into(),
            is_bot: false,
        });

        let outcome = fixture.processor.process(&event, Instant::now()).unwrap();

        assert_eq!(
            outcome,
            Processed::Applied {
                recipients: 1,
                points: 5
            }
        );
        assert_eq!(fixture.event_log.player_rows()[0].player_id, 9);
    }

    #[test]
    fn test_missing_player_no_effect() {
        let fixture = make_fixture();

        let mut def = make_def(21, "Planted_The_Bomb", "");
        def.reward_player = 5;
        def.for_player_actions = true;
        fixture.catalog.insert(def);

        let outcome = fixture
            .processor
            .process(&player_event("Planted_The_Bomb", Some(9), 0), Instant::now())
            .unwrap();

        assert_eq!(outcome, Processed::Skipped(SkipReason::MissingPlayer));
        assert!(fixture.event_log.player_rows().is_empty());
        assert!(fixture.players.skill_updates().is_empty());
    }

    #[test]
    fn test_pair_action() {
        let fixture = make_fixture();

        let mut def = make_def(31, "Killed_A_Hostage", "");
        def.reward_player = -2;
        def.for_player_player_actions = true;
        fixture.catalog.insert(def);
        seed_player(&fixture, 5, None);
        seed_player(&fixture, 9, None);

        let event = make_event(Payload::ActionPlayerPlayer(ActionPlayerPlayerData {
            name: "A".into(),
            slot: 1,
            steam_id: "STEAM_0:0:1".into(),
            team: "CT".into(),
            player_id: Some(5),
            victim_name: "H".into(),
            victim_slot: 2,
            victim_steam_id: "STEAM_0:0:2".into(),
            victim_team: "TERRORIST".into(),
            victim_player_id: Some(9),
            action_code: "Killed_A_Hostage".into(),
            bonus: 0,
        }));

        let outcome = fixture.processor.process(&event, Instant::now()).unwrap();

        assert_eq!(
            outcome,
            Processed::Applied {
                recipients: 1,
                points: -2
            }
        );

        let rows = fixture.event_log.pair_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].player_id, 5);
        assert_eq!(rows[0].victim_id, 9);

        assert_eq!(
            fixture.players.skill_updates(),
            vec![SkillDelta {
                player_id: 5,
                skill_delta: -2
            }]
        );
    }

    #[test]
    fn test_pair_with_missing_victim() {
        let fixture = make_fixture();

        let mut def = make_def(31, "Killed_A_Hostage", "");
        def.for_player_player_actions = true;
        fixture.catalog.insert(def);
        seed_player(&fixture, 5, None);

        let event = make_event(Payload::ActionPlayerPlayer(ActionPlayerPlayerData {
            name: "A".into(),
            slot: 1,
            steam_id: "STEAM_0:0:1".into(),
            team: "CT".into(),
            player_id: Some(5),
            victim_name: "H".into(),
            victim_slot: 2,
            victim_steam_id: "STEAM_0:0:2".into(),
            victim_team: "TERRORIST".into(),
            victim_player_id: Some(9),
            action_code: "Killed_A_Hostage".into(),
            bonus: 0,
        }));

        let outcome = fixture.processor.process(&event, Instant::now()).unwrap();

        assert_eq!(outcome, Processed::Skipped(SkipReason::MissingPlayer));
        assert!(fixture.event_log.pair_rows().is_empty());
    }

    #[test]
    fn test_world_action_logs_row_only() {
        let fixture = make_fixture();

        let mut def = make_def(41, "Round_Draw", "");
        def.for_world_actions = true;
        fixture.catalog.insert(def);

        let event = make_event(Payload::ActionWorld(ActionWorldData {
            action_code: "Round_Draw".into(),
            bonus: 0,
        }));

        let outcome = fixture.processor.process(&event, Instant::now()).unwrap();

        assert_eq!(
            outcome,
            Processed::Applied {
                recipients: 0,
                points: 0
            }
        );
        assert_eq!(fixture.event_log.world_rows().len(), 1);
        assert!(fixture.players.skill_updates().is_empty());
    }

    // A player reward on a shared (game, code, "") definition must not leak
    // into the world-log row
    #[test]
    fn test_world_action_ignores_player_reward() {
        let fixture = make_fixture();

        let mut def = make_def(41, "Round_Draw", "");
        def.for_world_actions = true;
        def.reward_player = 5;
        fixture.catalog.insert(def);

        let event = make_event(Payload::ActionWorld(ActionWorldData {
            action_code: "Round_Draw".into(),
            bonus: 2,
        }));

        let outcome = fixture.processor.process(&event, Instant::now()).unwrap();

        assert_eq!(
            outcome,
            Processed::Applied {
                recipients: 0,
                points: 0
            }
        );

        let rows = fixture.event_log.world_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bonus, 2);
        assert!(fixture.players.skill_updates().is_empty());
        assert!(fixture.notifier.notices().is_empty());
    }

    #[test]
    fn test_notification_failure_swallowed() {
        let fixture = make_fixture();

        let mut def = make_def(21, "Planted_The_Bomb", "");
        def.reward_player = 5;
        def.for_player_actions = true;
        fixture.catalog.insert(def);
        seed_player(&fixture, 9, None);
        fixture.notifier.set_failing(true);

        let outcome = fixture
            .processor
            .process(&player_event("Planted_The_Bomb", Some(9), 0), Instant::now())
            .unwrap();

        assert_eq!(
            outcome,
            Processed::Applied {
                recipients: 1,
                points: 5
            }
        );
    }

    #[test]
    fn test_map_resolution_prefers_rcon() {
        let fixture = make_fixture();

        let mut def = make_def(21, "Planted_The_Bomb", "");
        def.for_player_actions = true;
        fixture.catalog.insert(def);
        seed_player(&fixture, 9, None);

        fixture.rcon.set_map(42, "de_nuke");
        fixture.matches.set_map(42, "de_dust2");

        fixture
            .processor
            .process(&player_event("Planted_The_Bomb", Some(9), 0), Instant::now())
            .unwrap();

        assert_eq!(fixture.event_log.player_rows()[0].map, "de_nuke");
    }

    #[test]
    fn test_map_resolution_falls_back_to_empty() {
        let fixture = make_fixture();

        let mut def = make_def(21, "Planted_The_Bomb", "");
        def.for_player_actions = true;
        fixture.catalog.insert(def);
        seed_player(&fixture, 9, None);

        fixture
            .processor
            .process(&player_event("Planted_The_Bomb", Some(9), 0), Instant::now())
            .unwrap();

        assert_eq!(fixture.event_log.player_rows()[0].map, "");
    }

    #[test]
    fn test_non_action_event_skipped() {
        let fixture = make_fixture();

        let event = make_event(Payload::RoundStart(crate::event::RoundStartData {
            map: "de_dust2".into(),
            round: 1,
        }));

        let outcome = fixture.processor.process(&event, Instant::now()).unwrap();

        assert_eq!(outcome, Processed::Skipped(SkipReason::NotAnAction));
    }

    #[test]
    fn test_unknown_server_skipped() {
        let fixture = make_fixture();
        let mut event = team_event("Target_Bombed", "CT", 0);
        event.server_id = 99;

        let outcome = fixture.processor.process(&event, Instant::now()).unwrap();

        assert_eq!(outcome, Processed::Skipped(SkipReason::UnknownServer));
    }
}
