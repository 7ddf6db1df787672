use crate::ServerId;
use hashbrown::HashMap;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MatchPhase {
    Waiting,
    Live,
}

/// Shared per-server state consulted and updated by the parser. Keyed by
/// server id rather than held on the parser instance, so a parser rebuilt
/// from cold caches agrees with its predecessor on the latch and map.
#[derive(Clone, Debug)]
pub struct ServerState {
    pub current_map: String,
    pub current_round: u32,
    pub last_winning_team: Option<String>,
    pub phase: MatchPhase,
    pub team_counts: HashMap<String, u32>,
    pub max_players: u32,
    pub last_activity: Option<Instant>,
}

impl ServerState {
    fn new() -> ServerState {
        ServerState {
            current_map: String::new(),
            current_round: 0,
            last_winning_team: None,
            phase: MatchPhase::Waiting,
            team_counts: HashMap::new(),
            max_players: 0,
            last_activity: None,
        }
    }
}

/// Result of a map update.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MapTransition {
    pub changed: bool,
    pub previous_map: Option<String>,
}

/// Result of closing a round. The winning team is the latched value, taken
/// at most once.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoundClose {
    pub round: u32,
    pub winning_team: Option<String>,
}

/// Thread-safe registry of per-server state, created on first touch.
pub struct StateManager {
    states: Mutex<HashMap<ServerId, ServerState>>,
}

impl StateManager {
    pub fn new() -> StateManager {
        StateManager {
            states: Mutex::new(HashMap::new()),
        }
    }

    fn with_state<T, F: FnOnce(&mut ServerState) -> T>(&self, server_id: ServerId, op: F) -> T {
        let mut states = self.states.lock().expect("Server state table poisoned");

        op(states.entry(server_id).or_insert_with(ServerState::new))
    }

    /// Returns a snapshot copy of the server's state.
    pub fn get_state(&self, server_id: ServerId) -> ServerState {
        self.with_state(server_id, |state| state.clone())
    }

    /// Switches the current map. The returned transition carries the
    /// previous map when one was known. Resets the round counter and drops
    /// the match back to waiting.
    pub fn update_map(&self, server_id: ServerId, map: &str) -> MapTransition {
        self.with_state(server_id, |state| {
            if state.current_map == map {
                return MapTransition {
                    changed: false,
                    previous_map: None,
                };
            }

            let previous = ::std::mem::replace(&mut state.current_map, map.into());
            let previous = match previous.is_empty() {
                true => None,
                false => Some(previous),
            };

            state.current_round = 0;
            state.last_winning_team = None;
            state.phase = MatchPhase::Waiting;

            MapTransition {
                changed: true,
                previous_map: previous,
            }
        })
    }

    /// Latches the winning team for the round being played.
    pub fn set_winning_team(&self, server_id: ServerId, team: &str) {
        self.with_state(server_id, |state| {
            state.last_winning_team = Some(team.into());
        })
    }

    /// Starts a round, returning its number. The first round on a map is 1.
    pub fn start_round(&self, server_id: ServerId) -> u32 {
        self.with_state(server_id, |state| {
            state.current_round += 1;
            state.phase = MatchPhase::Live;
            state.current_round
        })
    }

    /// Ends the round, consuming the winning-team latch. A second close
    /// without an intervening win reads an empty latch.
    pub fn end_round(&self, server_id: ServerId) -> RoundClose {
        self.with_state(server_id, |state| RoundClose {
            round: state.current_round,
            winning_team: state.last_winning_team.take(),
        })
    }

    /// Records that a team currently fields the given number of players.
    pub fn record_team_count(&self, server_id: ServerId, team: &str, count: u32) {
        self.with_state(server_id, |state| {
            state.team_counts.insert(team.into(), count);
        })
    }

    pub fn set_max_players(&self, server_id: ServerId, max_players: u32) {
        self.with_state(server_id, |state| state.max_players = max_players)
    }

    /// Stamps the server as active now.
    pub fn touch(&self, server_id: ServerId, now: Instant) {
        self.with_state(server_id, |state| state.last_activity = Some(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_on_first_touch() {
        let manager = StateManager::new();
        let state = manager.get_state(7);

        assert_eq!(state.current_map, "");
        assert_eq!(state.current_round, 0);
        assert_eq!(state.last_winning_team, None);
        assert_eq!(state.phase, MatchPhase::Waiting);
    }

    #[test]
    fn test_update_map_first_map_has_no_previous() {
        let manager = StateManager::new();

        let transition = manager.update_map(7, "cs_havana");

        assert_eq!(
            transition,
            MapTransition {
                changed: true,
                previous_map: None
            }
        );
        assert_eq!(manager.get_state(7).current_map, "cs_havana");
    }

    #[test]
    fn test_update_map_reports_previous() {
        let manager = StateManager::new();
        manager.update_map(7, "cs_havana");

        let transition = manager.update_map(7, "de_dust2");

        assert_eq!(
            transition,
            MapTransition {
                changed: true,
                previous_map: Some("cs_havana".into())
            }
        );
    }

    #[test]
    fn test_update_map_same_map_unchanged() {
        let manager = StateManager::new();
        manager.update_map(7, "cs_havana");

        let transition = manager.update_map(7, "cs_havana");

        assert!(!transition.changed);
        assert_eq!(transition.previous_map, None);
    }

    #[test]
    fn test_update_map_resets_round_and_latch() {
        let manager = StateManager::new();
        manager.update_map(7, "cs_havana");
        manager.start_round(7);
        manager.set_winning_team(7, "CT");

        manager.update_map(7, "de_dust2");

        let state = manager.get_state(7);
        assert_eq!(state.current_round, 0);
        assert_eq!(state.last_winning_team, None);
    }

    #[test]
    fn test_round_counter_increments() {
        let manager = StateManager::new();

        assert_eq!(manager.start_round(7), 1);
        assert_eq!(manager.start_round(7), 2);
        assert_eq!(manager.get_state(7).phase, MatchPhase::Live);
    }

    // The latch is consumed by exactly one round end
    #[test]
    fn test_winning_team_latch_taken_once() {
        let manager = StateManager::new();
        manager.start_round(7);
        manager.set_winning_team(7, "TERRORIST");

        let first = manager.end_round(7);
        let second = manager.end_round(7);

        assert_eq!(first.winning_team, Some("TERRORIST".into()));
        assert_eq!(second.winning_team, None);
    }

    #[test]
    fn test_servers_isolated() {
        let manager = StateManager::new();
        manager.update_map(7, "cs_havana");
        manager.set_winning_team(7, "CT");

        assert_eq!(manager.get_state(8).current_map, "");
        assert_eq!(manager.end_round(8).winning_team, None);
        assert_eq!(manager.end_round(7).winning_team, Some("CT".into()));
    }

    #[test]
    fn test_team_counts() {
        let manager = StateManager::new();
        manager.record_team_count(7, "CT", 5);
        manager.record_team_count(7, "TERRORIST", 4);
        manager.set_max_players(7, 32);

        let state = manager.get_state(7);
        assert_eq!(state.team_counts.get("CT"), Some(&5));
        assert_eq!(state.max_players, 32);
    }
}
