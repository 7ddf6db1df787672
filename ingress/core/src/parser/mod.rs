pub mod cstrike;

use crate::event::Event;
use crate::state::StateManager;
use crate::ServerId;
use quench::ident::IdentSource;
use quench::logging;
use std::sync::Arc;

/// Parse failure on a recognized trigger. Carries a bounded excerpt of the
/// offending line; the pipeline logs it and moves on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseError {
    pub message: String,
}

pub type ParseResult = Result<Option<Event>, ParseError>;

/// A per-server log parser. At most one event is emitted per line; lines
/// with no recognized trigger succeed with no event.
pub trait GameParser: Send {
    fn parse_line(&mut self, raw: &str) -> ParseResult;

    /// Number of lines that matched a trigger but failed to parse.
    fn error_count(&self) -> u64;
}

/// Parser for games without a grammar: always succeeds, never emits.
pub struct NullParser;

impl GameParser for NullParser {
    fn parse_line(&mut self, _raw: &str) -> ParseResult {
        Ok(None)
    }

    fn error_count(&self) -> u64 {
        0
    }
}

/// Normalizes a game code to its canonical lowercase form.
pub fn normalize_game(game: &str) -> String {
    game.trim().to_ascii_lowercase()
}

/// Creates the parser for a server by game code. Known Counter-Strike
/// aliases share the CS grammar; anything else gets the null parser.
pub struct ParserFactory {
    state: Arc<StateManager>,
    idents: Arc<dyn IdentSource>,
    log: logging::Logger,
}

impl ParserFactory {
    pub fn new(state: Arc<StateManager>, idents: Arc<dyn IdentSource>, log: &logging::Logger) -> ParserFactory {
        ParserFactory {
            state,
            idents,
            log: log.new(logging::o!()),
        }
    }

    pub fn create(&self, game: &str, server_id: ServerId) -> Box<dyn GameParser> {
        match normalize_game(game).as_str() {
            "cstrike" | "cs" | "cs16" | "counter-strike" | "czero" => Box::new(cstrike::CsParser::new(
                server_id,
                self.state.clone(),
                self.idents.clone(),
                &self.log,
            )),
            other => {
                logging::debug!(self.log, "no grammar for game, using null parser";
                                "context" => "create",
                                "server_id" => server_id,
                                "game" => other);

                Box::new(NullParser)
            }
        }
    }
}
