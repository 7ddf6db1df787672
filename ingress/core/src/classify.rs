use lazy_static::lazy_static;
use regex::Regex;

/// Literal prefix of a token beacon payload.
pub const BEACON_PREFIX: &str = "HLXTOKEN:";

/// Game port assumed when a beacon omits the `:<gamePort>` suffix.
pub const DEFAULT_GAME_PORT: u16 = 27015;

lazy_static! {
    static ref TIMESTAMP: Regex =
        Regex::new(r"^L \d{2}/\d{2}/\d{4} - \d{2}:\d{2}:\d{2}:\s*").expect("Invalid timestamp pattern");
}

/// Strips the engine timestamp prefix (`L MM/DD/YYYY - HH:MM:SS: `) if
/// present. Idempotent, so the parser may re-strip classified lines.
pub fn strip_timestamp(line: &str) -> &str {
    match TIMESTAMP.find(line) {
        Some(found) => &line[found.end()..],
        None => line,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classified {
    /// A token beacon asserting the source's identity.
    Beacon { token: String, game_port: u16 },
    /// An ordinary engine log line, passed through unmodified.
    LogLine(String),
    /// A malformed beacon. Never falls through to the log path, so nothing
    /// can be smuggled past authentication under the beacon prefix.
    Rejected(RejectReason),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RejectReason {
    EmptyToken,
    BadPort,
}

/// Classifies one ingress line as a beacon or a log line. The beacon payload
/// is `<token>[:<gamePort>]`, split on the last colon.
pub fn classify(line: &str) -> Classified {
    let stripped = strip_timestamp(line);

    let payload = match stripped.strip_prefix(BEACON_PREFIX) {
        Some(payload) => payload,
        None => return Classified::LogLine(line.into()),
    };

    let (token, game_port) = match payload.rfind(':') {
        Some(split) => {
            let port = match payload[split + 1..].parse::<u32>() {
                Ok(port) if port >= 1 && port <= 65_535 => port as u16,
                _ => return Classified::Rejected(RejectReason::BadPort),
            };

            (&payload[..split], port)
        }
        None => (payload, DEFAULT_GAME_PORT),
    };

    if token.is_empty() {
        return Classified::Rejected(RejectReason::EmptyToken);
    }

    Classified::Beacon {
        token: token.into(),
        game_port,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW_TOKEN: &str = "hlxn_testtoken12345678901234567890123456789012";

    #[test]
    fn test_strip_timestamp() {
        assert_eq!(
            strip_timestamp("L 02/22/2026 - 09:48:09: World triggered \"Round_Start\""),
            "World triggered \"Round_Start\""
        );
        assert_eq!(strip_timestamp("no prefix here"), "no prefix here");
    }

    #[test]
    fn test_strip_timestamp_idempotent() {
        let stripped = strip_timestamp("L 02/22/2026 - 09:48:09: payload");

        assert_eq!(strip_timestamp(stripped), "payload");
    }

    #[test]
    fn test_beacon_with_timestamp() {
        let line = format!("L 02/22/2026 - 09:48:09: HLXTOKEN:{}:27015", RAW_TOKEN);

        assert_eq!(
            classify(&line),
            Classified::Beacon {
                token: RAW_TOKEN.into(),
                game_port: 27_015
            }
        );
    }

    #[test]
    fn test_beacon_without_timestamp() {
        let line = format!("HLXTOKEN:{}:27016", RAW_TOKEN);

        assert_eq!(
            classify(&line),
            Classified::Beacon {
                token: RAW_TOKEN.into(),
                game_port: 27_016
            }
        );
    }

    #[test]
    fn test_beacon_default_port() {
        let line = format!("HLXTOKEN:{}", RAW_TOKEN);

        assert_eq!(
            classify(&line),
            Classified::Beacon {
                token: RAW_TOKEN.into(),
                game_port: DEFAULT_GAME_PORT
            }
        );
    }

    #[test]
    fn test_beacon_port_out_of_range() {
        assert_eq!(
            classify(&format!("HLXTOKEN:{}:0", RAW_TOKEN)),
            Classified::Rejected(RejectReason::BadPort)
        );
        assert_eq!(
            classify(&format!("HLXTOKEN:{}:65536", RAW_TOKEN)),
            Classified::Rejected(RejectReason::BadPort)
        );
    }

    #[test]
    fn test_beacon_port_not_numeric() {
        assert_eq!(
            classify("HLXTOKEN:abc:def"),
            Classified::Rejected(RejectReason::BadPort)
        );
    }

    #[test]
    fn test_beacon_empty_token() {
        assert_eq!(
            classify("HLXTOKEN::27015"),
            Classified::Rejected(RejectReason::EmptyToken)
        );
        assert_eq!(
            classify("HLXTOKEN:"),
            Classified::Rejected(RejectReason::EmptyToken)
        );
    }

    // No line under the beacon prefix may ever reach the log path
    #[test]
    fn test_no_smuggling() {
        let adversarial = [
            "HLXTOKEN:".to_string(),
            "HLXTOKEN::".to_string(),
            "HLXTOKEN:x:99999999".to_string(),
            "HLXTOKEN:\"Player<1><STEAM_0:0:1><CT>\" killed:bad".to_string(),
            format!("L 02/22/2026 - 09:48:09: HLXTOKEN:{}:-1", RAW_TOKEN),
        ];

        for line in adversarial.iter() {
            match classify(line) {
                Classified::LogLine(_) => panic!("Smuggled past the classifier: {}", line),
                _ => (),
            }
        }
    }

    #[test]
    fn test_log_line_passes_through_unmodified() {
        let line = "L 02/22/2026 - 09:48:09: \"Player<2><STEAM_0:1:12345><CT>\" entered the game";

        assert_eq!(classify(line), Classified::LogLine(line.into()));
    }
}
