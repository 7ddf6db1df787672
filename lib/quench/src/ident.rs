use crate::crypto;
use crate::time;

/// Issues the message and correlation identifiers stamped on every outbound
/// event. Injected so tests can pin the generated ids.
pub trait IdentSource: Send + Sync {
    /// Returns a fresh event id in the form `msg_<base36 millis>_<16 hex>`.
    fn event_id(&self) -> String;

    /// Returns a fresh correlation id in the form `corr_<base36 millis>_<12 hex>`.
    fn correlation_id(&self) -> String;
}

/// Identifier source backed by the system clock and the sodium CSPRNG.
pub struct RandomIdent;

impl IdentSource for RandomIdent {
    fn event_id(&self) -> String {
        let mut entropy = [0u8; 8];
        crypto::random_bytes(&mut entropy);

        format!(
            "msg_{}_{}",
            time::base36(time::timestamp_millis()),
            crypto::hex(&entropy)
        )
    }

    fn correlation_id(&self) -> String {
        let mut entropy = [0u8; 6];
        crypto::random_bytes(&mut entropy);

        format!(
            "corr_{}_{}",
            time::base36(time::timestamp_millis()),
            crypto::hex(&entropy)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split3(id: &str) -> (String, String, String) {
        let mut parts = id.split('_');

        (
            parts.next().unwrap().into(),
            parts.next().unwrap().into(),
            parts.next().unwrap().into(),
        )
    }

    #[test]
    fn test_event_id_shape() {
        let (prefix, stamp, entropy) = split3(&RandomIdent.event_id());

        assert_eq!(prefix, "msg");
        assert!(!stamp.is_empty());
        assert_eq!(entropy.len(), 16);
        assert!(entropy.chars().all(|chr| chr.is_ascii_hexdigit()));
    }

    #[test]
    fn test_correlation_id_shape() {
        let (prefix, stamp, entropy) = split3(&RandomIdent.correlation_id());

        assert_eq!(prefix, "corr");
        assert!(!stamp.is_empty());
        assert_eq!(entropy.len(), 12);
        assert!(entropy.chars().all(|chr| chr.is_ascii_hexdigit()));
    }

    #[test]
    fn test_event_ids_unique() {
        assert_ne!(RandomIdent.event_id(), RandomIdent.event_id());
    }
}
