pub mod receiver;

pub use self::receiver::{decode_payload, Datagram, Receiver, MAX_DATAGRAM_SIZE};
