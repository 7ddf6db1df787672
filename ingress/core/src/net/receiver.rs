use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use quench::logging;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Datagrams are self-contained game log lines; anything larger than the
/// socket MTU was truncated by the sender's stack and is not reassembled.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Out-of-band header prepended by Source/GoldSrc engines to UDP payloads.
pub const OOB_HEADER: [u8; 4] = [0xff, 0xff, 0xff, 0xff];

const SOCKET_TOKEN: Token = Token(0);

/// One decoded ingress datagram.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Datagram {
    pub line: String,
    pub source: SocketAddr,
}

/// Decodes a raw datagram payload into a log line:
///
/// 1. Strip the OOB header and any immediately following bytes above 0x7E.
/// 2. A trailing NUL terminates the payload.
/// 3. Decode as UTF-8 (lossy), trim, strip a leading `log ` token.
///
/// Returns `None` when nothing printable remains.
pub fn decode_payload(buffer: &[u8]) -> Option<String> {
    let mut data = buffer;

    if data.len() >= OOB_HEADER.len() && data[..OOB_HEADER.len()] == OOB_HEADER {
        data = &data[OOB_HEADER.len()..];

        while let Some((&first, rest)) = data.split_first() {
            if first > 0x7e {
                data = rest;
            } else {
                break;
            }
        }
    }

    let end = data.iter().position(|&byte| byte == 0).unwrap_or(data.len());

    let text = String::from_utf8_lossy(&data[..end]);
    let text = text.trim();
    let text = match text.strip_prefix("log ") {
        Some(rest) => rest.trim_start(),
        None => text,
    };

    match text.is_empty() {
        true => None,
        false => Some(text.into()),
    }
}

/// Polled UDP ingress socket. The receiver decodes datagrams into records;
/// classification and routing happen upstream.
pub struct Receiver {
    socket: UdpSocket,
    poll: Poll,
    events: Events,
    buffer: [u8; MAX_DATAGRAM_SIZE],
    log: logging::Logger,
}

impl Receiver {
    /// Binds the ingress socket on the provided address.
    pub fn bind(address: SocketAddr, log: &logging::Logger) -> io::Result<Receiver> {
        let poll = Poll::new()?;
        let mut socket = UdpSocket::bind(address)?;

        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;

        let receiver = Receiver {
            socket,
            poll,
            events: Events::with_capacity(64),
            buffer: [0; MAX_DATAGRAM_SIZE],
            log: log.new(logging::o!()),
        };

        logging::info!(receiver.log, "ingress socket bound";
                       "context" => "bind",
                       "address" => %address);

        Ok(receiver)
    }

    /// The bound socket address (relevant when binding port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Waits up to `timeout` for readability, then drains every available
    /// datagram into the sink. Returns the number of datagrams taken off the
    /// socket, including ones dropped as empty.
    pub fn poll_once<F: FnMut(Datagram)>(&mut self, timeout: Duration, mut sink: F) -> io::Result<usize> {
        if let Err(err) = self.poll.poll(&mut self.events, Some(timeout)) {
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }

            return Err(err);
        }

        let mut received = 0;

        loop {
            match self.socket.recv_from(&mut self.buffer) {
                Ok((size, source)) => {
                    received += 1;

                    match decode_payload(&self.buffer[..size]) {
                        Some(line) => sink(Datagram { line, source }),
                        None => {
                            logging::trace!(self.log, "empty datagram dropped";
                                            "context" => "poll_once",
                                            "source" => %source,
                                            "size" => size);
                        }
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_line() {
        assert_eq!(
            decode_payload(b"L 02/22/2026 - 09:48:09: World triggered \"Round_Start\""),
            Some("L 02/22/2026 - 09:48:09: World triggered \"Round_Start\"".into())
        );
    }

    #[test]
    fn test_decode_strips_oob_header() {
        let mut framed = vec![0xff, 0xff, 0xff, 0xff];
        framed.extend_from_slice(b"log L 02/22/2026 - 09:48:09: line");

        assert_eq!(
            decode_payload(&framed),
            Some("L 02/22/2026 - 09:48:09: line".into())
        );
    }

    #[test]
    fn test_decode_strips_high_header_bytes() {
        let mut framed = vec![0xff, 0xff, 0xff, 0xff, 0xfe, 0x80];
        framed.extend_from_slice(b"log payload");

        assert_eq!(decode_payload(&framed), Some("payload".into()));
    }

    #[test]
    fn test_decode_trailing_nul_terminates() {
        assert_eq!(
            decode_payload(b"payload\0garbage after the terminator"),
            Some("payload".into())
        );
    }

    #[test]
    fn test_decode_short_oob_lookalike() {
        // Fewer than four bytes never match the header
        assert_eq!(decode_payload(&[0xff, 0xff]), None);
    }

    #[test]
    fn test_decode_empty_variants() {
        assert_eq!(decode_payload(b""), None);
        assert_eq!(decode_payload(b"   "), None);
        assert_eq!(decode_payload(b"log "), None);
        assert_eq!(decode_payload(&[0xff, 0xff, 0xff, 0xff]), None);
        assert_eq!(decode_payload(b"\0"), None);
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        let decoded = decode_payload(b"before \xc3\x28 after").unwrap();

        assert!(decoded.starts_with("before"));
        assert!(decoded.ends_with("after"));
    }

    #[test]
    fn test_receive_roundtrip() {
        let log = logging::discard();
        let mut receiver = Receiver::bind("127.0.0.1:0".parse().unwrap(), &log).unwrap();
        let target = receiver.local_addr().unwrap();

        let sender = ::std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"log hello from the test", &target).unwrap();

        let mut taken = Vec::new();
        for _ in 0..50 {
            receiver
                .poll_once(Duration::from_millis(100), |datagram| taken.push(datagram))
                .unwrap();

            if !taken.is_empty() {
                break;
            }
        }

        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].line, "hello from the test");
        assert_eq!(taken[0].source.ip(), target.ip());
    }
}
