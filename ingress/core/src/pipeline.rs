use crate::auth::Authenticator;
use crate::classify::{self, Classified};
use crate::contract::{EventPublisher, ServerStore, StoreResult};
use crate::limiter::Cooldown;
use crate::net::{Datagram, Receiver};
use crate::parser::{GameParser, ParserFactory};
use crate::ServerId;
use hashbrown::HashMap;
use quench::logging;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// How long the receive loop blocks waiting for datagrams before rechecking
/// the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Bound of each worker mailbox; a full queue blocks the receive loop rather
/// than dropping datagrams.
const WORKER_QUEUE_DEPTH: usize = 1024;

#[derive(Default)]
pub struct PipelineStats {
    datagrams: AtomicU64,
    beacons: AtomicU64,
    rejected_beacons: AtomicU64,
    events_published: AtomicU64,
    parse_errors: AtomicU64,
    dropped_no_session: AtomicU64,
    publish_errors: AtomicU64,
    store_errors: AtomicU64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StatsSnapshot {
    pub datagrams: u64,
    pub beacons: u64,
    pub rejected_beacons: u64,
    pub events_published: u64,
    pub parse_errors: u64,
    pub dropped_no_session: u64,
    pub publish_errors: u64,
    pub store_errors: u64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            beacons: self.beacons.load(Ordering::Relaxed),
            rejected_beacons: self.rejected_beacons.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            dropped_no_session: self.dropped_no_session.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

/// The ingress orchestrator: classifies each datagram, routes beacons into
/// the authenticator and log lines into the per-server parser, and publishes
/// parsed events. Owns the parser cache; entries are created lazily and
/// never evicted during a server's session.
pub struct Pipeline {
    auth: Arc<Authenticator>,
    servers: Arc<dyn ServerStore>,
    factory: ParserFactory,
    parsers: Mutex<HashMap<ServerId, Arc<Mutex<Box<dyn GameParser>>>>>,
    publisher: Arc<dyn EventPublisher>,
    no_session_cooldown: Cooldown,
    stats: PipelineStats,
    log: logging::Logger,
}

impl Pipeline {
    pub fn new(
        auth: Arc<Authenticator>,
        servers: Arc<dyn ServerStore>,
        factory: ParserFactory,
        publisher: Arc<dyn EventPublisher>,
        warn_cooldown: Duration,
        log: &logging::Logger,
    ) -> Pipeline {
        Pipeline {
            auth,
            servers,
            factory,
            parsers: Mutex::new(HashMap::new()),
            publisher,
            no_session_cooldown: Cooldown::new(warn_cooldown),
            stats: PipelineStats::default(),
            log: log.new(logging::o!()),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    /// Processes one decoded datagram end to end.
    pub fn handle_datagram(&self, datagram: &Datagram, now: Instant) {
        PipelineStats::bump(&self.stats.datagrams);

        match classify::classify(&datagram.line) {
            Classified::Beacon { token, game_port } => {
                PipelineStats::bump(&self.stats.beacons);

                if let Err(err) = self.auth.handle_beacon(&token, game_port, datagram.source, now) {
                    PipelineStats::bump(&self.stats.store_errors);

                    logging::error!(self.log, "store failure during beacon handling";
                                    "context" => "handle_datagram",
                                    "source" => %datagram.source,
                                    "error" => ?err);
                }
            }
            Classified::LogLine(line) => self.handle_log_line(&line, datagram.source, now),
            Classified::Rejected(reason) => {
                PipelineStats::bump(&self.stats.rejected_beacons);

                logging::debug!(self.log, "malformed beacon dropped";
                                "context" => "handle_datagram",
                                "source" => %datagram.source,
                                "reason" => ?reason);
            }
        }
    }

    fn handle_log_line(&self, line: &str, source: SocketAddr, now: Instant) {
        let server_id = match self.auth.lookup_source(source, now) {
            Some(server_id) => server_id,
            None => {
                PipelineStats::bump(&self.stats.dropped_no_session);

                if self.no_session_cooldown.permit(&source.ip().to_string(), now) {
                    logging::warn!(self.log, "log line from source without a beacon";
                                   "context" => "handle_log_line",
                                   "source" => %source);
                }

                return;
            }
        };

        let slot = match self.parser_slot(server_id) {
            Ok(Some(slot)) => slot,
            Ok(None) => {
                logging::warn!(self.log, "authenticated source resolves to unknown server";
                               "context" => "handle_log_line",
                               "server_id" => server_id);

                return;
            }
            Err(err) => {
                PipelineStats::bump(&self.stats.store_errors);

                logging::error!(self.log, "store failure resolving server game";
                                "context" => "handle_log_line",
                                "server_id" => server_id,
                                "error" => ?err);

                return;
            }
        };

        // Striped per-server lock keeps the cross-line state deterministic
        // when two sources map onto one server
        let result = slot.lock().expect("Parser slot poisoned").parse_line(line);

        match result {
            Ok(Some(event)) => match self.publisher.publish(&event) {
                Ok(()) => PipelineStats::bump(&self.stats.events_published),
                Err(err) => {
                    PipelineStats::bump(&self.stats.publish_errors);

                    logging::error!(self.log, "event publication failed";
                                    "context" => "handle_log_line",
                                    "server_id" => server_id,
                                    "event_type" => event.payload.kind(),
                                    "error" => ?err);
                }
            },
            Ok(None) => (),
            // The parser already warned with the line excerpt
            Err(_) => PipelineStats::bump(&self.stats.parse_errors),
        }
    }

    fn parser_slot(&self, server_id: ServerId) -> StoreResult<Option<Arc<Mutex<Box<dyn GameParser>>>>> {
        {
            let parsers = self.parsers.lock().expect("Parser cache poisoned");

            if let Some(slot) = parsers.get(&server_id) {
                return Ok(Some(slot.clone()));
            }
        }

        let game = match self.servers.find_by_id(server_id)? {
            Some(server) => server.game,
            None => return Ok(None),
        };

        let slot = Arc::new(Mutex::new(self.factory.create(&game, server_id)));

        let mut parsers = self.parsers.lock().expect("Parser cache poisoned");

        Ok(Some(parsers.entry(server_id).or_insert(slot).clone()))
    }
}

fn route(source: &SocketAddr, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);

    (hasher.finish() % workers as u64) as usize
}

/// Running ingress: one receive loop fanning datagrams onto per-worker
/// mailboxes by source hash, so a fixed source is always processed in
/// arrival order and a beacon completes before the next line from that
/// source is looked up.
pub struct IngressHandle {
    stop: Arc<AtomicBool>,
    receiver_thread: Option<thread::JoinHandle<()>>,
    worker_threads: Vec<thread::JoinHandle<()>>,
    drained: Arc<(Mutex<usize>, Condvar)>,
    grace: Duration,
    local_addr: SocketAddr,
    log: logging::Logger,
}

impl IngressHandle {
    /// Starts the receive loop and worker pool.
    pub fn start(
        address: SocketAddr,
        workers: usize,
        grace: Duration,
        pipeline: Arc<Pipeline>,
        log: &logging::Logger,
    ) -> io::Result<IngressHandle> {
        let mut receiver = Receiver::bind(address, log)?;
        let local_addr = receiver.local_addr()?;

        let worker_count = workers.max(1);
        let stop = Arc::new(AtomicBool::new(false));
        let drained = Arc::new((Mutex::new(worker_count), Condvar::new()));

        let mut senders = Vec::with_capacity(worker_count);
        let mut worker_threads = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let (sender, mailbox) = sync_channel::<Datagram>(WORKER_QUEUE_DEPTH);
            senders.push(sender);

            let pipeline = pipeline.clone();
            let drained = drained.clone();
            let worker_log = log.new(logging::o!("worker" => index));

            let handle = thread::Builder::new()
                .name(format!("ingress-worker-{}", index))
                .spawn(move || {
                    for datagram in mailbox.iter() {
                        pipeline.handle_datagram(&datagram, Instant::now());
                    }

                    logging::debug!(worker_log, "worker drained"; "context" => "worker");

                    let (count, condvar) = &*drained;
                    *count.lock().expect("Drain latch poisoned") -= 1;
                    condvar.notify_all();
                })?;

            worker_threads.push(handle);
        }

        let stop_flag = stop.clone();
        let receive_log = log.new(logging::o!());

        let receiver_thread = thread::Builder::new().name("ingress-recv".into()).spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                let result = receiver.poll_once(POLL_INTERVAL, |datagram| {
                    let index = route(&datagram.source, worker_count);

                    // A full mailbox blocks here: backpressure, not loss
                    if senders[index].send(datagram).is_err() {
                        logging::error!(receive_log, "worker mailbox disconnected";
                                        "context" => "receive_loop",
                                        "worker" => index);
                    }
                });

                if let Err(err) = result {
                    logging::error!(receive_log, "receive failure, stopping ingress";
                                    "context" => "receive_loop",
                                    "error" => ?err);
                    break;
                }
            }

            // Senders drop here, disconnecting the worker mailboxes
        })?;

        logging::info!(log, "ingress started";
                       "context" => "start",
                       "address" => %local_addr,
                       "workers" => worker_count);

        Ok(IngressHandle {
            stop,
            receiver_thread: Some(receiver_thread),
            worker_threads,
            drained,
            grace,
            local_addr,
            log: log.new(logging::o!()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the receiver first, then gives in-flight workers the grace
    /// period to drain before detaching them.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);

        if let Some(receiver) = self.receiver_thread.take() {
            drop(receiver.join());
        }

        let deadline = Instant::now() + self.grace;
        let (count, condvar) = &*self.drained;
        let mut remaining = count.lock().expect("Drain latch poisoned");

        while *remaining > 0 {
            let timeout = deadline.saturating_duration_since(Instant::now());

            if timeout == Duration::from_secs(0) {
                break;
            }

            let (guard, _) = condvar
                .wait_timeout(remaining, timeout)
                .expect("Drain latch poisoned");

            remaining = guard;
        }

        let drained = *remaining == 0;
        drop(remaining);

        if drained {
            for handle in self.worker_threads.drain(..) {
                drop(handle.join());
            }

            logging::info!(self.log, "ingress stopped"; "context" => "stop");
        } else {
            logging::warn!(self.log, "workers still draining past the grace period";
                           "context" => "stop",
                           "grace_ms" => self.grace.as_millis() as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthSettings;
    use crate::contract::ServerRecord;
    use crate::event::Payload;
    use crate::memory::{MemoryServerStore, MemoryTokenStore, RecordingPublisher, SequentialIdent};
    use crate::state::StateManager;
    use crate::token::{self, ServerToken};
    use crate::TokenId;
    use chrono::Utc;

    const RAW_TOKEN: &str = "hlxn_testtoken12345678901234567890123456789012";

    struct Fixture {
        pipeline: Arc<Pipeline>,
        tokens: Arc<MemoryTokenStore>,
        servers: Arc<MemoryServerStore>,
        publisher: Arc<RecordingPublisher>,
    }

    fn make_token_record(id: TokenId) -> ServerToken {
        ServerToken {
            id,
            token_hash: token::hash_token(RAW_TOKEN),
            token_prefix: token::display_prefix(RAW_TOKEN),
            name: "test server".into(),
            encrypted_rcon_password: "sealed".into(),
            game: "cstrike".into(),
            created_at: Utc::now(),
            expires_at: None,
            revoked_at: None,
            last_used_at: None,
        }
    }

    fn make_fixture() -> Fixture {
        let log = logging::discard();
        let tokens = Arc::new(MemoryTokenStore::new());
        let servers = Arc::new(MemoryServerStore::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let idents: Arc<SequentialIdent> = Arc::new(SequentialIdent::new());

        let repo = crate::token::TokenRepository::new(
            tokens.clone(),
            Duration::from_millis(300_000),
            &log,
        );
        let limiter = crate::limiter::RateLimiter::new(
            10,
            Duration::from_millis(60_000),
            Duration::from_millis(60_000),
        );

        let auth = Arc::new(Authenticator::new(
            repo,
            servers.clone(),
            limiter,
            publisher.clone(),
            idents.clone(),
            AuthSettings::default(),
            &log,
        ));

        let factory = ParserFactory::new(Arc::new(StateManager::new()), idents, &log);

        let pipeline = Arc::new(Pipeline::new(
            auth,
            servers.clone(),
            factory,
            publisher.clone(),
            Duration::from_millis(300_000),
            &log,
        ));

        Fixture {
            pipeline,
            tokens,
            servers,
            publisher,
        }
    }

    fn datagram(line: &str, source: &str) -> Datagram {
        Datagram {
            line: line.into(),
            source: source.parse().unwrap(),
        }
    }

    fn beacon_line() -> String {
        format!("L 02/22/2026 - 09:48:09: HLXTOKEN:{}:27015", RAW_TOKEN)
    }

    const KILL_LINE: &str = r#""Player1<2><STEAM_0:1:12345><CT>" killed "Player2<3><STEAM_0:1:67890><TERRORIST>" with "ak47" (headshot)"#;

    // Scenario: beacon authenticates, the following kill line from the same
    // source parses and publishes under the resolved server id
    #[test]
    fn test_beacon_then_kill() {
        let fixture = make_fixture();
        fixture.tokens.insert(make_token_record(1));
        fixture.servers.seed(ServerRecord {
            server_id: 42,
            address: "192.168.1.100".into(),
            port: 27015,
            game: "cstrike".into(),
            auth_token_id: 1,
            rcon_password: "sealed".into(),
            name: "192.168.1.100:27015".into(),
        });

        let now = Instant::now();
        fixture
            .pipeline
            .handle_datagram(&datagram(&beacon_line(), "192.168.1.100:54321"), now);
        fixture
            .pipeline
            .handle_datagram(&datagram(KILL_LINE, "192.168.1.100:54321"), now);

        let events = fixture.publisher.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload.kind(), "SERVER_AUTHENTICATED");
        assert_eq!(events[0].server_id, 42);

        assert_eq!(events[1].server_id, 42);
        match &events[1].payload {
            Payload::PlayerKill(data) => {
                assert_eq!(data.killer_slot, 2);
                assert_eq!(data.victim_slot, 3);
                assert_eq!(data.weapon, "ak47");
                assert!(data.headshot);
                assert_eq!(data.killer_team, "CT");
                assert_eq!(data.victim_team, "TERRORIST");
            }
            other => panic!("Unexpected payload {:?}", other),
        }

        let stats = fixture.pipeline.stats();
        assert_eq!(stats.datagrams, 2);
        assert_eq!(stats.beacons, 1);
        assert_eq!(stats.events_published, 2);
    }

    // Scenario: map change feeds the round start emitted afterwards
    #[test]
    fn test_map_round_correlation() {
        let fixture = make_fixture();
        fixture.tokens.insert(make_token_record(1));

        let now = Instant::now();
        let source = "192.168.1.100:54321";

        fixture.pipeline.handle_datagram(&datagram(&beacon_line(), source), now);
        fixture
            .pipeline
            .handle_datagram(&datagram("-------- Mapchange to cs_havana --------", source), now);
        fixture
            .pipeline
            .handle_datagram(&datagram(r#"World triggered "Round_Start""#, source), now);

        let events = fixture.publisher.events();
        assert_eq!(events.len(), 3);

        match &events[2].payload {
            Payload::RoundStart(data) => {
                assert_eq!(data.map, "cs_havana");
                assert_eq!(data.round, 1);
            }
            other => panic!("Unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_log_line_without_session_dropped() {
        let fixture = make_fixture();

        fixture
            .pipeline
            .handle_datagram(&datagram(KILL_LINE, "10.0.0.1:1000"), Instant::now());

        assert!(fixture.publisher.events().is_empty());
        assert_eq!(fixture.pipeline.stats().dropped_no_session, 1);
    }

    #[test]
    fn test_session_expires_with_source_cache() {
        let fixture = make_fixture();
        fixture.tokens.insert(make_token_record(1));

        let now = Instant::now();
        let source = "192.168.1.100:54321";

        fixture.pipeline.handle_datagram(&datagram(&beacon_line(), source), now);

        let beyond = now + Duration::from_millis(300_000);
        fixture.pipeline.handle_datagram(&datagram(KILL_LINE, source), beyond);

        // Only the authentication event; the late kill was dropped
        assert_eq!(fixture.publisher.events().len(), 1);
        assert_eq!(fixture.pipeline.stats().dropped_no_session, 1);
    }

    #[test]
    fn test_rejected_beacon_dropped() {
        let fixture = make_fixture();

        fixture
            .pipeline
            .handle_datagram(&datagram("HLXTOKEN:x:99999999", "10.0.0.1:1000"), Instant::now());

        assert!(fixture.publisher.events().is_empty());
        assert_eq!(fixture.pipeline.stats().rejected_beacons, 1);
    }

    #[test]
    fn test_publish_failure_keeps_pipeline_running() {
        let fixture = make_fixture();
        fixture.tokens.insert(make_token_record(1));

        let now = Instant::now();
        let source = "192.168.1.100:54321";

        fixture.pipeline.handle_datagram(&datagram(&beacon_line(), source), now);
        fixture.publisher.set_failing(true);
        fixture.pipeline.handle_datagram(&datagram(KILL_LINE, source), now);
        fixture.publisher.set_failing(false);
        fixture.pipeline.handle_datagram(&datagram(KILL_LINE, source), now);

        let stats = fixture.pipeline.stats();
        assert_eq!(stats.publish_errors, 1);
        assert_eq!(stats.events_published, 2);
    }

    #[test]
    fn test_parse_error_counted() {
        let fixture = make_fixture();
        fixture.tokens.insert(make_token_record(1));

        let now = Instant::now();
        let source = "192.168.1.100:54321";

        fixture.pipeline.handle_datagram(&datagram(&beacon_line(), source), now);
        fixture
            .pipeline
            .handle_datagram(&datagram(r#"garbage killed "half a token"#, source), now);

        assert_eq!(fixture.pipeline.stats().parse_errors, 1);
    }

    #[test]
    fn test_ingress_end_to_end() {
        let fixture = make_fixture();
        fixture.tokens.insert(make_token_record(1));

        let handle = IngressHandle::start(
            "127.0.0.1:0".parse().unwrap(),
            2,
            Duration::from_millis(5_000),
            fixture.pipeline.clone(),
            &logging::discard(),
        )
        .unwrap();

        let target = handle.local_addr();
        let sender = ::std::net::UdpSocket::bind("127.0.0.1:0").unwrap();

        sender.send_to(beacon_line().as_bytes(), &target).unwrap();
        sender.send_to(KILL_LINE.as_bytes(), &target).unwrap();

        // The beacon must complete before the kill line is looked up, so two
        // events are expected once the pipeline has drained
        let mut events = Vec::new();
        for _ in 0..100 {
            events = fixture.publisher.events();

            if events.len() >= 2 {
                break;
            }

            thread::sleep(Duration::from_millis(50));
        }

        handle.stop();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload.kind(), "SERVER_AUTHENTICATED");
        assert_eq!(events[1].payload.kind(), "PLAYER_KILL");
    }
}
