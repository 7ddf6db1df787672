use clap::{App, Arg};
use ingresscore::actions::ActionProcessor;
use ingresscore::auth::Authenticator;
use ingresscore::config::IngressConfig;
use ingresscore::contract::{EventPublisher, PublishError};
use ingresscore::event::Event;
use ingresscore::memory::{
    JsonLinePublisher, MemoryActionCatalog, MemoryEventLog, MemoryMatchService,
    MemoryPlayerService, MemoryServerStore, MemoryTokenStore,
};
use ingresscore::parser::ParserFactory;
use ingresscore::pipeline::{IngressHandle, Pipeline};
use ingresscore::state::StateManager;
use ingresscore::token::TokenRepository;
use quench::ident::RandomIdent;
use quench::logging;
use std::io::{self, BufRead};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Publishes every event as one JSON line on stdout and hands the action
/// events to the reward worker. The blocking hand-off applies backpressure
/// instead of losing rewards.
struct TeePublisher {
    json: JsonLinePublisher<io::Stdout>,
    actions: SyncSender<Event>,
}

impl EventPublisher for TeePublisher {
    fn publish(&self, event: &Event) -> Result<(), PublishError> {
        self.json.publish(event)?;

        if event.payload.is_action() && self.actions.send(event.clone()).is_err() {
            return Err(PublishError::Closed);
        }

        Ok(())
    }
}

pub fn main() {
    let matches = App::new("Ingress Daemon")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Runs the game telemetry ingress daemon.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the config file")
                .required(true),
        )
        .arg(
            Arg::with_name("TOKEN_FILE")
                .help("Path to the server token file")
                .required(true),
        )
        .arg(
            Arg::with_name("ACTION_FILE")
                .help("Path to the action definition file")
                .required(false),
        )
        .get_matches();

    let config = IngressConfig::load(matches.value_of("CONFIG_FILE").unwrap());
    let log = logging::init();

    let tokens = Arc::new(
        MemoryTokenStore::load(matches.value_of("TOKEN_FILE").unwrap())
            .expect("Error loading server token file"),
    );

    let catalog = Arc::new(match matches.value_of("ACTION_FILE") {
        Some(path) => MemoryActionCatalog::load(path).expect("Error loading action definition file"),
        None => MemoryActionCatalog::new(),
    });

    let servers = Arc::new(MemoryServerStore::new());
    let players = Arc::new(MemoryPlayerService::new());
    let match_service = Arc::new(MemoryMatchService::new());
    let event_log = Arc::new(MemoryEventLog::new());

    let (action_sender, action_mailbox) = sync_channel::<Event>(1024);

    let publisher = Arc::new(TeePublisher {
        json: JsonLinePublisher::new(io::stdout()),
        actions: action_sender,
    });

    let repository = TokenRepository::new(tokens, config.debounce(), &log);

    let auth = Arc::new(Authenticator::new(
        repository,
        servers.clone(),
        config.make_limiter(),
        publisher.clone(),
        Arc::new(RandomIdent),
        config.auth_settings(),
        &log,
    ));

    let factory = ParserFactory::new(Arc::new(StateManager::new()), Arc::new(RandomIdent), &log);

    let pipeline = Arc::new(Pipeline::new(
        auth,
        servers.clone(),
        factory,
        publisher,
        config.warn_cooldown(),
        &log,
    ));

    let processor = ActionProcessor::new(
        catalog,
        servers,
        players,
        match_service,
        event_log,
        None,
        None,
        config.action_settings(),
        &log,
    );

    let action_log = log.new(logging::o!());
    let action_worker = thread::spawn(move || {
        for event in action_mailbox.iter() {
            if let Err(err) = processor.process(&event, Instant::now()) {
                logging::error!(action_log, "action processing failed";
                                "context" => "action_worker",
                                "event_id" => &event.event_id,
                                "error" => ?err);
            }
        }
    });

    let address = config.bind_addr().expect("Invalid ingress bind address");

    let handle = IngressHandle::start(
        address,
        config.ingress.workers,
        config.grace(),
        pipeline.clone(),
        &log,
    )
    .expect("Error starting ingress");

    logging::info!(log, "daemon running, close stdin or type quit to stop";
                   "context" => "main",
                   "address" => %handle.local_addr());

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(ref command) if command.trim() == "quit" => break,
            Ok(_) => (),
            Err(_) => break,
        }
    }

    handle.stop();

    let stats = pipeline.stats();
    logging::info!(log, "ingress statistics";
                   "context" => "main",
                   "datagrams" => stats.datagrams,
                   "beacons" => stats.beacons,
                   "events_published" => stats.events_published,
                   "parse_errors" => stats.parse_errors,
                   "dropped_no_session" => stats.dropped_no_session);

    // The action worker exits once the last publisher reference drops
    drop(pipeline);
    drop(action_worker.join());
}
