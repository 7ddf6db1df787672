use clap::{App, Arg};
use std::fs;
use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

fn main() {
    let matches = App::new("Log Replayer")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Replays a game server log file against a running ingress daemon.")
        .arg(
            Arg::with_name("TARGET")
                .help("Ingress address in the form host:port")
                .required(true),
        )
        .arg(
            Arg::with_name("LOG_FILE")
                .help("Path to the log file to replay")
                .required(true),
        )
        .arg(
            Arg::with_name("TOKEN")
                .help("Raw server token; when given, a beacon is sent first")
                .required(false),
        )
        .arg(
            Arg::with_name("GAME_PORT")
                .help("Game port announced in the beacon (default 27015)")
                .required(false),
        )
        .get_matches();

    let target = matches.value_of("TARGET").unwrap();
    let log_file = matches.value_of("LOG_FILE").unwrap();
    let game_port: u16 = matches
        .value_of("GAME_PORT")
        .unwrap_or("27015")
        .parse()
        .expect("Game port must be a valid port number");

    let content = fs::read_to_string(log_file).expect("Error reading log file");
    let socket = UdpSocket::bind("0.0.0.0:0").expect("Error binding replay socket");

    if let Some(raw_token) = matches.value_of("TOKEN") {
        let beacon = format!("HLXTOKEN:{}:{}", raw_token, game_port);

        socket
            .send_to(beacon.as_bytes(), target)
            .expect("Error sending beacon");

        println!("Beacon sent for game port {}", game_port);

        // Give the daemon a moment to populate its source cache
        thread::sleep(Duration::from_millis(100));
    }

    let mut sent = 0usize;

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }

        socket
            .send_to(line.as_bytes(), target)
            .expect("Error sending log line");

        sent += 1;
        thread::sleep(Duration::from_millis(5));
    }

    println!("Replayed {} lines to {}", sent, target);
}
