use chrono::Utc;
use clap::{App, Arg};
use hashbrown::HashMap;
use ingresscore::token::{self, ServerToken, TOKEN_LEN, TOKEN_PREFIX};
use rand::distributions::Uniform;
use rand::prelude::*;
use std::fs;
use std::io::{LineWriter, Write};

const KEY_LEN: usize = TOKEN_LEN - TOKEN_PREFIX.len();

fn charset() -> Vec<char> {
    ('A'..='Z')
        .chain('a'..='z')
        .chain('0'..='9')
        .chain("_-".chars())
        .collect()
}

fn make_raw_token(rng: &mut ThreadRng, chars: &[char]) -> String {
    let suffix: String = rng
        .sample_iter(&Uniform::new(0, chars.len()))
        .take(KEY_LEN)
        .map(|sample| chars[sample])
        .collect();

    format!("{}{}", TOKEN_PREFIX, suffix)
}

fn main() {
    let matches = App::new("Token Generator")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Mints server tokens into the token file.")
        .arg(
            Arg::with_name("TOKEN_FILE")
                .help("Path to the server token file")
                .required(true),
        )
        .arg(
            Arg::with_name("NTOKENS")
                .help("Number of new tokens to generate")
                .required(true),
        )
        .arg(
            Arg::with_name("GAME")
                .help("Game code for the new tokens (default cstrike)")
                .required(false),
        )
        .arg(
            Arg::with_name("KEY_FILE")
                .help("Newly minted raw tokens will be written in this file")
                .required(false),
        )
        .get_matches();

    let token_file_path = matches.value_of("TOKEN_FILE").unwrap();
    let token_count: usize = matches
        .value_of("NTOKENS")
        .unwrap()
        .parse()
        .expect("Token count must be a valid integer");
    let game = matches.value_of("GAME").unwrap_or("cstrike");

    let token_data = match fs::read_to_string(token_file_path) {
        Ok(content) => {
            println!("Read in {} bytes of data", content.len());
            content
        }
        Err(err) => {
            println!("Failed opening token file: {} (assuming empty input)", err);
            "{}".into()
        }
    };

    let mut token_data: HashMap<String, ServerToken> = serde_json::from_str(&token_data).unwrap();
    let chars = charset();
    let mut rng = thread_rng();
    let mut minted = Vec::new();

    let id_base = token_data.values().map(|record| record.id).max().unwrap_or(0);

    println!("Current token file contains {} entries", token_data.len());
    println!("Generating {} tokens for game {}", token_count, game);

    for offset in 0..token_count as u32 {
        let raw = make_raw_token(&mut rng, &chars);
        let hash = token::hash_token(&raw);

        assert!(token::format_valid(&raw), "Minted a malformed token");

        let record = ServerToken {
            id: id_base + offset + 1,
            token_hash: hash.clone(),
            token_prefix: token::display_prefix(&raw),
            name: format!("server token {}", id_base + offset + 1),
            encrypted_rcon_password: String::new(),
            game: game.into(),
            created_at: Utc::now(),
            expires_at: None,
            revoked_at: None,
            last_used_at: None,
        };

        minted.push(raw);

        token_data
            .entry(hash)
            .and_modify(|_| panic!("Token hash collision! What are the odds?"))
            .or_insert(record);
    }

    fs::write(
        token_file_path,
        serde_json::to_string_pretty(&token_data).unwrap(),
    )
    .unwrap();

    match matches.value_of("KEY_FILE") {
        Some(key_file_path) => {
            println!("Writing raw tokens to `{}`", key_file_path);

            let key_file = fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(key_file_path)
                .unwrap();

            let mut key_file = LineWriter::new(key_file);

            for raw in minted {
                key_file.write_all(raw.as_bytes()).unwrap();
                key_file.write_all("\n".as_bytes()).unwrap();
            }
        }
        None => {
            // The raw token is shown exactly once; only the hash is stored
            for raw in minted {
                println!("{}", raw);
            }
        }
    }
}
