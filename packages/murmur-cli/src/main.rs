//! Murmur terminal client.
//!
//! Prompts for host, port, and username, probes reachability, then runs
//! the session: stdin lines go out as sealed chat, inbound events are
//! printed as they arrive. A username collision is non-fatal: the client
//! re-prompts and dials again from scratch. Exit code 0 on a graceful
//! leave or server-initiated close, 1 on startup, connection, or
//! authentication failure.

use std::io::{self, Write as _};

use chrono::{Local, TimeZone};
use color_eyre::eyre::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

use murmur_core::client::{ChatClient, ClientEvent};
use murmur_core::protocol::{valid_username, LEAVE_COMMAND};

/// Default server port, matching the relay.
const DEFAULT_PORT: u16 = 25525;

fn main() -> Result<()> {
    color_eyre::install()?;

    let host = prompt("server host", Some("127.0.0.1"))?;
    let port = loop {
        let raw = prompt("server port", Some(&DEFAULT_PORT.to_string()))?;
        match raw.parse::<u16>() {
            Ok(port) if port != 0 => break port,
            _ => println!("enter a port between 1 and 65535"),
        }
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(host, port))
}

async fn run(host: String, port: u16) -> Result<()> {
    // Fail fast with a clear error before prompting for anything else.
    if let Err(e) = ChatClient::probe(&host, port).await {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let mut username = prompt_username()?;
    loop {
        let (client, events) = match ChatClient::connect(&host, port, &username).await {
            Ok(session) => session,
            Err(e) => {
                eprintln!("connection failed: {e}");
                std::process::exit(1);
            }
        };
        println!("connecting as {username}...");

        match run_session(client, events).await? {
            SessionEnd::Reconnect => {
                println!("that username is unavailable, pick another");
                username = prompt_username()?;
            }
            SessionEnd::Quit(code) => std::process::exit(code),
        }
    }
}

/// How a session ended: dial again with a new username, or exit.
enum SessionEnd {
    Reconnect,
    Quit(i32),
}

/// What the next stdin line means.
#[derive(PartialEq)]
enum InputMode {
    Chat,
    Password,
}

async fn run_session(
    client: ChatClient,
    mut events: UnboundedReceiver<ClientEvent>,
) -> Result<SessionEnd> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut mode = InputMode::Chat;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    return Ok(SessionEnd::Quit(0));
                };
                match event {
                    ClientEvent::KeyEstablished => {}
                    ClientEvent::PasswordRequired => {
                        print!("password: ");
                        io::stdout().flush()?;
                        mode = InputMode::Password;
                    }
                    ClientEvent::Authenticated => {
                        println!("connected. type {LEAVE_COMMAND} to exit.");
                    }
                    ClientEvent::AuthFailed => {
                        eprintln!("authentication failed");
                        return Ok(SessionEnd::Quit(1));
                    }
                    ClientEvent::UsernameRejected { .. } => {
                        client.close().await;
                        return Ok(SessionEnd::Reconnect);
                    }
                    ClientEvent::Message { sender, text, sent_at } => {
                        println!("[{}] {sender}: {text}", clock(sent_at));
                    }
                    ClientEvent::Joined { username, .. } => {
                        println!("* {username} joined");
                    }
                    ClientEvent::Left { username, .. } => {
                        println!("* {username} left");
                    }
                    ClientEvent::Closed { reconnecting: false } => {
                        println!("disconnected by server");
                        return Ok(SessionEnd::Quit(0));
                    }
                    ClientEvent::Closed { reconnecting: true } => {}
                    ClientEvent::Fatal { reason } => {
                        eprintln!("session error: {reason}");
                        return Ok(SessionEnd::Quit(1));
                    }
                }
            }

            line = stdin.next_line() => {
                let Some(line) = line? else {
                    // stdin closed: leave gracefully if the session allows it.
                    let _ = client.leave().await;
                    return Ok(SessionEnd::Quit(0));
                };
                let line = line.trim().to_string();

                if mode == InputMode::Password {
                    mode = InputMode::Chat;
                    if let Err(e) = client.send_password(&line) {
                        eprintln!("could not send password: {e}");
                    }
                    continue;
                }

                if line.is_empty() {
                    continue;
                }
                if line == LEAVE_COMMAND {
                    client.leave().await?;
                    println!("left the chat");
                    return Ok(SessionEnd::Quit(0));
                }
                if let Err(e) = client.send_chat(&line) {
                    println!("(not delivered: {e})");
                }
            }
        }
    }
}

fn clock(epoch_millis: i64) -> String {
    Local
        .timestamp_millis_opt(epoch_millis)
        .single()
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

fn prompt(label: &str, default: Option<&str>) -> io::Result<String> {
    match default {
        Some(default) => print!("{label} [{default}]: "),
        None => print!("{label}: "),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let line = line.trim();
    if line.is_empty() {
        if let Some(default) = default {
            return Ok(default.to_string());
        }
    }
    Ok(line.to_string())
}

fn prompt_username() -> io::Result<String> {
    loop {
        let name = prompt("username (3-20 alphanumeric)", None)?;
        if valid_username(&name) {
            return Ok(name);
        }
        println!("usernames are 3-20 alphanumeric characters");
    }
}
