use clap::Parser;
use client::driver::{ScriptedDriver, ScriptedVehicle};
use client::network::{join, ClientConfig, ClientError, LobbyCommand, SessionOutcome};
use log::{info, warn};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 'a', long, default_value = "127.0.0.1")]
    address: String,

    /// Server port
    #[arg(short, long, default_value = "7777")]
    port: u16,

    /// Display name shown in the lobby
    #[arg(short, long, default_value = "Player")]
    name: String,

    /// Session token shared by the host (prompted when omitted)
    #[arg(short, long)]
    token: Option<String>,

    /// Vehicle to race with
    #[arg(short, long, default_value = "0")]
    vehicle: u32,

    /// Signal ready as soon as the lobby is joined
    #[arg(long)]
    auto_ready: bool,

    /// Lap time of the scripted driver, in seconds
    #[arg(long, default_value = "20")]
    demo_lap_secs: f32,
}

async fn prompt(stdin: &mut Lines<BufReader<Stdin>>, label: &str) -> std::io::Result<String> {
    println!("{}", label);
    Ok(stdin.next_line().await?.unwrap_or_default().trim().to_string())
}

fn parse_command(line: &str) -> Option<LobbyCommand> {
    let mut words = line.split_whitespace();
    let command = match (words.next()?, words.next()) {
        ("ready", None) => LobbyCommand::Ready,
        ("vehicle", Some(n)) => LobbyCommand::SelectVehicle(n.parse().ok()?),
        ("kick", Some(n)) => LobbyCommand::Kick(n.parse().ok()?),
        ("lobby", None) => LobbyCommand::ReturnToLobby,
        ("quit", None) | ("leave", None) => LobbyCommand::Leave,
        _ => return None,
    };
    Some(command)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let mut token = match args.token {
        Some(token) => token,
        None => prompt(&mut stdin, "Session token:").await?,
    };

    let mut client = loop {
        let config = ClientConfig {
            address: format!("{}:{}", args.address, args.port),
            name: args.name.clone(),
            token: token.clone(),
            vehicle: args.vehicle,
            auto_ready: args.auto_ready,
            ..ClientConfig::default()
        };

        match join(config).await {
            Ok(client) => break client,
            Err(ClientError::Rejected { code, message }) => {
                warn!("Join rejected ({:?}): {}", code, message);
                token = prompt(&mut stdin, "Rejected, enter a new token:").await?;
            }
            Err(e) => return Err(e.into()),
        }
    };

    info!("Commands: ready, vehicle N, kick ID, lobby, quit");

    let (commands_tx, commands) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok(Some(line)) = stdin.next_line().await {
            match parse_command(&line) {
                Some(command) => {
                    if commands_tx.send(command).is_err() {
                        break;
                    }
                }
                None => warn!("Unknown command '{}'", line.trim()),
            }
        }
    });

    let (events_tx, events) = mpsc::unbounded_channel();
    let driver = ScriptedDriver::new(Duration::from_secs_f32(args.demo_lap_secs.max(0.1)));
    tokio::spawn(driver.run(client.subscribe(), events_tx));

    let mut vehicle = ScriptedVehicle::default();
    match client.run(events, commands, &mut vehicle).await {
        SessionOutcome::Disconnected { reason } => {
            println!("Back to the pre-race screen: {}", reason);
        }
        SessionOutcome::Left => println!("Left the session"),
    }

    Ok(())
}
