//! Demo client that hosts or joins a room and streams player state.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Start a relay first (`cargo run -p rally-relay`), then:
//!
//! ```text
//! cargo run -p rally-demo -- host --name ada
//! cargo run -p rally-demo -- join 4821 --name bo
//! cargo run -p rally-demo -- local
//! ```

mod player;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use rally_config::{CliArgs, Config, ConfigError};
use rally_net::{
    ConnectionState, MemoryTransport, Message, RelayTransport, SessionConfig, SessionError,
    SessionFacade, SessionState, Transport,
};

use crate::player::{RemoteView, Walker};

#[derive(Parser, Debug)]
#[command(name = "rally-demo", about = "Host or join a Rally room and exchange player state")]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Host a room through the relay and print its code.
    Host(PlayArgs),
    /// Join a room through the relay.
    Join {
        /// Room code shared by the host.
        code: String,
        #[command(flatten)]
        play: PlayArgs,
    },
    /// Run both players in this process over the in-memory transport.
    Local(PlayArgs),
}

#[derive(Args, Debug, Clone)]
struct PlayArgs {
    /// Display name sent to the other player.
    #[arg(long, default_value = "Player")]
    name: String,

    /// Number of ticks to play once connected.
    #[arg(long, default_value_t = 200)]
    ticks: u32,

    /// Milliseconds per tick.
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,

    #[command(flatten)]
    common: CliArgs,
}

impl Mode {
    fn play_args(&self) -> &PlayArgs {
        match self {
            Mode::Host(play) | Mode::Local(play) | Mode::Join { play, .. } => play,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to encode player state: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("session ended before a peer connected")]
    NeverConnected,
}

/// Summary of one player's run.
#[derive(Debug)]
struct Outcome {
    ticks: u32,
    sent: u64,
    remote: RemoteView,
}

/// Resolve the config directory, load the config and apply CLI overrides.
fn load_config(args: &CliArgs) -> Result<(PathBuf, Config), ConfigError> {
    let config_dir = args
        .config
        .clone()
        .or_else(|| Config::default_dir().ok())
        .unwrap_or_else(|| PathBuf::from(".rally"));

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(args);
    config.validate()?;
    Ok((config_dir, config))
}

/// Wait until the facade's session leaves `Connecting`.
async fn wait_for_peer<T: Transport + Clone>(
    facade: &SessionFacade<T>,
) -> Result<(), DemoError> {
    let Some(mut rx) = facade.subscribe() else {
        return Err(DemoError::NeverConnected);
    };
    let settled = rx
        .wait_for(|state| *state != SessionState::Connecting)
        .await
        .map(|state| *state);
    match settled {
        Ok(SessionState::Connected) => Ok(()),
        _ => Err(facade
            .last_error()
            .map(DemoError::Session)
            .unwrap_or(DemoError::NeverConnected)),
    }
}

/// Send our state and fold in the peer's once per tick, like a game loop.
async fn play<T: Transport + Clone>(
    facade: &SessionFacade<T>,
    walker: &mut Walker,
    ticks: u32,
    tick: Duration,
) -> Result<Outcome, DemoError> {
    let mut interval = tokio::time::interval(tick);
    let mut outcome = Outcome {
        ticks: 0,
        sent: 0,
        remote: RemoteView::default(),
    };

    while outcome.ticks < ticks {
        interval.tick().await;
        if facade.status() != ConnectionState::Connected {
            tracing::info!("Peer left after {} ticks", outcome.ticks);
            break;
        }

        if facade.send(Message::json(&walker.state)?) {
            outcome.sent += 1;
        }
        outcome.remote.apply_all(&facade.drain_inbound());
        walker.step();
        outcome.ticks += 1;

        if outcome.ticks % 20 == 0
            && let Some(remote) = &outcome.remote.latest
        {
            tracing::info!(
                "[{}] tick {}: {} at ({:.0}, {:.0}) hp {}",
                walker.state.name,
                outcome.ticks,
                remote.name,
                remote.x,
                remote.y,
                remote.health
            );
        }
    }

    Ok(outcome)
}

fn report(label: &str, outcome: &Outcome) {
    tracing::info!(
        "{label}: {} ticks, {} sent, {} received ({} shots, {} rejected) from {}",
        outcome.ticks,
        outcome.sent,
        outcome.remote.updates,
        outcome.remote.shots,
        outcome.remote.rejected,
        outcome.remote.name().unwrap_or("nobody")
    );
}

fn seed() -> u64 {
    rand::random()
}

async fn host_over<T: Transport + Clone>(
    transport: T,
    config: SessionConfig,
    play_args: &PlayArgs,
) -> Result<(), DemoError> {
    let mut facade = SessionFacade::new(transport, config);
    let code = facade.host_game().await?;
    println!("Room code: {code}");
    tracing::info!("Waiting for a player to join room {code}");

    wait_for_peer(&facade).await?;
    let mut walker = Walker::new(&play_args.name, seed());
    let outcome = play(
        &facade,
        &mut walker,
        play_args.ticks,
        Duration::from_millis(play_args.tick_ms),
    )
    .await?;
    report("host", &outcome);
    facade.disconnect();
    Ok(())
}

async fn join_over<T: Transport + Clone>(
    transport: T,
    config: SessionConfig,
    code: &str,
    play_args: &PlayArgs,
) -> Result<(), DemoError> {
    let mut facade = SessionFacade::new(transport, config);
    facade.try_join_game(code).await?;
    tracing::info!("Joined room {code}");

    let mut walker = Walker::new(&play_args.name, seed());
    let outcome = play(
        &facade,
        &mut walker,
        play_args.ticks,
        Duration::from_millis(play_args.tick_ms),
    )
    .await?;
    report("joiner", &outcome);
    facade.disconnect();
    Ok(())
}

/// Host and join in one process.
async fn local(config: SessionConfig, play_args: &PlayArgs) -> Result<(), DemoError> {
    let net = MemoryTransport::new();
    let mut host = SessionFacade::new(net.clone(), config.clone());
    let mut guest = SessionFacade::new(net, config);

    let code = host.host_game().await?;
    tracing::info!("Local room {code}");
    guest.try_join_game(code.as_str()).await?;
    wait_for_peer(&host).await?;

    let tick = Duration::from_millis(play_args.tick_ms);
    let mut host_walker = Walker::new(&play_args.name, seed());
    let mut guest_walker = Walker::new("Guest", seed());
    let (host_outcome, guest_outcome) = tokio::join!(
        play(&host, &mut host_walker, play_args.ticks, tick),
        play(&guest, &mut guest_walker, play_args.ticks, tick),
    );
    report("host", &host_outcome?);
    report("guest", &guest_outcome?);

    host.disconnect();
    guest.disconnect();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let play_args = cli.mode.play_args().clone();
    let (config_dir, config) = match load_config(&play_args.common) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Invalid settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log_dir = config_dir.join("logs");
    rally_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let session_config = SessionConfig::from(&config.network);
    let result = match &cli.mode {
        Mode::Host(_) => {
            host_over(RelayTransport::from_config(&config), session_config, &play_args).await
        }
        Mode::Join { code, .. } => {
            join_over(RelayTransport::from_config(&config), session_config, code, &play_args).await
        }
        Mode::Local(_) => local(session_config, &play_args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
