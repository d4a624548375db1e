use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::prelude::*;

use sfchat_session::{Endpoint, Session, SessionHandle, WsConnector, spawn_session};

mod config;
mod presenter;
mod repl;
mod settings;

use crate::config::{FileConfig, SfchatConfig, load_config};
use crate::presenter::{TerminalPresenter, turn_line};
use crate::repl::Command;
use crate::settings::{ClientSettings, SettingsStore};

#[derive(Parser)]
#[command(name = "sfchat")]
#[command(about = "Terminal client for sfchat chat backends")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.sfchat)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (the default)
    Chat(ChatArgs),

    /// Print the saved settings as JSON
    Settings,

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Default)]
struct ChatArgs {
    /// Server host or `host:port`; connects immediately
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides a port given in --host)
    #[arg(short, long)]
    port: Option<u16>,

    /// Connection password
    #[arg(long)]
    password: Option<String>,

    /// User id sent with history requests and messages
    #[arg(short, long)]
    user: Option<String>,

    /// Connect straight to the server instead of through the relay
    #[arg(long)]
    direct: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "sfchat=debug,sfchat_session=debug,warn"
    } else {
        "sfchat=warn,sfchat_session=warn,error"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = SfchatConfig::new(cli.data_dir.clone())?;
    let file_config: FileConfig = load_config(&config.data_dir)
        .extract()
        .with_context(|| format!("Invalid config in {:?}", config.config_toml_path()))?;

    match cli.command {
        None => run_chat(ChatArgs::default(), &config, file_config).await,
        Some(Commands::Chat(args)) => run_chat(args, &config, file_config).await,
        Some(Commands::Settings) => {
            let settings = ClientSettings::load(&config.settings_path());
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Some(Commands::Config) => {
            let text = toml::to_string_pretty(&file_config).context("Failed to render config")?;
            print!("{text}");
            Ok(())
        }
    }
}

/// Endpoint named on the command line, if any.
fn endpoint_from_args(args: &ChatArgs) -> Result<Option<Endpoint>> {
    let Some(host) = args.host.as_deref() else {
        return Ok(None);
    };
    let mut endpoint = Endpoint::parse_address(host)?;
    if args.port.is_some() {
        endpoint.port = args.port;
    }
    Ok(Some(endpoint))
}

async fn run_chat(
    args: ChatArgs,
    config: &SfchatConfig,
    mut file_config: FileConfig,
) -> Result<()> {
    if args.direct {
        file_config.relay.direct = true;
    }

    let store = SettingsStore::open(config.settings_path());
    if args.user.is_some() || args.password.is_some() {
        store.update(|s| {
            if let Some(user) = &args.user {
                s.user_qq = user.trim().to_string();
            }
            if let Some(password) = &args.password {
                s.ws_password = password.clone();
            }
        })?;
    }
    let saved = store.snapshot();
    let explicit = endpoint_from_args(&args)?;

    let session = Session::restored(
        file_config.session_config(Some(saved.user_qq.as_str())),
        &saved.to_persisted(),
    );
    info!(
        user = %session.user_id(),
        mode = %session.mode(),
        "starting session"
    );

    let presenter = TerminalPresenter::new();
    let view = presenter.clone();
    let (handle, actor) = spawn_session(
        session,
        WsConnector,
        Box::new(presenter),
        Box::new(store.clone()),
    );

    match explicit {
        Some(endpoint) => handle.connect(endpoint, saved.ws_password.clone()).await?,
        None if saved.endpoint().is_some() => {
            let _ = handle.resume_after(file_config.startup_connect_delay());
        }
        None => eprintln!("[sfchat: no saved server, use /connect host[:port]]"),
    }
    eprintln!("[sfchat: type /help for commands]");

    let mut attachments: Vec<String> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else { break };

        match repl::parse(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::Help => eprintln!("{}", repl::HELP),
            Command::Unknown(input) => eprintln!("[sfchat: unknown command {input}, try /help]"),
            Command::Connect(address) => connect(&handle, &store, address.as_deref()).await?,
            Command::Disconnect => handle.disconnect().await?,
            Command::Mode => handle.switch_mode().await?,
            Command::Attach(reference) => {
                attachments.push(reference);
                eprintln!("[sfchat: {} attachment(s) queued]", attachments.len());
            }
            Command::Detach => {
                attachments.clear();
                eprintln!("[sfchat: attachments cleared]");
            }
            Command::Clear => {
                let dropped = view.clear_page();
                eprintln!("[sfchat: cleared {dropped} turn(s), use /mode or /connect to reload]");
            }
            Command::History => {
                let transcript = view.transcript();
                let transcript = transcript
                    .lock()
                    .map_err(|_| anyhow::anyhow!("transcript lock poisoned"))?;
                if transcript.is_empty() {
                    eprintln!("[sfchat: transcript is empty]");
                }
                for turn in transcript.turns() {
                    println!("{}", turn_line(turn.origin, &turn.body));
                }
            }
            Command::Status => {
                let status = handle.status().await?;
                let server = status
                    .endpoint
                    .as_ref()
                    .map(Endpoint::server_address)
                    .unwrap_or_else(|| "-".to_string());
                eprintln!(
                    "[sfchat: {} | mode {} | server {} | waiting {} | retrying {}]",
                    status.state,
                    status.mode.as_str().to_uppercase(),
                    server,
                    status.pending,
                    status.reconnecting
                );
            }
            Command::Chat(body) => {
                let media = std::mem::take(&mut attachments);
                handle.send_chat(body, media).await?;
            }
        }
    }

    debug!("shutting down session");
    handle.shutdown().await?;
    actor.await.context("Session task panicked")?;
    Ok(())
}

/// `/connect`: a new address, or the one the session already knows.
async fn connect(
    handle: &SessionHandle,
    store: &SettingsStore,
    address: Option<&str>,
) -> Result<()> {
    let credential = store.snapshot().ws_password;
    let endpoint = match address {
        Some(address) => match Endpoint::parse_address(address) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                eprintln!("[sfchat: invalid server address: {e}]");
                return Ok(());
            }
        },
        // An empty endpoint makes the session report the missing address.
        None => handle
            .status()
            .await?
            .endpoint
            .unwrap_or_else(|| Endpoint::new("", None)),
    };
    handle.connect(endpoint, credential).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "sfchat",
            "--data-dir",
            "/tmp/sf",
            "chat",
            "--host",
            "10.0.0.1:9000",
            "-p",
            "8081",
            "--direct",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/sf")));
        let Some(Commands::Chat(args)) = cli.command else {
            panic!("expected chat");
        };
        assert!(args.direct);
        assert_eq!(
            endpoint_from_args(&args).unwrap(),
            Some(Endpoint::new("10.0.0.1", Some(8081)))
        );
    }

    #[test]
    fn test_no_host_means_no_explicit_endpoint() {
        assert_eq!(endpoint_from_args(&ChatArgs::default()).unwrap(), None);
    }

    #[test]
    fn test_bad_port_in_host_is_an_error() {
        let args = ChatArgs {
            host: Some("10.0.0.1:99999".into()),
            ..Default::default()
        };
        assert!(endpoint_from_args(&args).is_err());
    }
}
