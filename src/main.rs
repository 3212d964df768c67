use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tencord::api::{ChannelId, ChatApi, Client, OutgoingMessage};
use tencord::app::App;
use tencord::auth;
use tencord::commands::Command;
use tencord::config::{non_empty, Config};
use tencord::directory;
use tencord::error::{Result, TencordError};
use tencord::screen::TerminalScreen;
use tencord::session::Session;

#[derive(Parser)]
#[command(name = "tencord", version, about = "Terminal client for Discord-style chat")]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Token to use instead of the configured or cached one
    #[arg(short, long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config to ~/.tencord
    Init {
        /// Interactive setup with prompts
        #[arg(short, long)]
        interactive: bool,
    },
    /// Open the live chat view
    Chat {
        /// Channel to open on start
        #[arg(short, long)]
        channel: Option<String>,
        /// Download and preview attachments
        #[arg(short, long)]
        attach: bool,
    },
    /// Send one message and exit
    Send {
        #[arg(short, long)]
        channel: String,
        /// The message text to send
        text: String,
    },
    /// List guild text channels
    Channels,
    /// List direct message channels
    Friends,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Chat owns the terminal, so its logs go to a file only.
    init_tracing(matches!(&cli.command, Commands::Chat { .. }))?;

    let token = cli.token.as_deref();
    match cli.command {
        Commands::Init { interactive } => {
            if interactive {
                cmd_init_interactive()?;
            } else {
                cmd_init()?;
            }
        }
        Commands::Chat { channel, attach } => cmd_chat(&cli.config, token, channel, attach).await?,
        Commands::Send { channel, text } => cmd_send(&cli.config, token, &channel, &text).await?,
        Commands::Channels => cmd_channels(&cli.config, token).await?,
        Commands::Friends => cmd_friends(&cli.config, token).await?,
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(&Config::default_path()),
    }
}

async fn connect(config: &Config, token: Option<&str>) -> Result<Client> {
    let (token, source) = auth::resolve_token(token, config, &Config::token_cache_path()).await?;
    info!("Using token from {source:?}");
    Client::new(&config.api, &token)
}

fn init_tracing(to_file: bool) -> std::result::Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into());

    if to_file {
        let _ = std::fs::create_dir_all(Config::home_dir());
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(Config::log_file_path())?;

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

/// Forward stdin lines from a plain thread. A blocking read cannot be
/// cancelled, and the runtime must not wait on it at exit.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_init_interactive() -> Result<()> {
    use inquire::{Confirm, Select, Text};

    println!("Welcome to tencord setup!\n");

    let methods = vec!["token", "email and password"];
    let method = Select::new("Sign in with:", methods)
        .prompt()
        .map_err(|e| TencordError::Config(format!("Prompt cancelled: {e}")))?;

    let auth_section = if method == "token" {
        let token = Text::new("Token:")
            .with_default("${TENCORD_TOKEN}")
            .with_help_message("Use ${VAR_NAME} to reference an env variable")
            .prompt()
            .map_err(|e| TencordError::Config(format!("Prompt cancelled: {e}")))?;
        format!("token = \"{token}\"")
    } else {
        let email = Text::new("Email:")
            .prompt()
            .map_err(|e| TencordError::Config(format!("Prompt cancelled: {e}")))?;
        let password = Text::new("Password:")
            .with_default("${TENCORD_PASSWORD}")
            .with_help_message("Use ${VAR_NAME} to keep the password out of the file")
            .prompt()
            .map_err(|e| TencordError::Config(format!("Prompt cancelled: {e}")))?;
        format!("email = \"{email}\"\npassword = \"{password}\"")
    };

    let channel = Text::new("Channel to open on start (leave empty to pick later):")
        .with_default("")
        .prompt()
        .map_err(|e| TencordError::Config(format!("Prompt cancelled: {e}")))?;
    let channel_line = if channel.trim().is_empty() {
        "# channel = \"123456789012345678\"".to_string()
    } else {
        format!("channel = \"{}\"", channel.trim())
    };

    let download = Confirm::new("Download and preview attachments?")
        .with_default(false)
        .prompt()
        .map_err(|e| TencordError::Config(format!("Prompt cancelled: {e}")))?;
    let preview_line = if download {
        let command = Text::new("Preview command:")
            .with_default("chafa --size=50x50 --animate=off")
            .with_help_message("The file path is appended as the last argument")
            .prompt()
            .map_err(|e| TencordError::Config(format!("Prompt cancelled: {e}")))?;
        let args: Vec<String> = command
            .split_whitespace()
            .map(|a| format!("\"{a}\""))
            .collect();
        format!("preview_command = [{}]", args.join(", "))
    } else {
        "# preview_command = [\"chafa\", \"--size=50x50\", \"--animate=off\"]".to_string()
    };

    let config_content = format!(
        r#"[api]
base_url = "https://discord.com/api/v9"
timeout_secs = 5

[auth]
{auth_section}
token_ttl_secs = 3600

[poll]
interval_ms = 3000
{channel_line}

[attachments]
download = {download}
{preview_line}
"#
    );

    let config_path = Config::default_path();
    std::fs::create_dir_all(Config::home_dir())?;
    if config_path.exists() {
        let overwrite = Confirm::new("Config already exists. Overwrite?")
            .with_default(false)
            .prompt()
            .map_err(|e| TencordError::Config(format!("Prompt cancelled: {e}")))?;
        if !overwrite {
            println!("Kept existing config.");
            return Ok(());
        }
    }

    std::fs::write(&config_path, &config_content)?;
    println!("Created config at {}", config_path.display());
    println!("Run `tencord chat` to start chatting.");
    Ok(())
}

fn cmd_init() -> Result<()> {
    let config_path = Config::default_path();
    std::fs::create_dir_all(Config::home_dir())?;

    if !config_path.exists() {
        std::fs::write(&config_path, Config::default_toml())?;
        println!("Created config at {}", config_path.display());
    } else {
        println!("Config already exists at {}", config_path.display());
    }
    Ok(())
}

async fn cmd_chat(
    config_path: &Option<PathBuf>,
    token: Option<&str>,
    channel: Option<String>,
    attach: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if attach {
        config.attachments.download = true;
    }

    let api: Arc<dyn ChatApi> = Arc::new(connect(&config, token).await?);
    let screen = Arc::new(TerminalScreen::new(config.attachments.preview_command.clone()));
    let session = Arc::new(Session::new(api, screen, &config)?);
    let mut app = App::new(session);

    app.execute(Command::Welcome).await;
    let start = channel.or_else(|| non_empty(&config.poll.channel).map(str::to_string));
    if let Some(channel) = start {
        app.execute(Command::Switch(ChannelId::new(channel))).await;
    }

    let mut lines = spawn_stdin_reader();
    app.read_loop(&mut lines, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    })
    .await;
    Ok(())
}

async fn cmd_send(
    config_path: &Option<PathBuf>,
    token: Option<&str>,
    channel: &str,
    text: &str,
) -> Result<()> {
    let config = load_config(config_path)?;
    let client = connect(&config, token).await?;
    let sent = client
        .send_message(&ChannelId::new(channel), &OutgoingMessage::text(text))
        .await?;
    println!("Sent message {}", sent.id);
    Ok(())
}

async fn cmd_channels(config_path: &Option<PathBuf>, token: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let client = connect(&config, token).await?;
    let listing = directory::guild_channels(&client).await?;
    print!("{}", listing.render());
    Ok(())
}

async fn cmd_friends(config_path: &Option<PathBuf>, token: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let client = connect(&config, token).await?;
    let listing = directory::friends(&client).await?;
    print!("{}", listing.render());
    Ok(())
}
