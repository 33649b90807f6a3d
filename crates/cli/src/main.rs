use clap::{Parser, Subcommand};
use orty::config::{load_config, FileConfigStore, ServerConfig};
use orty::transport::{HttpTransport, Transport};
use orty::voice::ProcessVoiceOutput;
use orty::{Mode, Session, SessionBuilder, SessionHandle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "orty")]
#[command(about = "Orty thin client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: ORTY_CONFIG_PATH or ~/.orty/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Save the server URL and secret, or show the current settings when neither is given.
    Config {
        /// Config file path (default: ORTY_CONFIG_PATH or ~/.orty/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Assistant server URL, e.g. http://192.168.1.20:8080
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,

        /// Shared secret sent with every request.
        #[arg(long, value_name = "SECRET")]
        secret: Option<String>,
    },

    /// Check that the assistant server is reachable.
    Health {
        /// Config file path (default: ORTY_CONFIG_PATH or ~/.orty/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Send one message and print the reply.
    Ask {
        /// Config file path (default: ORTY_CONFIG_PATH or ~/.orty/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// chat, task, reminder, alarm, or timer
        #[arg(long, short, default_value = "chat")]
        mode: Mode,

        /// Message text.
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Talk to the assistant (interactive). Type /help for local commands.
    Chat {
        /// Config file path (default: ORTY_CONFIG_PATH or ~/.orty/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Starting mode: chat, task, reminder, alarm, or timer
        #[arg(long, short, default_value = "chat")]
        mode: Mode,

        /// Read replies aloud with this program, e.g. "espeak -s 160".
        #[arg(long, value_name = "PROGRAM")]
        speak_with: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("orty {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Config {
            config,
            base_url,
            secret,
        }) => run_config(config, base_url, secret).await,
        Some(Commands::Health { config }) => run_health(config).await,
        Some(Commands::Ask { config, mode, text }) => run_ask(config, mode, text.join(" ")).await,
        Some(Commands::Chat {
            config,
            mode,
            speak_with,
        }) => run_chat(config, mode, speak_with).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(orty::config::default_config_path);
    let dir = orty::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

/// Config store, transport, and a session wired together for one command.
struct Client {
    store: Arc<FileConfigStore>,
    transport: Arc<HttpTransport>,
    session: SessionHandle,
}

fn open_client(config_path: Option<PathBuf>, speak_with: Option<&str>) -> anyhow::Result<Client> {
    let (config, path) = load_config(config_path)?;
    let store = Arc::new(FileConfigStore::open(Some(path))?);
    let transport = Arc::new(HttpTransport::new(Duration::from_secs(
        config.transport.timeout_secs,
    )));

    let mut builder = SessionBuilder::new(transport.clone(), store.clone());
    if let Some(output) = speak_with.and_then(ProcessVoiceOutput::from_command_line) {
        log::info!("speaking replies with {}", output.program());
        builder = builder.voice_output(Arc::new(output));
    }
    let session = builder.spawn();
    Ok(Client {
        store,
        transport,
        session,
    })
}

async fn run_config(
    config_path: Option<PathBuf>,
    base_url: Option<String>,
    secret: Option<String>,
) -> anyhow::Result<()> {
    let client = open_client(config_path, None)?;

    if base_url.is_none() && secret.is_none() {
        print_settings(&client.store);
        return Ok(());
    }

    // Fill the missing half from the file, not the env-resolved value.
    let (stored, path) = load_config(Some(client.store.path().to_path_buf()))?;
    let base_url = base_url.unwrap_or(stored.server.base_url);
    let secret = secret.unwrap_or(stored.server.secret);
    let expected = ServerConfig::normalized(&base_url, &secret);
    client.session.save_config(base_url, secret).await?;

    // save_config only logs failures; confirm the write landed.
    let (saved, _) = load_config(Some(path.clone()))?;
    if saved.server != expected {
        anyhow::bail!("settings were not saved to {}", path.display());
    }
    println!("saved settings to {}", path.display());
    print_settings(&client.store);
    Ok(())
}

fn print_settings(store: &FileConfigStore) {
    let server = store.current();
    println!("config:  {}", store.path().display());
    println!("server:  {}", server.base_url);
    println!(
        "secret:  {}",
        if server.has_secret() {
            "set"
        } else {
            "not set"
        }
    );
}

async fn run_health(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let client = open_client(config_path, None)?;
    let health = client
        .transport
        .health(&client.store.current())
        .await
        .map_err(|e| anyhow::anyhow!("health check failed: {}", e))?;
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}

async fn run_ask(config_path: Option<PathBuf>, mode: Mode, text: String) -> anyhow::Result<()> {
    let client = open_client(config_path, None)?;
    let session = &client.session;
    session.select_mode(mode).await?;
    session.set_input(text).await?;

    match send_and_wait(session).await? {
        Outcome::Reply(reply) => {
            println!("{}", reply);
            Ok(())
        }
        Outcome::Failed(error) => anyhow::bail!(error),
        Outcome::Nothing => anyhow::bail!("nothing to send"),
    }
}

enum Outcome {
    Reply(String),
    Failed(String),
    Nothing,
}

/// Send the current draft and wait for the exchange to finish.
async fn send_and_wait(session: &SessionHandle) -> anyhow::Result<Outcome> {
    let before = session.snapshot().messages.len();
    session.send().await?;
    let s = session.wait_idle().await?;
    if let Some(error) = s.error {
        session.acknowledge_error().await?;
        return Ok(Outcome::Failed(error));
    }
    Ok(s.messages
        .iter()
        .skip(before)
        .rfind(|m| !m.is_user)
        .map(|m| Outcome::Reply(m.text.clone()))
        .unwrap_or(Outcome::Nothing))
}

const CHAT_HELP: &str = "\
local commands:
  /mode <name>  switch mode (chat, task, reminder, alarm, timer)
  /modes        list modes
  /voice        capture the next message by voice
  /reload       re-read the config file
  /status       show mode, server, and conversation
  /history      show the conversation so far
  /exit, /quit  leave";

async fn run_chat(
    config_path: Option<PathBuf>,
    mode: Mode,
    speak_with: Option<String>,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let client = open_client(config_path, speak_with.as_deref())?;
    let session = &client.session;
    session.select_mode(mode).await?;
    if !session.snapshot().config.has_secret() {
        println!("no secret configured; run `orty config --secret ...` first");
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "{}> ", session.snapshot().selected_mode)?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            let (name, arg) = command
                .split_once(char::is_whitespace)
                .map(|(n, a)| (n, a.trim()))
                .unwrap_or((command, ""));
            match name.to_ascii_lowercase().as_str() {
                "exit" | "quit" => break,
                "help" => println!("{}", CHAT_HELP),
                "modes" => {
                    let current = session.snapshot().selected_mode;
                    for m in Mode::ALL {
                        let marker = if m == current { "*" } else { " " };
                        println!("{} {}", marker, m);
                    }
                }
                "mode" => match arg.parse::<Mode>() {
                    Ok(m) => session.select_mode(m).await?,
                    Err(e) => eprintln!("{}", e),
                },
                "voice" => voice_turn(session).await?,
                "reload" => match client.store.reload() {
                    Ok(true) => println!("settings reloaded"),
                    Ok(false) => println!("settings unchanged"),
                    Err(e) => eprintln!("reload failed: {:#}", e),
                },
                "status" => print_status(&session.snapshot()),
                "history" => {
                    for m in session.snapshot().messages {
                        let who = if m.is_user { ">" } else { "<" };
                        println!("{} {}", who, m.text);
                    }
                }
                other => eprintln!("unknown command /{} (try /help)", other),
            }
            continue;
        }

        session.set_input(input).await?;
        report(send_and_wait(session).await?);
    }

    Ok(())
}

/// Start voice capture, wait for it to finish, and send what was heard.
async fn voice_turn(session: &SessionHandle) -> anyhow::Result<()> {
    session.set_input("").await?;
    session.start_voice_input().await?;
    let mut rx = session.subscribe();
    let heard = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| !s.is_listening))
        .await
        .ok()
        .and_then(|r| r.ok().map(|s| s.clone()));

    let Some(s) = heard else {
        session.stop_voice_input().await?;
        eprintln!("voice capture timed out");
        return Ok(());
    };
    if let Some(error) = s.error {
        session.acknowledge_error().await?;
        eprintln!("voice: {}", error);
        return Ok(());
    }
    if s.input.trim().is_empty() {
        println!("(nothing heard)");
        return Ok(());
    }
    println!("heard: {}", s.input);
    report(send_and_wait(session).await?);
    Ok(())
}

fn report(outcome: Outcome) {
    match outcome {
        Outcome::Reply(reply) => println!("< {}", reply.trim()),
        Outcome::Failed(error) => eprintln!("error: {}", error),
        Outcome::Nothing => {}
    }
}

fn print_status(s: &Session) {
    println!("mode:         {}", s.selected_mode);
    println!("server:       {}", s.config.base_url);
    println!(
        "secret:       {}",
        if s.config.has_secret() { "set" } else { "not set" }
    );
    println!(
        "conversation: {}",
        s.conversation_id.as_deref().unwrap_or("(new)")
    );
    println!("messages:     {}", s.messages.len());
}
