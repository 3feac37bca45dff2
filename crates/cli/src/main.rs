use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "hookrelay")]
#[command(about = "Hookrelay CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the gateway: conversation entry point, inbound webhooks, and the event stream.
    Gateway {
        /// Config file path (default: HOOKRELAY_CONFIG_PATH or ~/.hookrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 8765)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Talk to a relay instance through the gateway (interactive).
    Chat {
        /// Config file path (default: HOOKRELAY_CONFIG_PATH or ~/.hookrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Relay instance id (default: the gateway's default instance).
        #[arg(long, value_name = "ID")]
        agent: Option<String>,

        /// Existing conversation id to continue.
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,
    },

    /// Print host events (e.g. conversation.finished) as the gateway fires them.
    Events {
        /// Config file path (default: HOOKRELAY_CONFIG_PATH or ~/.hookrelay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("hookrelay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat {
            config,
            agent,
            conversation,
        }) => {
            if let Err(e) = run_chat(config, agent, conversation).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Events { config }) => {
            if let Err(e) = run_events(config).await {
                log::error!("events failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, _) = hookrelay::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    hookrelay::gateway::run_gateway(config).await
}

fn gateway_http_url(config: &hookrelay::config::Config) -> String {
    format!("http://{}:{}", config.gateway.bind.trim(), config.gateway.port)
}

async fn run_chat(
    config_path: Option<std::path::PathBuf>,
    agent: Option<String>,
    conversation: Option<String>,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, _) = hookrelay::config::load_config(config_path)?;
    let url = format!("{}/api/conversation/process", gateway_http_url(&config));
    let client = reqwest::Client::new();
    let mut current_conversation = conversation;
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        let params = hookrelay::gateway::ProcessParams {
            text: input.to_string(),
            conversation_id: current_conversation.clone(),
            satellite_id: None,
            agent_id: agent.clone(),
        };
        match process_via_gateway(&client, &url, &params).await {
            Ok(result) => {
                current_conversation = Some(result.conversation_id);
                println!("< {}", result.response_text.trim());
            }
            Err(e) => {
                eprintln!("chat error: {}", e);
            }
        }
    }

    Ok(())
}

async fn process_via_gateway(
    client: &reqwest::Client,
    url: &str,
    params: &hookrelay::gateway::ProcessParams,
) -> Result<hookrelay::relay::ConversationResult, String> {
    let res = client
        .post(url)
        .json(params)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(format!("{} {}", status, body));
    }
    res.json().await.map_err(|e| e.to_string())
}

async fn run_events(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, _) = hookrelay::config::load_config(config_path)?;
    let ws_url = format!(
        "ws://{}:{}/ws",
        config.gateway.bind.trim(),
        config.gateway.port
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(&ws_url).await?;
    log::info!("subscribed to events at {}", ws_url);

    while let Some(msg) = ws.next().await {
        let Message::Text(text) = msg? else { continue };
        let frame: serde_json::Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => {
                println!("{}", text);
                continue;
            }
        };
        let event = frame.get("event").and_then(|v| v.as_str()).unwrap_or("?");
        let payload = frame.get("payload").cloned().unwrap_or_default();
        println!("{} {}", event, payload);
        if event == hookrelay::events::EVENT_SHUTDOWN {
            break;
        }
    }

    Ok(())
}
