//! Event Grid MQTT client - command line entry point

use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use eventgrid_mqtt::config::{AuthMode, ClientConfig};
use eventgrid_mqtt::credentials::build_token;
use eventgrid_mqtt::diagnostics::{run_diagnostics_for_key_file, REMEDIATION_CHECKLIST};
use eventgrid_mqtt::error::{ClientError, ClientResult};
use eventgrid_mqtt::observability::{init_default_logging, init_logging, LogFormat};
use eventgrid_mqtt::transport::mqtt::{
    Auth, EventGridClient, InboundMessage, MessageBody, DEFAULT_CONNECT_TIMEOUT,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, Level};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["eventgrid.toml", "config/eventgrid.toml"];

/// Buffered inbound messages before forwarding starts dropping
const MESSAGE_CHANNEL_CAPACITY: usize = 64;

/// Azure Event Grid MQTT client
#[derive(Parser)]
#[command(name = "eventgrid-mqtt")]
#[command(about = "Connect, publish and troubleshoot against an Azure Event Grid MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true, env = "EVENTGRID_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (debug level, pretty output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe, publish one event and hold the session open
    Run {
        /// Topic filter to subscribe to (repeatable)
        #[arg(long = "subscribe", value_name = "TOPIC")]
        subscribe: Vec<String>,

        /// Topic the sample event is published to
        #[arg(long, default_value = "tcu/camera/report")]
        publish_topic: String,

        /// Event `data` as JSON text
        #[arg(long, value_name = "JSON")]
        data: Option<String>,

        /// Event `source` attribute
        #[arg(long, default_value = "tcu")]
        source: String,

        /// Event `type` attribute
        #[arg(long = "event-type", default_value = "motion-detected")]
        event_type: String,

        /// Seconds to keep the session open to receive messages
        #[arg(long, default_value_t = 30)]
        hold_secs: u64,
    },
    /// Run the offline authentication checks
    Diagnose {
        /// Signing key to check (defaults to the configured key file)
        #[arg(long, value_name = "PEM")]
        key_file: Option<PathBuf>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

/// CloudEvents 1.0 envelope published by `run`
#[derive(Debug, Serialize)]
struct CloudEvent {
    id: String,
    source: String,
    specversion: &'static str,
    #[serde(rename = "type")]
    event_type: String,
    time: String,
    data: Value,
}

impl CloudEvent {
    fn new(source: &str, event_type: &str, data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.to_string(),
            specversion: "1.0",
            event_type: event_type.to_string(),
            time: timestamp(),
            data,
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose > 0 {
        init_logging(Level::DEBUG, LogFormat::Pretty, cli.verbose > 1);
    } else {
        init_default_logging();
    }

    info!("Starting eventgrid-mqtt v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Run {
            subscribe,
            publish_topic,
            data,
            source,
            event_type,
            hold_secs,
        } => {
            let options = RunOptions {
                subscribe,
                publish_topic,
                data,
                source,
                event_type,
                hold: Duration::from_secs(hold_secs),
            };
            match load_configuration(cli.config.as_deref(), true) {
                Ok(config) => run_client(config, options).await,
                Err(e) => Err(e),
            }
        }
        Commands::Diagnose { key_file } => match load_configuration(cli.config.as_deref(), false)
        {
            Ok(config) => handle_diagnose_command(&config, key_file.as_deref()),
            Err(e) => Err(e),
        },
        Commands::Config { show } => match load_configuration(cli.config.as_deref(), true) {
            Ok(config) => handle_config_command(&config, show),
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        error!("Command failed: {}", e.sanitized());
        process::exit(1);
    }

    info!("Application shutdown complete");
}

/// Load the config file; `validate = false` keeps every issue for diagnostics
fn load_configuration(config_path: Option<&Path>, validate: bool) -> ClientResult<ClientConfig> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
            .ok_or(ClientError::NoConfigFile)?,
    };

    info!("Loading configuration from: {}", path.display());
    let config = if validate {
        ClientConfig::load_from_file(&path)?
    } else {
        ClientConfig::read_from_file(&path)?
    };
    Ok(config)
}

struct RunOptions {
    subscribe: Vec<String>,
    publish_topic: String,
    data: Option<String>,
    source: String,
    event_type: String,
    hold: Duration,
}

async fn run_client(config: ClientConfig, options: RunOptions) -> ClientResult<()> {
    let auth = match config.auth {
        AuthMode::Certificate => Auth::Certificate,
        AuthMode::Token => {
            let pem = std::fs::read_to_string(&config.client_key_file)?;
            let token = build_token(&config.namespace, &config.region, &config.client_id, &pem)?;
            Auth::Token(token)
        }
    };

    let data = match &options.data {
        Some(text) => serde_json::from_str(text)?,
        None => json!({
            "message": "New event",
            "timestamp": timestamp(),
        }),
    };

    let topics = if options.subscribe.is_empty() {
        vec![format!("tcu/{}/reservation/update", config.client_id)]
    } else {
        options.subscribe.clone()
    };

    let mut client = EventGridClient::new(config)?;

    let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
    client.set_message_sender(message_tx);
    let receiver = tokio::spawn(log_messages(message_rx));

    if !client.connect(auth).await? {
        receiver.abort();
        let status = client.connection_status();
        return Err(match status.last_reason {
            Some(reason) => ClientError::ConnectionRefused { reason },
            None => ClientError::TimeoutNotConnected {
                timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            },
        });
    }
    info!("Connected successfully");

    let result = exchange(&client, &topics, &options, data).await;
    client.disconnect().await;
    receiver.abort();
    result
}

async fn exchange(
    client: &EventGridClient,
    topics: &[String],
    options: &RunOptions,
    data: Value,
) -> ClientResult<()> {
    for topic in topics {
        if client.subscribe(topic).await? {
            info!(topic = %topic, "Subscribed");
        }
    }

    let event = CloudEvent::new(&options.source, &options.event_type, data);
    if client.publish_event(&options.publish_topic, &event).await? {
        info!(event_id = %event.id, topic = %options.publish_topic, "Event published");
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!(
        hold_secs = options.hold.as_secs(),
        "Keeping connection alive to receive messages"
    );
    tokio::select! {
        _ = sleep(options.hold) => {
            info!("Hold period elapsed");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    Ok(())
}

async fn log_messages(mut rx: mpsc::Receiver<InboundMessage>) {
    while let Some(message) = rx.recv().await {
        match &message.body {
            MessageBody::Json(value) => {
                println!("[{}] {}", message.topic, value);
            }
            MessageBody::Text(text) => {
                println!("[{}] {}", message.topic, text);
            }
        }
    }
}

fn handle_diagnose_command(config: &ClientConfig, key_file: Option<&Path>) -> ClientResult<()> {
    let key_path = key_file.unwrap_or(config.client_key_file.as_path());

    println!("Event Grid MQTT diagnostics");
    println!("Broker:   {}", config.broker_host());
    println!("Audience: {}", config.token_audience());
    println!();

    let report = run_diagnostics_for_key_file(config, key_path);
    println!("{report}");

    if report.all_passed() {
        println!("All checks passed. The token was not verified against the broker.");
        Ok(())
    } else {
        println!("{REMEDIATION_CHECKLIST}");
        let failed = report.checks().iter().filter(|check| !check.passed).count();
        Err(ClientError::DiagnosticsFailed { failed })
    }
}

fn handle_config_command(config: &ClientConfig, show: bool) -> ClientResult<()> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!(broker = %config.broker_host(), "Configuration validation complete");
    Ok(())
}
