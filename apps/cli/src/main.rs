mod config;

use std::{io::Write, path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result, bail},
    clap::{Parser, Subcommand, ValueEnum},
    gatelink_auth::{
        DeviceIdentity, Ed25519Identity, FileDeviceTokenStore, Session, identity::identity_path,
    },
    gatelink_chat::ChatClient,
    gatelink_gateway_client::{CONNECTED_EVENT, EventCategory, Gateway, GatewayEvent},
    serde_json::{Value, json},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use crate::config::{FileConfig, Overrides};

/// Command-line client for a gatelink gateway.
///
/// Talks to the gateway over its authenticated WebSocket protocol and to
/// the chat API over HTTP.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Path to a TOML config file.
    #[arg(long, env = "GATELINK_CONFIG")]
    config: Option<PathBuf>,

    /// Gateway WebSocket URL.
    #[arg(long, env = "GATELINK_WS_URL")]
    ws_url: Option<String>,

    /// Chat API base URL.
    #[arg(long, env = "GATELINK_API_URL")]
    api_url: Option<String>,

    /// Access token for the chat API; also the shared gateway token when
    /// the config file sets none.
    #[arg(long, env = "GATELINK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Refresh token used when the access token is rejected.
    #[arg(long, env = "GATELINK_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    /// Directory holding the device identity and device tokens.
    #[arg(long, env = "GATELINK_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Connect with the shared token only, without signing as a device.
    #[arg(long)]
    no_device: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one request over the gateway socket and print the payload.
    Call {
        method: String,
        /// JSON params.
        params: Option<String>,
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
    /// Send a chat message and print the reply as it streams.
    Chat {
        message: String,
        #[arg(long)]
        conversation: Option<String>,
        /// Wait for the whole reply instead of streaming it.
        #[arg(long)]
        no_stream: bool,
    },
    /// Print gateway events as JSON lines until interrupted.
    Events {
        #[arg(long, value_enum)]
        category: Option<Category>,
    },
    /// Show the device identity, creating it on first use.
    Identity,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Category {
    Cron,
    Chat,
    Connection,
    Other,
}

impl From<Category> for EventCategory {
    fn from(category: Category) -> Self {
        match category {
            Category::Cron => Self::Cron,
            Category::Chat => Self::Chat,
            Category::Connection => Self::Connection,
            Category::Other => Self::Other,
        }
    }
}

struct App {
    config: FileConfig,
    session: Arc<Session>,
    no_device: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = FileConfig::load(args.config.as_deref())?;
    config.apply(Overrides {
        ws_url: args.ws_url,
        api_url: args.api_url,
        state_dir: args.state_dir,
    });
    let session = Arc::new(
        Session::new(reqwest::Client::new(), config.chat.refresh_url())
            .with_tokens(args.token, args.refresh_token),
    );
    let app = App {
        config,
        session,
        no_device: args.no_device,
    };

    match args.command {
        Command::Call {
            method,
            params,
            timeout_ms,
        } => app.call(&method, params.as_deref(), timeout_ms).await,
        Command::Chat {
            message,
            conversation,
            no_stream,
        } => app.chat(&message, conversation.as_deref(), no_stream).await,
        Command::Events { category } => app.events(category.map(Into::into)).await,
        Command::Identity => app.identity(),
    }
}

impl App {
    fn load_identity(&self) -> Result<Ed25519Identity> {
        let path = identity_path(&self.config.state_dir());
        Ed25519Identity::load_or_create(&path)
            .with_context(|| format!("failed to load device identity {}", path.display()))
    }

    fn gateway(&self) -> Result<Gateway> {
        let mut gateway = Gateway::new(self.config.gateway.clone())
            .with_session(Arc::clone(&self.session))
            .with_device_tokens(Arc::new(FileDeviceTokenStore::in_state_dir(
                &self.config.state_dir(),
            )));
        if !self.no_device {
            gateway = gateway.with_identity(Arc::new(self.load_identity()?));
        }
        Ok(gateway)
    }

    /// Start the gateway client and wait for its first handshake.
    async fn connect(&self, gateway: &Gateway) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _connected = gateway.subscribe_connection_events(move |event| {
            if event.event == CONNECTED_EVENT {
                let _ = tx.send(());
            }
        });
        let wait = self.config.gateway.request_timeout();
        tokio::time::timeout(wait, rx.recv())
            .await
            .with_context(|| format!("gateway {} not reachable", self.config.gateway.url))?;
        Ok(())
    }

    async fn call(&self, method: &str, params: Option<&str>, timeout_ms: u64) -> Result<()> {
        let params: Option<Value> = params
            .map(serde_json::from_str)
            .transpose()
            .context("params must be JSON")?;
        let gateway = self.gateway()?;
        self.connect(&gateway).await?;

        let payload = gateway
            .client()
            .request(method, params, Duration::from_millis(timeout_ms))
            .await;
        gateway.shutdown();
        let payload = payload.with_context(|| format!("{method} failed"))?;
        println!("{}", serde_json::to_string_pretty(&payload)?);
        Ok(())
    }

    async fn chat(&self, message: &str, conversation: Option<&str>, no_stream: bool) -> Result<()> {
        let client = ChatClient::new(self.config.chat.clone(), Arc::clone(&self.session));

        let result = if no_stream {
            let result = client.send_chat(message, conversation).await?;
            println!("{}", result.text());
            result
        } else {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let mut printed = String::new();
            let mut stdout = std::io::stdout();
            let result = client
                .send_streaming_chat(
                    message,
                    conversation,
                    |text| {
                        // Content events carry the full text; print what is new.
                        let fresh = match text.strip_prefix(printed.as_str()) {
                            Some(rest) => rest.to_string(),
                            None => format!("\n{text}"),
                        };
                        let _ = write!(stdout, "{fresh}");
                        let _ = stdout.flush();
                        printed = text.to_string();
                    },
                    |_| {},
                    Some(cancel),
                )
                .await?;
            println!();
            result
        };

        info!(
            conversation_id = result.conversation_id.as_deref().unwrap_or("-"),
            input = result.usage.input,
            output = result.usage.output,
            balance = ?result.token_balance,
            "chat complete"
        );
        Ok(())
    }

    async fn events(&self, category: Option<EventCategory>) -> Result<()> {
        let gateway = self.gateway()?;
        let print = |event: &GatewayEvent| {
            let line = json!({ "event": event.event, "payload": event.payload, "seq": event.seq });
            println!("{line}");
        };
        let _subscription = match category {
            Some(category) => gateway.subscribe(category, print),
            None => {
                gateway.client();
                gateway.events().subscribe_all(print)
            },
        };

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
        gateway.shutdown();
        Ok(())
    }

    fn identity(&self) -> Result<()> {
        if self.no_device {
            bail!("--no-device has no identity to show");
        }
        let identity = self.load_identity()?;
        let line = json!({
            "deviceId": identity.device_id(),
            "publicKey": identity.public_key(),
            "path": identity_path(&self.config.state_dir()),
        });
        println!("{}", serde_json::to_string_pretty(&line)?);
        Ok(())
    }
}
