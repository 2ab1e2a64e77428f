use {
    clap::{Parser, Subcommand},
    std::sync::Arc,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    botdesk_channels::{ChannelStore, SqliteChannelStore, SqliteSyncStatusStore, sqlite},
    botdesk_gateway::{ClientOptions, EventKind, GatewayApi, GatewayClient, WsTransport},
    botdesk_sync::{SyncEngine, SyncOptions},
};

#[derive(Parser)]
#[command(name = "botdesk", about = "Botdesk — gateway operations client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Gateway WebSocket URL.
    #[arg(long, global = true, env = "BOTDESK_GATEWAY_URL", default_value = "ws://127.0.0.1:8790")]
    url: String,

    /// Operator auth token.
    #[arg(long, global = true, env = "BOTDESK_TOKEN")]
    token: Option<String>,

    /// SQLite database path.
    #[arg(long, global = true, env = "BOTDESK_DB", default_value = "botdesk.db")]
    db: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ping the gateway and print its health payload.
    Health,
    /// Print the gateway status payload.
    Status,
    /// Reconcile the group roster into local channel records.
    Sync {
        /// Organization to sync.
        #[arg(long)]
        org: String,
        /// Analyze and report without writing anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Update every matched channel even if unchanged.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Subscribe and print gateway events until Ctrl-C.
    Tail,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

async fn connect(cli: &Cli) -> anyhow::Result<GatewayClient> {
    let mut opts = ClientOptions::new(&cli.url, "botdesk-cli");
    opts.token = cli.token.clone();
    let client = GatewayClient::new(Arc::new(WsTransport), opts);
    let negotiated = client.connect().await?;
    info!(
        protocol = negotiated.protocol,
        server_version = %negotiated.server_version,
        "connected"
    );
    Ok(client)
}

async fn open_stores(
    db: &str,
) -> anyhow::Result<(Arc<SqliteChannelStore>, Arc<SqliteSyncStatusStore>)> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite://{db}?mode=rwc"))
        .await?;
    sqlite::init_schema(&pool).await?;
    Ok((
        Arc::new(SqliteChannelStore::new(pool.clone())),
        Arc::new(SqliteSyncStatusStore::new(pool)),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match &cli.command {
        Commands::Health => {
            let client = connect(&cli).await?;
            let health = client.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
            client.disconnect().await;
        },
        Commands::Status => {
            let client = connect(&cli).await?;
            let status = client.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            client.disconnect().await;
        },
        Commands::Sync {
            org,
            dry_run,
            force,
        } => {
            let client = connect(&cli).await?;
            let (channels, status) = open_stores(&cli.db).await?;
            let engine = SyncEngine::new(
                Arc::new(client.clone()) as Arc<dyn GatewayApi>,
                channels as Arc<dyn ChannelStore>,
                status,
            );
            let report = engine
                .sync_groups(org, SyncOptions {
                    dry_run: *dry_run,
                    force_update: *force,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            client.disconnect().await;
            if !report.success() {
                std::process::exit(1);
            }
        },
        Commands::Tail => {
            let client = connect(&cli).await?;
            client.on_any(Box::new(|event| {
                println!("{event:?}");
                Ok(())
            }));
            // Stop tailing if the client gives up reconnecting.
            let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
            let done_tx = std::sync::Mutex::new(Some(done_tx));
            client.on(
                EventKind::ReconnectExhausted,
                Box::new(move |_| {
                    if let Ok(mut slot) = done_tx.lock()
                        && let Some(tx) = slot.take()
                    {
                        let _ = tx.send(());
                    }
                    Ok(())
                }),
            );
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
                _ = done_rx => info!("gateway unreachable, giving up"),
            }
            client.disconnect().await;
        },
    }

    Ok(())
}
