use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use activity_limiter::config::{LimiterConfig, LoggingConfig};
use activity_limiter::ratelimit::{ActionType, Actor, RateLimiter, Role};

/// Inspect and exercise activity rate limits.
#[derive(Parser, Debug)]
#[command(name = "activity-limiter", version, about)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Centralized store URL, overriding the configuration file
    #[arg(long, global = true)]
    store_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count one request and print the decision
    Check(ActorArgs),
    /// Print the remaining quota without counting a request
    Status(ActorArgs),
    /// Clear a user's counters
    Reset {
        #[arg(long)]
        user: String,
        /// Only this action; every action when omitted
        #[arg(long)]
        action: Option<ActionType>,
    },
    /// Print the effective action table
    Actions,
    /// Fire a series of checks for one actor
    Simulate {
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long, default_value_t = 10)]
        count: u32,
        /// Delay between requests in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
}

#[derive(Args, Debug)]
struct ActorArgs {
    #[arg(long)]
    action: ActionType,
    /// Authenticated user id
    #[arg(long)]
    user: Option<String>,
    /// Client IP, used when no user is given
    #[arg(long)]
    ip: Option<String>,
    #[arg(long, default_value = "standard")]
    role: Role,
}

impl ActorArgs {
    fn actor(&self) -> Actor {
        let actor = match &self.user {
            Some(user) => Actor::user(user.clone()),
            None => Actor::anonymous(self.ip.clone()),
        };
        actor.with_role(self.role)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => LimiterConfig::from_file(path)?,
        None => LimiterConfig::default(),
    };
    if let Some(url) = cli.store_url.clone() {
        config.store.url = Some(url);
    }

    init_tracing(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting activity limiter");

    let limiter = build_limiter(&config).await?;

    match cli.command {
        Command::Check(args) => {
            let result = limiter.check(args.action, &args.actor()).await?;
            let headers = limiter.headers(&result).to_pairs();
            let headers: serde_json::Map<String, serde_json::Value> = headers
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.into()))
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "result": result, "headers": headers }))?
            );
        }
        Command::Status(args) => {
            let status = limiter.status(args.action, &args.actor()).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Reset { user, action } => {
            limiter.reset(&user, action).await;
            println!("{}", json!({ "reset": user, "action": action }));
        }
        Command::Actions => {
            let table: Vec<_> = limiter
                .actions()
                .iter()
                .map(|(action, config)| {
                    json!({
                        "action": action,
                        "window_ms": config.window_ms,
                        "max_requests": config.max_requests,
                        "message": config.message,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&table)?);
        }
        Command::Simulate {
            actor,
            count,
            interval_ms,
        } => {
            let sweeper = limiter.start_sweeper(config.sweep.interval())?;
            tokio::select! {
                result = simulate(&limiter, &actor, count, Duration::from_millis(interval_ms)) => result?,
                _ = shutdown_signal() => {}
            }
            sweeper.shutdown().await;
        }
    }

    Ok(())
}

async fn simulate(
    limiter: &RateLimiter,
    args: &ActorArgs,
    count: u32,
    interval: Duration,
) -> anyhow::Result<()> {
    let actor = args.actor();
    for _ in 0..count {
        let result = limiter.check(args.action, &actor).await?;
        println!("{}", serde_json::to_string(&result)?);
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Logs go to stderr so command output on stdout stays machine-readable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_limiter(config: &LimiterConfig) -> anyhow::Result<RateLimiter> {
    let limiter = RateLimiter::from_config(config);
    match config.store.url.as_deref() {
        None => {
            info!("No centralized store configured, using in-process counters");
            Ok(limiter)
        }
        Some(url) => connect_store(limiter, url, config.store.scripting).await,
    }
}

#[cfg(feature = "redis")]
async fn connect_store(
    limiter: RateLimiter,
    url: &str,
    scripting: bool,
) -> anyhow::Result<RateLimiter> {
    use activity_limiter::store::RedisClient;

    match RedisClient::connect(url, scripting).await {
        Ok(client) => Ok(limiter.with_store_client(client)),
        Err(e) => {
            warn!(error = %e, "Could not reach centralized store, using in-process counters");
            Ok(limiter)
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_store(
    _limiter: RateLimiter,
    url: &str,
    _scripting: bool,
) -> anyhow::Result<RateLimiter> {
    anyhow::bail!(
        "store url {} is configured but this build has no store client; rebuild with --features redis",
        url
    )
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
