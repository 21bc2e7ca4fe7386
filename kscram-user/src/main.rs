//! kscram-user: Kafka SCRAM user reconciler.
//!
//! - `validate` checks User and ProviderConfig manifests without touching a cluster
//! - `simulate` drives a User through create, steady state and deletion against
//!   an in-memory cluster, one reconciliation pass at a time

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kscram_user::clients::scram::{MAX_ITERATIONS, MIN_ITERATIONS};
use kscram_user::resource::{
    CredentialsSource, ProviderCredentials, SecretKeySelector, SecretReference,
};
use kscram_user::{
    Account, CallContext, Driver, InMemoryCluster, InMemoryStore, Outcome, ProviderConfig,
    RandomPassword, User, UserConnector,
};

const CREDENTIALS_NAMESPACE: &str = "crossplane-system";
const CREDENTIALS_SECRET: &str = "kafka-admin";
const CREDENTIALS_KEY: &str = "credentials";

/// Kafka SCRAM user reconciler
#[derive(Parser)]
#[command(name = "kscram-user", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate User (and optionally ProviderConfig) manifests
    Validate {
        /// Path to a User manifest (JSON)
        #[arg(long)]
        user: PathBuf,

        /// Path to a ProviderConfig manifest (JSON)
        #[arg(long)]
        provider_config: Option<PathBuf>,
    },

    /// Reconcile a User against an in-memory Kafka cluster until it is deleted
    Simulate {
        /// Path to a User manifest (JSON)
        #[arg(long)]
        user: PathBuf,

        /// Maximum passes per phase
        #[arg(long, default_value = "5")]
        passes: u32,

        /// Delay between passes in milliseconds
        #[arg(long, default_value = "200")]
        interval_ms: u64,

        /// Timeout of each pass in seconds
        #[arg(long, default_value = "10")]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kscram_user=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate {
            user,
            provider_config,
        } => validate(&user, provider_config.as_deref()).await,
        Commands::Simulate {
            user,
            passes,
            interval_ms,
            timeout_secs,
        } => {
            simulate(
                &user,
                passes,
                Duration::from_millis(interval_ms),
                Duration::from_secs(timeout_secs),
            )
            .await
        }
    }
}

async fn read_user(path: &Path) -> Result<User> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    User::from_json(&data).with_context(|| format!("Invalid User manifest {}", path.display()))
}

async fn validate(user_path: &Path, pc_path: Option<&Path>) -> Result<()> {
    let user = read_user(user_path).await?;
    let account = Account::from_parameters(user.external_name(), &user.spec.for_provider)
        .with_context(|| format!("User {} is invalid", user.metadata.name))?;

    if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&account.iterations) {
        warn!(
            "User {}: brokers only accept {}..={} iterations, got {}",
            user.metadata.name, MIN_ITERATIONS, MAX_ITERATIONS, account.iterations
        );
    }

    println!(
        "User {}: account {} ({}, {} iterations), ProviderConfig {}",
        user.metadata.name,
        account.name,
        account.mechanism,
        account.iterations,
        user.provider_config_name()
    );

    if let Some(path) = pc_path {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let pc = ProviderConfig::from_json(&data)
            .with_context(|| format!("Invalid ProviderConfig manifest {}", path.display()))?;

        if pc.metadata.name != user.provider_config_name() {
            bail!(
                "User {} references ProviderConfig {}, got {}",
                user.metadata.name,
                user.provider_config_name(),
                pc.metadata.name
            );
        }
        let credentials = &pc.spec.credentials;
        let has_selector = match credentials.source {
            CredentialsSource::None => true,
            CredentialsSource::Secret => credentials.secret_ref.is_some(),
            CredentialsSource::Environment => credentials.env.is_some(),
            CredentialsSource::Filesystem => credentials.fs.is_some(),
        };
        if !has_selector {
            bail!(
                "ProviderConfig {} uses credentials source {:?} without a selector",
                pc.metadata.name,
                credentials.source
            );
        }
        println!(
            "ProviderConfig {}: credentials from {:?}",
            pc.metadata.name, credentials.source
        );
    }

    Ok(())
}

async fn simulate(
    user_path: &Path,
    passes: u32,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let mut user = read_user(user_path).await?;
    if user.spec.write_connection_secret_to_ref.is_none() {
        user.spec.write_connection_secret_to_ref = Some(SecretReference {
            name: format!("{}-kafka", user.metadata.name),
            namespace: "default".to_string(),
        });
    }

    let cluster = InMemoryCluster::new();
    let store = Arc::new(InMemoryStore::new());
    store
        .insert_secret(
            CREDENTIALS_NAMESPACE,
            CREDENTIALS_SECRET,
            BTreeMap::from([(
                CREDENTIALS_KEY.to_string(),
                br#"{"brokers": ["in-memory:9092"]}"#.to_vec(),
            )]),
        )
        .await;
    store
        .insert_provider_config(ProviderConfig::new(
            user.provider_config_name(),
            ProviderCredentials {
                source: CredentialsSource::Secret,
                secret_ref: Some(SecretKeySelector {
                    name: CREDENTIALS_SECRET.to_string(),
                    namespace: CREDENTIALS_NAMESPACE.to_string(),
                    key: CREDENTIALS_KEY.to_string(),
                }),
                env: None,
                fs: None,
            },
        ))
        .await;

    let connector = UserConnector::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(cluster.clone()),
        Arc::new(RandomPassword::default()),
    );
    let driver = Driver::new(connector, store.clone());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, canceling in-flight requests");
            on_signal.cancel();
        }
    });

    info!("Simulating user {}", user.metadata.name);
    let ctx = || {
        CallContext::new()
            .with_cancellation(cancel.clone())
            .with_timeout(timeout)
    };

    run_until(&driver, &mut user, passes, interval, &ctx, |o| o == Outcome::UpToDate)
        .await
        .context("User never became ready")?;

    if let Some(secret) = &user.spec.write_connection_secret_to_ref {
        let keys = store
            .secret(&secret.namespace, &secret.name)
            .await
            .map(|data| data.into_keys().collect::<Vec<_>>())
            .unwrap_or_default();
        println!(
            "Connection secret {}/{}: {}",
            secret.namespace,
            secret.name,
            keys.join(",")
        );
    }
    println!("Cluster users: {}", cluster.users().await.join(","));

    user.metadata.deletion_timestamp = Some(Utc::now());
    run_until(&driver, &mut user, passes, interval, &ctx, |o| o.is_final())
        .await
        .context("User was never finalized")?;
    println!("Cluster users: {}", cluster.users().await.join(","));

    Ok(())
}

async fn run_until(
    driver: &Driver<UserConnector>,
    user: &mut User,
    passes: u32,
    interval: Duration,
    ctx: &impl Fn() -> CallContext,
    done: impl Fn(Outcome) -> bool,
) -> Result<()> {
    for pass in 1..=passes {
        let ctx = ctx();
        match driver.reconcile(&ctx, user).await {
            Ok(outcome) => {
                println!("pass {}: {}", pass, outcome);
                if done(outcome) {
                    return Ok(());
                }
            }
            Err(e) => println!("pass {}: error: {:#}", pass, anyhow::Error::new(e)),
        }
        if ctx.is_cancelled() {
            bail!("canceled");
        }
        tokio::time::sleep(interval).await;
    }
    bail!("no convergence after {} passes", passes)
}
