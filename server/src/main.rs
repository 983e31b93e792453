mod config;
mod http;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use clap::{Args, Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use platform_authn::MIN_SECRET_BYTES;
use platform_authz::{Principal, Role};
use platform_db::{DatabaseSettings, connect};
use platform_gate::Engine;
use platform_obs::{ObsConfig, init_tracing};
use rand::RngCore;
use sea_orm::DatabaseConnection;
use tracing::info;
use uuid::Uuid;

use crate::{config::AppConfig, http::AppState};

#[derive(Parser, Debug)]
#[command(name = "tenant-gate", version, about = "Authorization, tenant scoping and usage metering")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server.
    Serve(ServeCommand),
    /// Run database migrations.
    #[command(subcommand)]
    Migrate(MigrateCommand),
    /// Mint tokens with the configured secret.
    #[command(subcommand)]
    Token(TokenCommand),
    /// Manage credit balances.
    #[command(subcommand)]
    Credits(CreditsCommand),
    /// Inspect the permission and pricing policy.
    #[command(subcommand)]
    Policy(PolicyCommand),
}

#[derive(Subcommand, Debug)]
enum MigrateCommand {
    /// Apply pending migrations.
    Up,
    /// Rollback the most recent migration.
    Down,
}

#[derive(Args, Debug)]
struct ServeCommand {
    /// Overrides `BIND`.
    #[arg(long)]
    bind: Option<SocketAddr>,
    #[arg(long, help = "Allow starting even when migrations are pending")]
    allow_dirty: bool,
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    /// Issue a bearer token for a member of an organization.
    Issue {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        role: Role,
    },
    /// Issue a read-only share token for one case.
    Share {
        #[arg(long)]
        case: Uuid,
    },
    /// Print a fresh random value for `TOKEN_SECRET_BASE64`.
    Secret,
}

#[derive(Subcommand, Debug)]
enum CreditsCommand {
    /// Add credits to an organization's balance.
    Grant {
        #[arg(long)]
        org: Uuid,
        #[arg(long = "type")]
        credit_type: String,
        #[arg(long)]
        amount: i64,
    },
}

#[derive(Subcommand, Debug)]
enum PolicyCommand {
    /// Validate a policy document and print what it defines.
    Check {
        /// Defaults to `POLICY_PATH`, then the built-in policy.
        #[arg(long, value_name = "FILE")]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(ObsConfig::from_env())?;
    let cli = Cli::parse();
    let config = Arc::new(AppConfig::load()?);
    match cli.command {
        Command::Serve(cmd) => run_server(cmd, config).await,
        Command::Migrate(action) => match action {
            MigrateCommand::Up => migrate_up(&config).await,
            MigrateCommand::Down => migrate_down(&config).await,
        },
        Command::Token(cmd) => issue_token(cmd, &config),
        Command::Credits(CreditsCommand::Grant {
            org,
            credit_type,
            amount,
        }) => grant_credits(&config, org, &credit_type, amount).await,
        Command::Policy(PolicyCommand::Check { path }) => check_policy(path, &config),
    }
}

async fn setup_pool(config: &AppConfig) -> Result<DatabaseConnection> {
    let settings = DatabaseSettings::new(config.database_url()?);
    connect(&settings).await.map_err(Into::into)
}

fn build_engine(config: &AppConfig, db: DatabaseConnection) -> Result<Arc<Engine>> {
    let engine = Engine::builder(db, config.token_keys()?)
        .policy(config.policy()?)
        .build()?;
    Ok(Arc::new(engine))
}

async fn run_server(cmd: ServeCommand, config: Arc<AppConfig>) -> Result<()> {
    let pool = setup_pool(&config).await?;
    ensure_migrations(&pool, cmd.allow_dirty).await?;
    let engine = build_engine(&config, pool)?;
    let addr = cmd.bind.unwrap_or(config.bind);
    http::serve(addr, AppState { engine, config }).await
}

async fn ensure_migrations(pool: &DatabaseConnection, allow_dirty: bool) -> Result<()> {
    let pending = Migrator::get_pending_migrations(pool).await?;
    if !pending.is_empty() && !allow_dirty {
        anyhow::bail!(
            "pending migrations detected; run `tenant-gate migrate up` or pass --allow-dirty"
        );
    }
    Ok(())
}

async fn migrate_up(config: &AppConfig) -> Result<()> {
    let pool = setup_pool(config).await?;
    Migrator::up(&pool, None).await?;
    info!("database migrations applied");
    Ok(())
}

async fn migrate_down(config: &AppConfig) -> Result<()> {
    let pool = setup_pool(config).await?;
    Migrator::down(&pool, Some(1)).await?;
    info!("most recent migration rolled back");
    Ok(())
}

fn issue_token(cmd: TokenCommand, config: &AppConfig) -> Result<()> {
    let now = chrono::Utc::now();
    let token = match cmd {
        TokenCommand::Issue { user, org, role } => config.token_keys()?.issue_bearer(
            &Principal {
                user_id: user,
                org_id: org,
                role,
            },
            now,
        )?,
        TokenCommand::Share { case } => config.token_keys()?.issue_share(&case.to_string(), now)?,
        TokenCommand::Secret => generate_secret(),
    };
    println!("{token}");
    Ok(())
}

fn generate_secret() -> String {
    let mut secret = [0u8; MIN_SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut secret);
    STANDARD.encode(secret)
}

async fn grant_credits(config: &AppConfig, org: Uuid, credit_type: &str, amount: i64) -> Result<()> {
    let pool = setup_pool(config).await?;
    let engine = build_engine(config, pool)?;
    let balance = engine
        .grant_credits(org, credit_type, amount)
        .await
        .with_context(|| format!("failed to grant {amount} {credit_type} to {org}"))?;
    info!(%org, credit_type, amount, balance, "credits granted");
    println!("{balance}");
    Ok(())
}

fn check_policy(path: Option<PathBuf>, config: &AppConfig) -> Result<()> {
    let path = path.or_else(|| config.policy_path.clone());
    let policy = config::load_policy(path.as_deref())?;
    let mut actions: Vec<_> = policy.action_names().collect();
    actions.sort_unstable();
    for name in actions {
        if let Some(rule) = policy.action(name) {
            let quota = rule.quota.as_deref().unwrap_or("-");
            let credit = rule
                .credit
                .as_ref()
                .map(|cost| format!("{}x{}", cost.credit_type, cost.amount))
                .unwrap_or_else(|| "-".into());
            println!("{name:<24} {:<20} quota={quota:<18} credit={credit}", rule.permission.as_str());
        }
    }
    let permissions = policy.matrix().catalogue().count();
    info!(permissions, source = ?path, "policy is valid");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secret_is_accepted_by_config() {
        let secret = generate_secret();
        assert_ne!(secret, generate_secret());
        let config = AppConfig::from_lookup(|key| (key == "TOKEN_SECRET_BASE64").then(|| secret.clone())).unwrap();
        assert!(config.token_keys().is_ok());
    }
}
