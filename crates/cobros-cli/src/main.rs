//! Cobros CLI - operator commands
//!
//! Usage:
//!   cobros migrate
//!   cobros seed-admin --handle <handle> --email <email> --name <name>
//!   cobros unlock --account <id|handle|email>
//!   cobros revoke-sessions --account <id|handle|email>
//!   cobros hash-password [password]
//!   cobros generate-password [--length 16] [--no-special]
//!   cobros check-password <password>

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use cobros_api::auth::{
    generate_password, hash_password_with_config, score_strength, CreateAccount,
    PasswordConfig, PasswordOptions,
};
use cobros_api::state::AppState;
use cobros_core::{AppConfig, CredentialStore, PgStore, Role};
use std::io::BufRead;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "cobros")]
#[command(about = "Cobros authentication core operator CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the database schema
    Migrate,
    /// Create the first administrator account
    SeedAdmin {
        #[arg(long)]
        handle: String,
        #[arg(long)]
        email: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// Password (a random one is generated and printed when omitted)
        #[arg(long, env = "COBROS_ADMIN_PASSWORD")]
        password: Option<String>,
    },
    /// Clear the failed-login lockout of an account
    Unlock {
        /// Account id, handle or email
        #[arg(long)]
        account: String,
    },
    /// Revoke every session of an account
    RevokeSessions {
        /// Account id, handle or email
        #[arg(long)]
        account: String,
    },
    /// Hash a password with the configured Argon2id parameters
    HashPassword {
        /// Read from stdin when omitted
        password: Option<String>,
    },
    /// Generate a random password
    GeneratePassword {
        #[arg(long, default_value_t = 16)]
        length: usize,
        #[arg(long)]
        no_lowercase: bool,
        #[arg(long)]
        no_uppercase: bool,
        #[arg(long)]
        no_digits: bool,
        #[arg(long)]
        no_special: bool,
    },
    /// Score a password against the strength rules
    CheckPassword {
        /// Read from stdin when omitted
        password: Option<String>,
    },
}

/// Configuration without the signing-secret check, for commands that never
/// issue or verify tokens
fn load_unchecked_config() -> anyhow::Result<AppConfig> {
    let base = match std::env::var("COBROS_CONFIG") {
        Ok(path) if !path.is_empty() => AppConfig::from_file(path)?,
        _ => AppConfig::default(),
    };
    Ok(base.with_env_override()?)
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgStore> {
    PgStore::connect(&config.database.postgres_url, config.database.pool_size)
        .await
        .context("Failed to connect to PostgreSQL")
}

async fn service_state() -> anyhow::Result<AppState> {
    let config = AppConfig::load().context("Invalid configuration")?;
    let store = connect(&config).await?;
    Ok(AppState::with_postgres(config, store))
}

async fn resolve_account(state: &AppState, account: &str) -> anyhow::Result<Uuid> {
    if let Ok(id) = account.parse::<Uuid>() {
        return Ok(id);
    }
    let credentials = state
        .postgres
        .as_ref()
        .context("No database configured")?;
    match credentials.find_by_handle_or_email(account).await? {
        Some(found) => Ok(found.id),
        None => bail!("No account matches '{account}'"),
    }
}

fn read_secret(value: Option<String>) -> anyhow::Result<String> {
    if let Some(value) = value {
        return Ok(value);
    }
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let line = line.trim_end_matches(['\r', '\n']).to_string();
    if line.is_empty() {
        bail!("No password given");
    }
    Ok(line)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cobros_cli=info,cobros_core=warn,cobros_api=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => {
            let config = load_unchecked_config()?;
            connect(&config).await?.migrate().await?;
            tracing::info!("Schema applied");
        }
        Commands::SeedAdmin {
            handle,
            email,
            name,
            password,
        } => {
            let state = service_state().await?;
            let generated = password.is_none();
            let password = match password {
                Some(password) => password,
                None => generate_password(20, PasswordOptions::default())?,
            };

            let account = state
                .accounts
                .create_account(
                    CreateAccount {
                        handle,
                        email,
                        display_name: name,
                        password: password.clone(),
                        role: Role::Administrator,
                        is_active: true,
                    },
                    None,
                )
                .await?;
            state.audit.flush().await;

            println!("Created administrator {} ({})", account.handle, account.id);
            if generated {
                println!("Generated password: {password}");
            }
        }
        Commands::Unlock { account } => {
            let state = service_state().await?;
            let id = resolve_account(&state, &account).await?;
            state.auth.unlock(id, None).await?;
            state.audit.flush().await;
            println!("Unlocked {id}");
        }
        Commands::RevokeSessions { account } => {
            let state = service_state().await?;
            let id = resolve_account(&state, &account).await?;
            state.accounts.revoke_sessions(id, None).await?;
            state.audit.flush().await;
            println!("Revoked all sessions of {id}");
        }
        Commands::HashPassword { password } => {
            let config = load_unchecked_config()?;
            let password = read_secret(password)?;
            let hash = hash_password_with_config(&password, &PasswordConfig::from(&config.auth))?;
            println!("{hash}");
        }
        Commands::GeneratePassword {
            length,
            no_lowercase,
            no_uppercase,
            no_digits,
            no_special,
        } => {
            let options = PasswordOptions {
                lowercase: !no_lowercase,
                uppercase: !no_uppercase,
                digits: !no_digits,
                special: !no_special,
            };
            println!("{}", generate_password(length, options)?);
        }
        Commands::CheckPassword { password } => {
            let password = read_secret(password)?;
            let strength = score_strength(&password);
            println!("{}", serde_json::to_string_pretty(&strength)?);
            if !strength.valid {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_generate_password_flags() {
        let cli = Cli::parse_from(["cobros", "generate-password", "--length", "24", "--no-special"]);
        match cli.command {
            Commands::GeneratePassword {
                length, no_special, ..
            } => {
                assert_eq!(length, 24);
                assert!(no_special);
            }
            _ => panic!("unexpected command"),
        }
    }
}
