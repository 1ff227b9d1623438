//! Tenant login demo
//!
//! ```bash
//! # Log in as a person (opens the browser)
//! cargo run -p tenant-login -- login
//! cargo run -p tenant-login -- login --domain acme.us.example.com --scopes read:custom
//!
//! # Log in as a machine
//! cargo run -p tenant-login -- login --domain acme.us.example.com \
//!     --client-id ID --client-secret SECRET
//! cargo run -p tenant-login -- login --domain acme.us.example.com \
//!     --client-id ID --private-key-file key.pem --signing-alg PS256
//!
//! # Print a bearer token, renewing it if needed
//! cargo run -p tenant-login -- token
//!
//! # Switch tenants, log out
//! cargo run -p tenant-login -- tenants list
//! cargo run -p tenant-login -- tenants use acme.us.example.com
//! cargo run -p tenant-login -- logout acme.us.example.com
//!
//! # Without an OS keyring
//! TENANT_AUTH_PASSPHRASE=... cargo run -p tenant-login -- --secret-store file token
//! ```
//!
//! Set `RUST_LOG=tenant_auth=debug` for protocol-level logs.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tenant_auth::auth::ClientCredentials;
use tenant_auth::{
    ConfigStore, DeviceAuthenticator, EncryptedFileBackend, PrivateKeyJwtCredentials,
    SecretStore, SessionManager, SigningAlgorithm, TenantAuthError,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "tenant-login")]
#[command(about = "Log in to identity platform tenants and keep their tokens fresh")]
struct Args {
    /// Config file (default: <config dir>/tenant-auth/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Where tokens and client secrets are kept
    #[arg(long, value_enum, default_value_t = SecretStoreKind::Keyring, global = true)]
    secret_store: SecretStoreKind,

    /// Secret file for `--secret-store file` (default: next to the config file)
    #[arg(long, global = true)]
    secret_file: Option<PathBuf>,

    /// Passphrase for `--secret-store file`
    #[arg(long, env = "TENANT_AUTH_PASSPHRASE", hide_env_values = true, global = true)]
    passphrase: Option<String>,

    /// Print the verification URL instead of opening a browser
    #[arg(long, global = true)]
    no_browser: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in as a user (device flow) or as a machine (client credentials)
    Login {
        /// Tenant domain; required for machine logins
        #[arg(long)]
        domain: Option<String>,

        /// Client ID of a machine-to-machine application
        #[arg(long)]
        client_id: Option<String>,

        /// Client secret of the application
        #[arg(long, env = "TENANT_AUTH_CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,

        /// RSA private key (PEM) to sign client assertions with, instead of a secret
        #[arg(long, conflicts_with = "client_secret")]
        private_key_file: Option<PathBuf>,

        /// Client assertion algorithm: RS256, RS384 or PS256
        #[arg(long, default_value = "RS256")]
        signing_alg: SigningAlgorithm,

        /// Extra scopes for user logins, comma separated
        #[arg(long, value_delimiter = ',')]
        scopes: Vec<String>,
    },

    /// Forget a tenant and delete its stored secrets
    Logout {
        /// Tenant domain
        domain: String,
    },

    /// Print an access token, renewing it if it is about to expire
    Token {
        /// Tenant domain (default tenant if omitted)
        domain: Option<String>,
    },

    /// Inspect and switch tenants
    Tenants {
        #[command(subcommand)]
        command: TenantsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum TenantsCommand {
    /// List logged-in tenants
    List,
    /// Make a tenant the default
    Use {
        /// Tenant domain
        domain: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SecretStoreKind {
    /// OS credential manager
    Keyring,
    /// Passphrase-encrypted file
    File,
    /// Process memory (lost on exit)
    Memory,
}

fn open_secret_store(args: &Args, config_path: &Path) -> anyhow::Result<SecretStore> {
    Ok(match args.secret_store {
        SecretStoreKind::Keyring => SecretStore::keyring(),
        SecretStoreKind::Memory => SecretStore::in_memory(),
        SecretStoreKind::File => {
            let Some(passphrase) = args.passphrase.as_deref() else {
                bail!("--secret-store file needs --passphrase or TENANT_AUTH_PASSPHRASE");
            };
            let path = args
                .secret_file
                .clone()
                .unwrap_or_else(|| config_path.with_file_name("secrets.json"));
            SecretStore::new(EncryptedFileBackend::new(path, passphrase)?)
        }
    })
}

/// Cancel the token when Ctrl-C is pressed
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config_path = match args.config.clone() {
        Some(path) => path,
        None => ConfigStore::default_path()
            .context("could not determine the config directory; pass --config")?,
    };
    let secrets = open_secret_store(&args, &config_path)?;

    let mut session = SessionManager::builder()
        .config(ConfigStore::load_or_empty(&config_path)?)
        .secrets(secrets)
        .device(
            DeviceAuthenticator::builder()
                .auto_open_browser(!args.no_browser)
                .build(),
        )
        .build();
    let cancel = cancel_on_ctrl_c();

    match args.command {
        Command::Login {
            domain,
            client_id: Some(client_id),
            client_secret,
            private_key_file,
            signing_alg,
            ..
        } => {
            let Some(domain) = domain else {
                bail!("--domain is required for machine logins");
            };

            let tenant = match (private_key_file, client_secret) {
                (Some(key_file), _) => {
                    let private_key_pem = std::fs::read_to_string(&key_file)
                        .with_context(|| format!("reading {}", key_file.display()))?;
                    let credentials = PrivateKeyJwtCredentials::builder()
                        .client_id(client_id)
                        .private_key_pem(private_key_pem)
                        .signing_alg(signing_alg)
                        .domain(domain)
                        .build();
                    session
                        .login_as_machine_with_private_key(&credentials, &cancel)
                        .await?
                }
                (None, Some(client_secret)) => {
                    let credentials = ClientCredentials::builder()
                        .client_id(client_id)
                        .client_secret(client_secret)
                        .domain(domain)
                        .build();
                    session.login_as_machine(&credentials, &cancel).await?
                }
                (None, None) => bail!("--client-id needs --client-secret or --private-key-file"),
            };
            println!("Successfully logged in.");
            println!("Tenant: {}", tenant.domain);
        }
        Command::Login { domain, scopes, .. } => {
            let tenant = session
                .login_as_user(&scopes, domain.as_deref(), &cancel)
                .await?;
            println!();
            println!("Successfully logged in.");
            println!("Tenant: {}", tenant.domain);

            if let Some(default) = session.config().default_tenant() {
                if default != tenant.domain {
                    println!(
                        "Your default tenant is {default}. Switch with `tenant-login tenants use {}`.",
                        tenant.domain
                    );
                }
            }
        }
        Command::Logout { domain } => {
            session.logout(&domain)?;
            println!("Logged out from {domain}.");
        }
        Command::Token { domain } => {
            let token = session.access_token(domain.as_deref(), &cancel).await?;
            println!("{token}");
        }
        Command::Tenants {
            command: TenantsCommand::List,
        } => {
            let default = session.config().default_tenant().unwrap_or_default().to_string();
            let tenants = session
                .config_mut()
                .list_all_tenants()
                .map_err(TenantAuthError::from)?;
            for tenant in tenants {
                let marker = if tenant.domain == default { "*" } else { " " };
                let method = if tenant.is_authenticated_with_private_key_jwt() {
                    "private key jwt"
                } else if tenant.is_authenticated_with_client_credentials() {
                    "client credentials"
                } else {
                    "device"
                };
                let status = if tenant.has_expired_token() {
                    "needs renewal"
                } else {
                    "valid"
                };
                println!("{marker} {:<40} {method:<20} {status}", tenant.domain);
            }
        }
        Command::Tenants {
            command: TenantsCommand::Use { domain },
        } => {
            session.config_mut().set_default_tenant(&domain)?;
            println!("Default tenant switched to {domain}.");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing (quiet by default, use RUST_LOG=tenant_auth=debug to see more)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tenant_auth=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(args).await {
        match err.downcast_ref::<TenantAuthError>() {
            Some(e) if e.is_not_logged_in() => {
                eprintln!("{e}");
                eprintln!("Run `tenant-login login` to authenticate.");
                std::process::exit(1);
            }
            Some(e) if e.is_cancelled() => {
                eprintln!("Login cancelled.");
                std::process::exit(130);
            }
            _ => return Err(err),
        }
    }

    Ok(())
}
