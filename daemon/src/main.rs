//! keyguard daemon: entry point for the custody node.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use keyguard_hardware::UnavailableTransport;
use keyguard_node::{CustodyContext, InitOptions, KeyguardConfig, KeyguardNode};
use keyguard_types::SystemClock;
use keyguard_utils::{init_tracing, LogFormat};

#[derive(Parser)]
#[command(name = "keyguard", about = "Key custody daemon")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "KEYGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory for keystore, vault and manager state.
    #[arg(long, env = "KEYGUARD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "KEYGUARD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "KEYGUARD_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Create the keystore and vault and bootstrap the master user.
    Init {
        /// Name recorded in the keystore and vault metadata.
        #[arg(long, default_value = "keyguard")]
        name: String,

        #[arg(long, env = "KEYGUARD_ADMIN_USER")]
        admin_user: String,

        #[arg(long, env = "KEYGUARD_ADMIN_PASSWORD", hide_env_values = true)]
        admin_password: String,

        #[arg(long, env = "KEYGUARD_KEYSTORE_PASSPHRASE", hide_env_values = true)]
        keystore_passphrase: String,

        #[arg(long, env = "KEYGUARD_VAULT_PASSPHRASE", hide_env_values = true)]
        vault_passphrase: String,
    },
    /// Run the node until SIGINT or SIGTERM.
    Run,
    /// Print component status as JSON.
    Status,
    /// Print the effective configuration as TOML.
    Config,
}

fn load_config(cli: &Cli) -> anyhow::Result<KeyguardConfig> {
    let mut config = match &cli.config {
        Some(path) => KeyguardConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => KeyguardConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.log_format = format.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let format: LogFormat = config
        .log_format
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    init_tracing(format, &config.log_level);

    match cli.command {
        Command::Init {
            name,
            admin_user,
            admin_password,
            keystore_passphrase,
            vault_passphrase,
        } => {
            CustodyContext::initialize(
                &config,
                SystemClock::shared(),
                &InitOptions {
                    name: &name,
                    admin_user: &admin_user,
                    admin_password: &admin_password,
                    keystore_passphrase: &keystore_passphrase,
                    vault_passphrase: &vault_passphrase,
                },
            )?;
            tracing::info!(data_dir = %config.data_dir.display(), "custody data created");
        }
        Command::Run => {
            tracing::info!(data_dir = %config.data_dir.display(), "starting keyguard node");
            // No USB/HID backend is linked in; hardware calls report the
            // device as unavailable.
            let context =
                CustodyContext::open(config, SystemClock::shared(), Arc::new(UnavailableTransport))?;
            let mut node = KeyguardNode::new(context);
            node.run_until_signal().await?;
            tracing::info!("keyguard daemon exited cleanly");
        }
        Command::Status => {
            let context =
                CustodyContext::open(config, SystemClock::shared(), Arc::new(UnavailableTransport))?;
            println!("{}", serde_json::to_string_pretty(&context.status())?);
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}
