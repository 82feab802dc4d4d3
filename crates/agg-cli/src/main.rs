mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agg")]
#[command(about = "Embedding pair aggregation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands (uses AGG_DATABASE_URL)
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> local ...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Submit embeddings from a JSON file: join, then forward completed pairs
    Submit {
        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        /// JSON file: one `{id, embedding_type, embedding}` object or `{"embeddings": [...]}`
        #[arg(long)]
        file: String,

        /// Fail on config keys the service does not read
        #[arg(long, default_value_t = false)]
        strict_config: bool,
    },

    /// Forward records that are complete but still in the store
    Sweep {
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        /// Run one sweep and exit instead of looping until Ctrl-C
        #[arg(long, default_value_t = false)]
        once: bool,

        #[arg(long, default_value_t = false)]
        strict_config: bool,
    },

    /// Inspect or remove stored partial records (postgres backend)
    Records {
        #[command(subcommand)]
        cmd: RecordsCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum RecordsCmd {
    /// Print one record as JSON (payloads included)
    Show {
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        id: String,
    },

    /// Delete one record, e.g. one held back by a partition key conflict
    Purge {
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present. Silent if missing; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = agg_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = agg_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_partial_records_table={}",
                        s.ok, s.has_partial_records_table
                    );
                }
                DbCmd::Migrate => {
                    agg_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let loaded = agg_config::load_layered_yaml(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Submit {
            config_paths,
            file,
            strict_config,
        } => {
            let cfg = commands::load_settings(&config_paths, strict_config)?;
            commands::submit::run(&cfg, &file).await?;
        }

        Commands::Sweep {
            config_paths,
            once,
            strict_config,
        } => {
            let cfg = commands::load_settings(&config_paths, strict_config)?;
            commands::sweep::run(&cfg, once).await?;
        }

        Commands::Records { cmd } => match cmd {
            RecordsCmd::Show { config_paths, id } => {
                let cfg = commands::load_settings(&config_paths, false)?;
                commands::records::show(&cfg, &id).await?;
            }
            RecordsCmd::Purge { config_paths, id } => {
                let cfg = commands::load_settings(&config_paths, false)?;
                commands::records::purge(&cfg, &id).await?;
            }
        },
    }

    Ok(())
}

/// Logs go to stderr; stdout carries command output only.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
