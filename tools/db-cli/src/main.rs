use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sqlx::{migrate::MigrateDatabase, Postgres};

use lesprivate_common::DatabaseConfig;
use lesprivate_database::{create_pool, MigrationRunner};

#[derive(Parser)]
#[command(name = "db-cli")]
#[command(about = "Lesprivate database CLI tool")]
struct Cli {
    /// Database URL override; falls back to DATABASE_* variables
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Check migration status
    Status,
    /// Seed subscription prices and course categories
    Seed,
    /// Create an admin account if the email is not taken
    SeedAdmin {
        #[arg(long)]
        email: String,
        #[arg(long, env = "ADMIN_PASSWORD")]
        password: String,
    },
    /// Drop and recreate the database, then migrate
    Reset {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = database_config(cli.database_url.as_deref())?;

    match cli.command {
        Commands::Migrate => {
            runner(&config).await?.run_all_migrations().await?;
            println!("Migrations completed successfully");
        }
        Commands::Status => {
            let status = runner(&config).await?.check_migration_status().await?;
            println!("{}", status);
            if status.is_up_to_date {
                println!("Database is up to date");
            } else {
                println!("Database needs migration");
            }
        }
        Commands::Seed => {
            runner(&config).await?.seed_initial_data().await?;
            println!("Initial data seeded successfully");
        }
        Commands::SeedAdmin { email, password } => {
            runner(&config).await?.seed_admin(&email, &password).await?;
            println!("Admin account ready: {}", email);
        }
        Commands::Reset { force } => {
            if !force && !confirm(&config.database)? {
                println!("Operation cancelled");
                return Ok(());
            }

            let url = config.connection_string();
            if Postgres::database_exists(&url).await? {
                Postgres::drop_database(&url)
                    .await
                    .with_context(|| format!("dropping database {}", config.database))?;
            }

            // create_pool recreates the database
            let runner = runner(&config).await?;
            runner.run_all_migrations().await?;
            println!("Database reset completed");
        }
    }

    Ok(())
}

async fn runner(config: &DatabaseConfig) -> anyhow::Result<MigrationRunner> {
    let pool = create_pool(config)
        .await
        .with_context(|| format!("connecting to {}:{}", config.host, config.port))?;
    Ok(MigrationRunner::new(pool))
}

fn confirm(database: &str) -> anyhow::Result<bool> {
    println!("This will delete ALL data in database '{}'.", database);
    println!("Type 'yes' to continue:");

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim() == "yes")
}

fn database_config(database_url: Option<&str>) -> anyhow::Result<DatabaseConfig> {
    let mut config = DatabaseConfig::from_env_prefixed("DATABASE")?;
    if let Some(raw) = database_url {
        apply_url(&mut config, raw)?;
    }
    Ok(config)
}

fn apply_url(config: &mut DatabaseConfig, raw: &str) -> anyhow::Result<()> {
    let url = url::Url::parse(raw).context("invalid database URL")?;
    if !matches!(url.scheme(), "postgres" | "postgresql") {
        bail!("unsupported database scheme: {}", url.scheme());
    }

    let database = url.path().trim_start_matches('/');
    if database.is_empty() {
        bail!("database URL has no database name");
    }

    config.host = url.host_str().unwrap_or("localhost").to_string();
    config.port = url.port().unwrap_or(5432);
    config.username = url.username().to_string();
    config.password = url.password().unwrap_or_default().to_string();
    config.database = database.to_string();
    Ok(())
}
