use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use statement_ingest::{ingest, setup_database, verify_count, AppConfig, SqliteStore};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let config = AppConfig::from_env();

    match args.get(1).map(String::as_str) {
        Some("import") => {
            let Some(file) = args.get(2) else {
                print_usage();
                bail!("import needs a JSON file");
            };
            run_import(&config, Path::new(file), args.get(3).map(String::as_str))
        }
        Some("count") => run_count(&config),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("statement-ingest {}", statement_ingest::VERSION);
    println!();
    println!("USAGE:");
    println!("    statement-ingest import <file.json> [client_name]");
    println!("    statement-ingest count");
    println!();
    println!("Database: DATABASE_PATH (default transactions.db)");
}

fn open_database(config: &AppConfig) -> Result<Connection> {
    let conn = Connection::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path.display()))?;
    setup_database(&conn).context("initializing schema")?;
    Ok(conn)
}

fn run_import(config: &AppConfig, path: &Path, client_name: Option<&str>) -> Result<()> {
    println!("🗄️  Statement import - JSON → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string();
    if !filename.to_lowercase().ends_with(".json") {
        bail!("Only JSON files are allowed, got {:?}", path);
    }

    // 1. Read upload
    println!("\n📂 Reading {}...", path.display());
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;

    // 2. Setup database
    let conn = open_database(config)?;
    println!("✓ Database ready: {}", config.database_path.display());

    // 3. Ingest
    println!("\n💾 Ingesting...");
    let store = SqliteStore::new(&conn);
    let report = ingest(&store, &config.ingest, &filename, &bytes, client_name)?;

    println!("✓ {}", report.message());
    println!("  Records processed: {}", report.records_processed);
    if report.batch_already_ingested {
        println!(
            "  Work order {} was already imported",
            report.batch_id.as_deref().unwrap_or("?")
        );
    }
    for failure in &report.failures {
        println!("  ⚠️  {}", failure);
    }

    // 4. Verify count
    let count = verify_count(&conn)?;
    println!("\n🔍 Database contains {} transactions", count);

    Ok(())
}

fn run_count(config: &AppConfig) -> Result<()> {
    let conn = open_database(config)?;
    let count = verify_count(&conn)?;
    println!("{}", count);
    Ok(())
}
