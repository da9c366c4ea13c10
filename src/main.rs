//! jsondb — CLI entry point.
//!
//! Thin administration shell over the library: create servers,
//! databases and tables, and run queries against a database tree on
//! disk. Result rows print as JSON lines; mutations print `true`.

use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use jsondb::{ColumnSchema, JsonDb, QueryOutput};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// jsondb — embedded JSON database with a dotted query language
#[derive(Parser, Debug)]
#[command(name = "jsondb", version, about)]
struct Args {
    /// Root directory of the database tree
    #[arg(long, env = "JSONDB_ROOT", default_value = ".")]
    root: PathBuf,

    /// Server name
    #[arg(long, env = "JSONDB_SERVER")]
    server: Option<String>,

    /// Username
    #[arg(long, env = "JSONDB_USER", default_value = "root")]
    user: String,

    /// Password
    #[arg(long, env = "JSONDB_PASSWORD", default_value = "")]
    password: String,

    /// Working database
    #[arg(long, env = "JSONDB_DATABASE")]
    database: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "JSONDB_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a server directory and register its credentials
    CreateServer {
        /// Server name
        name: String,
    },
    /// Create a database on the server
    CreateDatabase {
        /// Database name
        name: String,
    },
    /// Create a table from a JSON object of column schemas
    CreateTable {
        /// Table name
        name: String,
        /// Column schemas, e.g.
        /// '{"id":{"type":"int","auto_increment":true,"primary_key":true}}'
        schema: String,
    },
    /// Execute a query and print its result
    Query {
        /// Query text, e.g. "users.select(*).limit(0,10)"
        text: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("jsondb={}", args.log_level))),
        )
        .init();

    let db = JsonDb::new(&args.root);

    if let Command::CreateServer { name } = &args.command {
        db.create_server(name, &args.user, &args.password)?;
        println!("true");
        return Ok(());
    }

    let server = args
        .server
        .as_deref()
        .ok_or("--server (or JSONDB_SERVER) is required")?;
    let session = db.connect(server, &args.user, &args.password, args.database.as_deref())?;

    match args.command {
        Command::CreateServer { .. } => unreachable!("handled above"),
        Command::CreateDatabase { name } => {
            session.create_database(&name)?;
            println!("true");
        }
        Command::CreateTable { name, schema } => {
            let columns: IndexMap<String, ColumnSchema> = serde_json::from_str(&schema)?;
            session.create_table(&name, columns)?;
            println!("true");
        }
        Command::Query { text } => match session.query(&text)? {
            QueryOutput::Rows(result) => {
                tracing::debug!(
                    elapsed_ms = result.elapsed().as_millis() as u64,
                    rows = result.len(),
                    "query finished"
                );
                for row in &result {
                    println!("{}", serde_json::to_string(row)?);
                }
            }
            QueryOutput::Mutated(ok) => println!("{ok}"),
        },
    }

    Ok(())
}
