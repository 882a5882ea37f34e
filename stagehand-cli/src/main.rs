//! Stagehand CLI
//!
//! Command-line access to dynamic table creation, staged bulk inserts, flushes and
//! metadata introspection. Definitions and queries are passed as camelCase JSON, either
//! inline or as `@path/to/file.json`.

mod rows;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use stagehand::definition::{IndexDefinition, TableDefinition};
use stagehand::query::SelectQuerySpec;
use stagehand::{
    connect, MayPostgresExecutor, SqlBuilder, SqlDialect, StagehandConfig, StagehandError,
    TableService,
};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Dynamic tables, staged bulk writes and flushes for PostgreSQL")]
#[command(version)]
struct Cli {
    /// Database connection URL
    #[arg(long)]
    database_url: Option<String>,

    /// Rows per insert statement and per flush (overrides flush.batch_size)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a table (and its staging table when `isStaging` is set) with its indexes
    CreateTable {
        /// TableDefinition JSON, or @file
        #[arg(long)]
        definition: String,

        /// Print the DDL without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Create one index on an existing table
    CreateIndex {
        #[arg(long, default_value = "public")]
        schema: String,

        #[arg(long)]
        table: String,

        /// IndexDefinition JSON, or @file
        #[arg(long)]
        definition: String,

        /// Print the DDL without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Run a select and print the rows as JSON
    Select {
        /// SelectQuerySpec JSON, or @file
        #[arg(long)]
        query: String,

        /// Print the SQL without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Insert rows from a JSON or CSV file
    Insert {
        #[arg(long, default_value = "public")]
        schema: String,

        #[arg(long)]
        table: String,

        /// `.json` (array of objects) or `.csv` (header row required)
        #[arg(long)]
        file: PathBuf,
    },

    /// Promote staged rows into the actual table
    Flush {
        #[arg(long, default_value = "public")]
        schema: String,

        #[arg(long)]
        table: String,

        /// Keep flushing until staging is empty (move mode only)
        #[arg(long)]
        drain: bool,
    },

    /// Print the resolved table definition as JSON
    Describe {
        #[arg(long, default_value = "public")]
        schema: String,

        #[arg(long)]
        table: String,

        /// Include index definitions
        #[arg(long)]
        indexes: bool,
    },

    /// Snapshot table and staging metadata from the catalog
    WarmMetadata,
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let quiet = cli.quiet;
    match run(cli) {
        Ok(()) => {
            if !quiet {
                eprintln!("{}", "✅ Success".green());
            }
        }
        Err(e) => {
            eprintln!("{} {:#}", "❌ Error:".red().bold(), e);
            process::exit(exit_code(&e));
        }
    }
}

/// 2 for request mistakes, 1 for everything else.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<StagehandError>() {
        Some(e) if e.is_client_error() => 2,
        _ => 1,
    }
}

fn load_config(cli: &Cli) -> Result<StagehandConfig> {
    let mut config = StagehandConfig::load()?;

    let env_url = std::env::var("STAGEHAND__DATABASE__URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok();
    if let Some(url) = cli.database_url.clone().or(env_url) {
        config.database.url = url;
    }
    if let Some(batch_size) = cli.batch_size {
        config.flush.batch_size = batch_size;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let builder: &dyn SqlBuilder = SqlDialect::from_name(&config.database.dialect)?.builder();
    let quiet = cli.quiet;

    match cli.command {
        Commands::CreateTable { definition, dry_run } => {
            let def: TableDefinition = parse_json_arg("table definition", &definition)?;
            if dry_run {
                return print_statements(&builder.build_table_ddl(&def)?);
            }
            service(&config)?.create_table(&def)?;
            status(
                quiet,
                format!("Created {}.{}", def.schema_name, def.table_name),
            );
        }
        Commands::CreateIndex {
            schema,
            table,
            definition,
            dry_run,
        } => {
            let index: IndexDefinition = parse_json_arg("index definition", &definition)?;
            if dry_run {
                return print_statements(&[builder.build_create_index(&schema, &table, &index)?]);
            }
            service(&config)?.create_index(&schema, &table, &index)?;
            status(
                quiet,
                format!("Created index {} on {schema}.{table}", index.name_for(&table)),
            );
        }
        Commands::Select { query, dry_run } => {
            let spec: SelectQuerySpec = parse_json_arg("select query", &query)?;
            if dry_run {
                return print_statements(&[builder.build_select(&spec)?]);
            }
            let rows = service(&config)?.select(&spec)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Insert {
            schema,
            table,
            file,
        } => handle_insert(&config, quiet, &schema, &table, &file)?,
        Commands::Flush {
            schema,
            table,
            drain,
        } => {
            let svc = service(&config)?;
            let promoted = if drain {
                svc.drain(&schema, &table)?
            } else {
                svc.flush(&schema, &table)?
            };
            status(
                quiet,
                format!("Promoted {promoted} row(s) into {schema}.{table}"),
            );
        }
        Commands::Describe {
            schema,
            table,
            indexes,
        } => {
            let def = service(&config)?.resolve_definition(&schema, &table, indexes)?;
            println!("{}", serde_json::to_string_pretty(def.as_ref())?);
        }
        Commands::WarmMetadata => {
            let svc = service(&config)?;
            svc.warm_up()?;
            let registry = svc.resolver().registry();
            status(
                quiet,
                format!(
                    "Loaded {} table(s) and {} staging table(s)",
                    registry.table_count(),
                    registry.staging_count()
                ),
            );
        }
    }

    Ok(())
}

fn handle_insert(
    config: &StagehandConfig,
    quiet: bool,
    schema: &str,
    table: &str,
    file: &std::path::Path,
) -> Result<()> {
    let rows = rows::load(file)?;
    let summary = service(config)?.insert_rows(schema, table, &rows)?;
    status(
        quiet,
        format!(
            "Inserted {} row(s) into {schema}.{table} ({:?} table, {} chunk(s))",
            summary.rows_written, summary.target, summary.chunks
        ),
    );
    Ok(())
}

fn service(config: &StagehandConfig) -> Result<TableService<MayPostgresExecutor>> {
    let client = connect(&config.database.url).context("Error connecting to database")?;
    Ok(TableService::new(MayPostgresExecutor::new(client), config)?)
}

/// Inline JSON, or `@path` to read it from a file.
fn parse_json_arg<T: serde::de::DeserializeOwned>(what: &str, arg: &str) -> Result<T> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {what} from {path}"))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).with_context(|| format!("Invalid {what} JSON"))
}

fn print_statements(statements: &[String]) -> Result<()> {
    for sql in statements {
        println!("{sql}");
    }
    Ok(())
}

fn status(quiet: bool, message: String) {
    if !quiet {
        eprintln!("{} {}", "→".cyan(), message);
    }
}
