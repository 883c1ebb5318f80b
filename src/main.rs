use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sheetql::config::StoreConfig;
use sheetql::registry::FileRegistry;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "sheetql")]
#[command(about = "Tabular file ingestion and persistent SQL store")]
struct Cli {
    /// Root directory for uploads, schemas, metadata and the database
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// Override the maximum number of registered files
    #[arg(long)]
    max_files: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a spreadsheet or CSV file
    Upload { path: PathBuf },
    /// Show every registered file and its schema
    Status,
    /// List physical tables in the relational store
    Tables,
    /// Delete one registered file by id
    Delete { file_id: String },
    /// Delete every registered file
    DeleteAll,
    /// Rebuild the relational store from the registry
    Rebuild,
    /// Print the aggregate schema digest for SQL generation
    Summary,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut config = StoreConfig::new(&cli.data_dir);
    if let Some(max_files) = cli.max_files {
        config = config.with_max_files(max_files);
    }

    info!("Opening registry at {}", cli.data_dir.display());
    let registry = FileRegistry::open(config)?;

    match cli.command {
        Command::Upload { path } => {
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .context("Upload path has no filename")?
                .to_string();
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let receipt = registry.upload(&filename, &bytes)?;
            println!(
                "Uploaded '{}' as table '{}' ({} rows, {} columns) [{}/{} files]",
                receipt.original_filename,
                receipt.table_name,
                receipt.row_count,
                receipt.column_count,
                receipt.total_files,
                receipt.max_files
            );
            println!("file_id: {}", receipt.file_id);
        }
        Command::Status => {
            let snapshot = registry.status();
            if !snapshot.has_files {
                println!("No files uploaded ({} max).", snapshot.max_files);
            } else {
                println!(
                    "{} of {} file slot(s) in use:",
                    snapshot.total_files, snapshot.max_files
                );
                for entry in &snapshot.files {
                    println!(
                        "  {}  {}  (table: {}, uploaded: {})",
                        entry.metadata.file_id,
                        entry.metadata.original_filename,
                        entry.metadata.table_name,
                        entry.metadata.uploaded_at
                    );
                }
            }
        }
        Command::Tables => {
            for table in registry.list_tables()? {
                println!("{}", table);
            }
        }
        Command::Delete { file_id } => {
            let filename = registry.delete(&file_id)?;
            println!("Deleted '{}' ({})", filename, file_id);
        }
        Command::DeleteAll => {
            let deleted = registry.delete_all();
            println!("Deleted {} file(s)", deleted);
        }
        Command::Rebuild => {
            let report = registry.rebuild_store()?;
            println!("Reloaded {}/{} file(s)", report.loaded, report.attempted);
        }
        Command::Summary => {
            println!("{}", registry.aggregate_summary());
        }
    }

    Ok(())
}
