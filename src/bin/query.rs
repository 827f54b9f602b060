use std::path::PathBuf;

use clap::Parser;
use tickwise::storage::SqliteExporter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect rounds stored by the sqlite exporter", long_about = None)]
struct Args {
    /// Database file, defaults to ~/.tickwise/tickwise.db
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Number of latest rounds to show
    #[arg(short, long, default_value = "5")]
    limit: usize,

    /// Output format: compact (one line per round) or verbose (with records)
    #[arg(short, long, default_value = "compact")]
    format: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let storage = SqliteExporter::new(args.db);

    if !storage.db_path().exists() {
        eprintln!("No database at {}. Run the collector with exporter = \"sqlite\" first.", storage.db_path().display());
        std::process::exit(1);
    }

    let stats = storage.stats()?;
    println!("Database Statistics:");
    println!("  Total metrics: {}", stats.total_metrics);
    println!("  Collection rounds: {}", stats.total_collection_rounds);
    if let Some(size) = stats.database_size_bytes {
        println!("  Database size: {:.2} KB", size as f64 / 1024.0);
    }
    println!();

    let rounds = storage.latest_rounds(args.limit)?;
    match args.format.as_str() {
        "compact" => {
            for round in &rounds {
                println!(
                    "{} {} ({} metrics)",
                    round.short_id(),
                    round.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                    round.metrics_count
                );
            }
        }
        "verbose" => {
            for round in &rounds {
                println!("Collection Round: {}", round.id);
                println!("Timestamp: {}", round.timestamp);
                for record in storage.records_for_round(&round.id)? {
                    println!("  {} = {:?} {:?}", record.name, record.value, record.labels);
                }
                println!("---");
            }
        }
        _ => {
            eprintln!("Error: Invalid format '{}'. Use 'compact' or 'verbose'", args.format);
            std::process::exit(1);
        }
    }

    Ok(())
}
