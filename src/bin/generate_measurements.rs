// Measurement File Generator
// Writes random station;temperature records for benchmarks and manual runs

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

const STATIONS: &[&str] = &[
    "Abha", "Abidjan", "Accra", "Addis Ababa", "Adelaide", "Alexandria", "Amsterdam", "Anchorage",
    "Athens", "Auckland", "Baghdad", "Bangkok", "Barcelona", "Beijing", "Belgrade", "Berlin",
    "Bogotá", "Boston", "Bulawayo", "Cairo", "Cape Town", "Chicago", "Copenhagen", "Dakar",
    "Dhaka", "Dublin", "Hamburg", "Helsinki", "Istanbul", "Jakarta", "Kampala", "Kyiv", "Lima",
    "London", "Madrid", "Marrakesh", "Mexico City", "Montreal", "Moscow", "Nairobi", "Oslo",
    "Palembang", "Paris", "Reykjavík", "Riga", "São Paulo", "Seoul", "St. John's", "Sydney",
    "Tokyo", "Toronto", "Ulaanbaatar", "Vienna", "Warsaw", "Yakutsk", "Zagreb", "Zürich",
];

#[derive(Parser, Debug)]
#[command(name = "generate_measurements")]
#[command(about = "Generate a station;temperature measurement file")]
struct Args {
    /// Output file path
    #[arg(default_value = "samples/measurements.txt")]
    output: PathBuf,

    /// Number of records to write
    #[arg(long, default_value_t = 1_000_000)]
    records: u64,

    /// RNG seed for reproducible files
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file = File::create(&args.output)
        .await
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let mut writer = BufWriter::with_capacity(1 << 20, file);
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut line = String::with_capacity(64);

    for _ in 0..args.records {
        let station = STATIONS[rng.random_range(0..STATIONS.len())];
        let tenths: i32 = rng.random_range(-999..=999);
        line.clear();
        line.push_str(station);
        line.push(';');
        if tenths < 0 {
            line.push('-');
        }
        line.push_str(&format!("{}.{}\n", tenths.abs() / 10, tenths.abs() % 10));
        writer.write_all(line.as_bytes()).await?;
    }

    writer.flush().await?;
    println!("Wrote {} records to {}", args.records, args.output.display());
    Ok(())
}
