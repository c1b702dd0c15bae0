use std::path::PathBuf;

use tether::local_storage::summarize_blob;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <path-to-exported-blob.json>", args[0]);
        eprintln!("\nExport the blob from the browser console with:");
        eprintln!("  copy(localStorage.getItem('appData'))");
        std::process::exit(1);
    }

    let file_path = PathBuf::from(&args[1]);
    let text = match std::fs::read_to_string(&file_path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", file_path.display(), e);
            std::process::exit(1);
        }
    };

    let summary = match summarize_blob(&text) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error parsing '{}': {}", file_path.display(), e);
            std::process::exit(1);
        }
    };

    println!("TetherScope - local data blob");
    println!("=============================");
    println!("File: {}", file_path.display());
    println!("Size: {} bytes", text.len());
    println!();

    println!("Meta:");
    println!("-----");
    match &summary.meta {
        Some(meta) => {
            println!("  seeded:     {}", meta.seeded);
            if let (Some(by), Some(at)) = (&meta.seeded_by, meta.seeded_at) {
                println!("  seeded by:  {by} at {at}");
            }
            if let (Some(by), Some(at)) = (&meta.claimed_by, meta.claimed_at) {
                println!("  claimed by: {by} at {at}");
            }
            if let Some(at) = meta.last_updated {
                println!("  updated:    {at}");
            }
        }
        None => println!("  (none)"),
    }
    println!();

    println!("Datasets:");
    println!("---------");
    if summary.datasets.is_empty() {
        println!("  No versioned datasets found (legacy layout or empty blob)");
    }
    for dataset in &summary.datasets {
        println!(
            "  {:<12} v{:<4} {:>8} bytes  by {} at {}",
            dataset.key, dataset.version, dataset.bytes, dataset.updated_by, dataset.updated_at
        );
    }
}
