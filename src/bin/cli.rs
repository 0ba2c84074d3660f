//! bucketkv CLI
//!
//! Command-line access to a bucketkv store file.

use std::process::ExitCode;

use bucketkv::{Result, Store};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// bucketkv CLI
#[derive(Parser, Debug)]
#[command(name = "bucketkv-cli")]
#[command(about = "Inspect and edit a bucketkv store file")]
#[command(version)]
struct Args {
    /// Store file (created if missing)
    file: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a bucket, or write a key into one
    Add {
        bucket: String,
        #[arg(requires = "value")]
        key: Option<String>,
        value: Option<String>,
    },

    /// List buckets, keys of a bucket, or a key's value
    Get {
        bucket: Option<String>,
        key: Option<String>,
    },

    /// List a bucket's values, optionally only those containing a substring
    Val {
        bucket: String,
        substring: Option<String>,
    },

    /// Values whose key contains a substring
    Vbk { bucket: String, substring: String },

    /// Keys whose value contains a substring
    Kbv { bucket: String, substring: String },

    /// Delete a bucket, or a key from one
    Del { bucket: String, key: Option<String> },

    /// Find buckets, or keys within a bucket, containing a substring
    Find {
        /// Substring, or bucket when a second argument follows
        first: String,
        substring: Option<String>,
    },

    /// Copy the store to a new file
    Backup { destination: String },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();

    let args = Args::parse();

    let store = match Store::open(&args.file) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Could not open store file {}: {}", args.file, e);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&store, args.command);
    let closed = store.close();

    match result.and(closed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(store: &Store, command: Commands) -> Result<()> {
    match command {
        Commands::Add { bucket, key: None, .. } => store.create_bucket(&bucket),
        Commands::Add { bucket, key: Some(key), value } => {
            store.write(&bucket, &key, value.unwrap_or_default())
        }

        Commands::Get { bucket: None, .. } => print_all(store.all_buckets()?),
        Commands::Get { bucket: Some(bucket), key: None } => print_all(store.all_keys(&bucket)?),
        Commands::Get { bucket: Some(bucket), key: Some(key) } => {
            print_all(vec![store.read(&bucket, &key)?])
        }

        Commands::Val { bucket, substring: None } => print_all(store.all_values(&bucket)?),
        Commands::Val { bucket, substring: Some(s) } => print_all(store.find_values(&bucket, &s)?),

        Commands::Vbk { bucket, substring } => print_all(store.values_by_key(&bucket, &substring)?),
        Commands::Kbv { bucket, substring } => print_all(store.keys_by_value(&bucket, &substring)?),

        Commands::Del { bucket, key: None } => store.delete_bucket(&bucket),
        Commands::Del { bucket, key: Some(key) } => store.delete(&bucket, &key),

        Commands::Find { first, substring: None } => print_all(store.find_buckets(&first)?),
        Commands::Find { first, substring: Some(s) } => print_all(store.find_keys(&first, &s)?),

        Commands::Backup { destination } => {
            let bytes = store.backup(&destination)?;
            println!("Backed up {} bytes to {}", bytes, destination);
            Ok(())
        }
    }
}

fn print_all(items: Vec<Vec<u8>>) -> Result<()> {
    for item in items {
        println!("{}", String::from_utf8_lossy(&item));
    }
    Ok(())
}
