use bucket_store::config::{parse_file_mode, DEFAULT_DB_PATH, DEFAULT_FILE_MODE, ENV_DB_PATH};
use bucket_store::engine::Store;
use bucket_store::{BucketEnumeration, BucketManager, KVReader, KVWriter};
use clap::{Parser, Subcommand};
use std::io::Read;

/// Runs bucket/key operations directly against a store file.
///
/// The file is locked while open, so this fails while `bucket-stored` is serving it.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, env = ENV_DB_PATH, default_value = DEFAULT_DB_PATH)]
    db: String,

    /// Octal permission bits for a newly created store file.
    #[arg(short, long)]
    mode: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    CreateBucket { bucket: String },
    CreateBucketIfNotExists { bucket: String },
    DeleteBucket { bucket: String },
    /// Stores a value; reads it from stdin when omitted.
    Put { bucket: String, key: String, value: Option<String> },
    Get { bucket: String, key: String },
    Del { bucket: String, key: String },
    ListBuckets,
    ListKeys { bucket: String },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mode = match &cli.mode {
        Some(raw) => parse_file_mode(raw)?,
        None => DEFAULT_FILE_MODE,
    };
    let store = Store::open(&cli.db, mode)?;
    let result = execute(&store, cli.command);
    store.close()?;
    result
}

fn execute(store: &Store, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::CreateBucket { bucket } => {
            store.create_bucket(&bucket)?;
            println!("OK");
        }
        Commands::CreateBucketIfNotExists { bucket } => {
            store.create_bucket_if_not_exists(&bucket)?;
            println!("OK");
        }
        Commands::DeleteBucket { bucket } => {
            store.delete_bucket(&bucket)?;
            println!("OK");
        }
        Commands::Put { bucket, key, value } => {
            let value = match value {
                Some(v) => v.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };
            store.put(&bucket, key.as_bytes(), &value)?;
            println!("OK");
        }
        Commands::Get { bucket, key } => {
            let val = store.get(&bucket, key.as_bytes())?;
            println!("{}", String::from_utf8_lossy(&val));
        }
        Commands::Del { bucket, key } => {
            store.delete(&bucket, key.as_bytes())?;
            println!("OK");
        }
        Commands::ListBuckets => {
            let list = store.list_buckets()?;
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        Commands::ListKeys { bucket } => {
            let keys: Vec<String> = store
                .list_keys(&bucket)?
                .iter()
                .map(|k| String::from_utf8_lossy(k).into_owned())
                .collect();
            println!("{}", serde_json::to_string_pretty(&keys)?);
        }
    }

    Ok(())
}
