//! Bucket Store is an embedded, transactional key-value store served over HTTP.
//!
//! Data is organised as `Bucket -> Key -> Value`. Every request maps to exactly one
//! transaction against a single-writer, multiple-reader [`redb`] database, and every
//! response is a JSON envelope of the form `{"error": "...", "data": ...}`.
//!
//! ## Core Components
//! - [`engine`]: The storage adapter and the bucket/key operations built on it.
//! - [`server`]: HTTP gateway, response envelope and server lifecycle.
//! - [`config`]: Process configuration for the daemon.

pub mod config;
pub mod engine;
pub mod server;

use thiserror::Error;

/// Errors returned by the Bucket Store.
#[derive(Error, Debug)]
pub enum Error {
    /// The backing file could not be opened (locked, bad path, rejected permissions).
    #[error("failed to open store: {0}")]
    StoreOpen(String),
    /// A configuration value could not be parsed. Fatal at startup.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The store has already been closed.
    #[error("store is closed")]
    StoreClosed,
    /// A bucket with the requested name already exists.
    #[error("bucket already exists")]
    BucketExists,
    /// The requested bucket does not exist.
    #[error("bucket doesn't exist")]
    BucketNotFound,
    /// A bucket was created with an empty name.
    #[error("bucket name required")]
    BucketNameRequired,
    /// A value was stored under an empty key.
    #[error("key required")]
    KeyRequired,
    /// The request could not be read or decoded.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// The operation did not finish within the request deadline.
    #[error("request deadline exceeded")]
    Timeout,
    /// An unexpected fault. Details are logged, never shown to clients.
    #[error("Internal error")]
    Internal,
    /// An error reported by the storage engine.
    #[error("storage error: {0}")]
    Storage(String),
    /// An I/O error occurred while opening the store or serving requests.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

macro_rules! storage_errors {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(e: $ty) -> Self {
                    Error::Storage(e.to_string())
                }
            }
        )*
    };
}

storage_errors!(
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// A specialized Result type for Bucket Store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Creates and removes buckets.
pub trait BucketManager: Send + Sync {
    /// Creates a new bucket. Fails with [`Error::BucketExists`] if it is already present.
    fn create_bucket(&self, bucket: &str) -> Result<()>;
    /// Creates a bucket if it is absent, otherwise does nothing.
    fn create_bucket_if_not_exists(&self, bucket: &str) -> Result<()>;
    /// Removes a bucket and every entry in it.
    fn delete_bucket(&self, bucket: &str) -> Result<()>;
}

/// Defines basic read operations for the store.
pub trait KVReader: Send + Sync {
    /// Returns the value stored under `key`, or an empty value if the key is absent.
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Vec<u8>>;
}

/// Defines basic write and delete operations for the store.
pub trait KVWriter: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()>;
    /// Removes `key` from the bucket. Removing an absent key succeeds.
    fn delete(&self, bucket: &str, key: &[u8]) -> Result<()>;
}

/// Allows discovering buckets and keys within the store.
pub trait BucketEnumeration: Send + Sync {
    /// Lists all bucket names in lexicographic order.
    fn list_buckets(&self) -> Result<Vec<String>>;
    /// Lists all keys of a bucket in lexicographic order.
    fn list_keys(&self, bucket: &str) -> Result<Vec<Vec<u8>>>;
}

/// The primary interface for interacting with the Bucket Store.
pub trait BucketStore: BucketManager + KVReader + KVWriter + BucketEnumeration {}

impl<T: BucketManager + KVReader + KVWriter + BucketEnumeration> BucketStore for T {}
