pub mod buckets;
pub mod store;

pub use store::Store;
