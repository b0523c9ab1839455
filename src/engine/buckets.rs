use redb::{ReadOnlyTable, ReadTransaction, ReadableTable, TableDefinition, TableError, TableHandle, WriteTransaction};

use crate::engine::Store;
use crate::{BucketEnumeration, BucketManager, Error, KVReader, KVWriter, Result};

/// Every bucket is a redb table of raw byte keys to raw byte values.
pub(crate) type BucketTable<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;

pub(crate) fn bucket_table(name: &str) -> BucketTable<'_> {
    TableDefinition::new(name)
}

fn require_name(bucket: &str) -> Result<()> {
    if bucket.is_empty() {
        return Err(Error::BucketNameRequired);
    }
    Ok(())
}

// Write transactions create tables on open, so existence has to be checked first.
fn bucket_exists(txn: &WriteTransaction, bucket: &str) -> Result<bool> {
    Ok(txn.list_tables()?.any(|table| table.name() == bucket))
}

// redb rejects empty table names, and no bucket can have one.
fn open_bucket(txn: &ReadTransaction, bucket: &str) -> Result<ReadOnlyTable<&'static [u8], &'static [u8]>> {
    if bucket.is_empty() {
        return Err(Error::BucketNotFound);
    }
    match txn.open_table(bucket_table(bucket)) {
        Ok(table) => Ok(table),
        Err(TableError::TableDoesNotExist(_)) => Err(Error::BucketNotFound),
        Err(e) => Err(e.into()),
    }
}

impl BucketManager for Store {
    fn create_bucket(&self, bucket: &str) -> Result<()> {
        require_name(bucket)?;
        self.update(|txn| {
            if bucket_exists(txn, bucket)? {
                return Err(Error::BucketExists);
            }
            txn.open_table(bucket_table(bucket))?;
            Ok(())
        })
    }

    fn create_bucket_if_not_exists(&self, bucket: &str) -> Result<()> {
        require_name(bucket)?;
        self.update(|txn| {
            txn.open_table(bucket_table(bucket))?;
            Ok(())
        })
    }

    fn delete_bucket(&self, bucket: &str) -> Result<()> {
        if bucket.is_empty() {
            return Err(Error::BucketNotFound);
        }
        self.update(|txn| {
            if txn.delete_table(bucket_table(bucket))? {
                Ok(())
            } else {
                Err(Error::BucketNotFound)
            }
        })
    }
}

impl KVReader for Store {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Vec<u8>> {
        self.view(|txn| {
            let table = open_bucket(txn, bucket)?;
            let value = table.get(key)?.map(|v| v.value().to_vec());
            Ok(value.unwrap_or_default())
        })
    }
}

impl KVWriter for Store {
    fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyRequired);
        }
        self.update(|txn| {
            if !bucket_exists(txn, bucket)? {
                return Err(Error::BucketNotFound);
            }
            let mut table = txn.open_table(bucket_table(bucket))?;
            table.insert(key, value)?;
            Ok(())
        })
    }

    fn delete(&self, bucket: &str, key: &[u8]) -> Result<()> {
        self.update(|txn| {
            if !bucket_exists(txn, bucket)? {
                return Err(Error::BucketNotFound);
            }
            let mut table = txn.open_table(bucket_table(bucket))?;
            table.remove(key)?;
            Ok(())
        })
    }
}

impl BucketEnumeration for Store {
    fn list_buckets(&self) -> Result<Vec<String>> {
        self.view(|txn| {
            let mut names: Vec<String> = txn.list_tables()?.map(|table| table.name().to_string()).collect();
            names.sort();
            Ok(names)
        })
    }

    fn list_keys(&self, bucket: &str) -> Result<Vec<Vec<u8>>> {
        self.view(|txn| {
            let table = open_bucket(txn, bucket)?;
            let mut keys = Vec::new();
            for entry in table.iter()? {
                let (key, _) = entry?;
                keys.push(key.value().to_vec());
            }
            Ok(keys)
        })
    }
}
