use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use log::{info, warn};
use redb::{Database, ReadTransaction, WriteTransaction};

use crate::{Error, Result};

/// Handle to the file-backed [`redb`] database.
///
/// The database allows one write transaction at a time and any number of readers,
/// each reading the last committed snapshot. `Store` only adds the open/close
/// lifecycle on top: once [`Store::close`] has run, every transaction fails with
/// [`Error::StoreClosed`].
pub struct Store {
    db: RwLock<Option<Database>>,
    path: PathBuf,
}

impl Store {
    /// Opens or creates the store file at `path`.
    ///
    /// On Unix a new file is created with the permission bits in `mode`. Fails with
    /// [`Error::StoreOpen`] if the path is unusable or another handle holds the file lock.
    pub fn open<P: AsRef<Path>>(path: P, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_err = |e: &dyn std::fmt::Display| Error::StoreOpen(format!("{}: {}", path.display(), e));

        let file = open_file(&path, mode).map_err(|e| open_err(&e))?;
        let db = redb::Builder::new()
            .create_file(file)
            .map_err(|e| open_err(&e))?;

        info!("Opened store at {}", path.display());
        Ok(Self {
            db: RwLock::new(Some(db)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.db.read().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Runs `work` against a read-only snapshot.
    pub fn view<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&ReadTransaction) -> Result<T>,
    {
        let guard = self.db.read().unwrap_or_else(PoisonError::into_inner);
        let db = guard.as_ref().ok_or(Error::StoreClosed)?;
        let txn = db.begin_read()?;
        work(&txn)
    }

    /// Runs `work` with exclusive write access.
    ///
    /// The transaction is committed durably before this returns `Ok`. If `work` fails,
    /// it is rolled back and the error is returned unchanged.
    pub fn update<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce(&WriteTransaction) -> Result<()>,
    {
        let guard = self.db.read().unwrap_or_else(PoisonError::into_inner);
        let db = guard.as_ref().ok_or(Error::StoreClosed)?;
        let txn = db.begin_write()?;

        match work(&txn) {
            Ok(()) => {
                txn.commit()?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = txn.abort() {
                    warn!("Failed to roll back transaction on {}: {}", self.path.display(), abort_err);
                }
                Err(e)
            }
        }
    }

    /// Releases the database and its file lock.
    ///
    /// Waits for in-flight transactions. A second call returns [`Error::StoreClosed`].
    pub fn close(&self) -> Result<()> {
        let mut guard = self.db.write().unwrap_or_else(PoisonError::into_inner);
        match guard.take() {
            Some(db) => {
                drop(db);
                info!("Closed store at {}", self.path.display());
                Ok(())
            }
            None => Err(Error::StoreClosed),
        }
    }
}

fn open_file(path: &Path, mode: u32) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    options.open(path)
}
