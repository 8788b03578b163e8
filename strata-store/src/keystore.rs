//! The redb-backed document table.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use strata_model::PeerId;
use tracing::debug;

use crate::record::{decode_row, encode_row, ContentLevel, Record, RecordUpdate};
use crate::Result;
use crate::StoreError;

const TABLE_DOCS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("docs");
const TABLE_META: TableDefinition<&[u8], &[u8]> = TableDefinition::new("meta");

const KEY_LAST_SEQUENCE: &[u8] = b"last_sequence";
const KEY_PEER_ID: &[u8] = b"peer_id";

/// Open-time options.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreConfig {
    pub read_only: bool,
    /// Refuse in-place versioning upgrades.
    pub no_upgrade: bool,
}

/// A write transaction. All mutations go through one; committing is
/// explicit, and dropping without commit rolls everything back.
pub struct Transaction {
    inner: redb::WriteTransaction,
}

impl Transaction {
    pub fn commit(self) -> Result<()> {
        self.inner.commit()?;
        Ok(())
    }

    pub fn abort(self) -> Result<()> {
        self.inner.abort()?;
        Ok(())
    }
}

/// The document store: one redb table of records plus a meta table holding
/// the sequence counter and this database's peer ID.
pub struct KeyStore {
    db: Database,
    config: StoreConfig,
    my_peer: PeerId,
}

impl KeyStore {
    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<KeyStore> {
        let db = Database::create(path.as_ref())?;

        // Ensure tables exist and the peer ID is assigned:
        let txn = db.begin_write()?;
        let my_peer;
        {
            txn.open_table(TABLE_DOCS)?;
            let mut meta = txn.open_table(TABLE_META)?;
            let existing = meta
                .get(KEY_PEER_ID)?
                .and_then(|v| <[u8; 8]>::try_from(v.value()).ok())
                .map(u64::from_le_bytes);
            my_peer = match existing {
                Some(id) => PeerId(id),
                None => {
                    let mut id: u64 = rand::random();
                    while id == 0 {
                        id = rand::random();
                    }
                    meta.insert(KEY_PEER_ID, id.to_le_bytes().as_slice())?;
                    PeerId(id)
                }
            };
        }
        txn.commit()?;

        debug!(peer = %my_peer, "opened key store");
        Ok(KeyStore { db, config, my_peer })
    }

    /// The peer ID this database authors versions as, once bound.
    pub fn my_peer(&self) -> PeerId {
        self.my_peer
    }

    pub fn read_only(&self) -> bool {
        self.config.read_only
    }

    pub fn no_upgrade(&self) -> bool {
        self.config.no_upgrade
    }

    /// Begin a write transaction. Refused on read-only stores.
    pub fn begin_transaction(&self) -> Result<Transaction> {
        if self.config.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(Transaction { inner: self.db.begin_write()? })
    }

    /// Read a record, materializing content up to `level`. Missing keys
    /// come back as a non-existent `Record`, not an error.
    pub fn get(&self, key: &str, level: ContentLevel) -> Result<Record> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(TABLE_DOCS) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Record::new(key)),
            Err(e) => return Err(e.into()),
        };
        match table.get(key.as_bytes())? {
            Some(value) => Ok(decode_row(key, value.value(), level)?),
            None => Ok(Record::new(key)),
        }
    }

    /// Write a record within `txn`.
    ///
    /// The update's `sequence` must match the stored row (0 for a new key);
    /// on mismatch nothing is written and 0 is returned, the MVCC conflict
    /// signal. Otherwise returns the record's sequence, freshly assigned
    /// when `update_sequence` is set.
    pub fn set(&self, update: &RecordUpdate<'_>, txn: &mut Transaction) -> Result<u64> {
        let mut table = txn.inner.open_table(TABLE_DOCS)?;
        let base_sequence = match table.get(update.key.as_bytes())? {
            Some(value) => decode_row(update.key, value.value(), ContentLevel::MetaOnly)?.sequence,
            None => 0,
        };
        if base_sequence != update.sequence {
            debug!(
                key = update.key,
                expected = update.sequence,
                actual = base_sequence,
                "MVCC conflict on set"
            );
            return Ok(0);
        }

        let sequence = if update.update_sequence || update.sequence == 0 {
            let mut meta = txn.inner.open_table(TABLE_META)?;
            let last = meta
                .get(KEY_LAST_SEQUENCE)?
                .and_then(|v| <[u8; 8]>::try_from(v.value()).ok())
                .map(u64::from_le_bytes)
                .unwrap_or(0);
            let next = last + 1;
            meta.insert(KEY_LAST_SEQUENCE, next.to_le_bytes().as_slice())?;
            next
        } else {
            update.sequence
        };

        let row = encode_row(update, sequence);
        table.insert(update.key.as_bytes(), row.as_slice())?;
        Ok(sequence)
    }

    /// Physically delete a record. Returns whether it existed.
    pub fn purge(&self, key: &str, txn: &mut Transaction) -> Result<bool> {
        let mut table = txn.inner.open_table(TABLE_DOCS)?;
        let existed = table.remove(key.as_bytes())?.is_some();
        Ok(existed)
    }

    /// The highest sequence the store has assigned.
    pub fn last_sequence(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let meta = match txn.open_table(TABLE_META) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        Ok(meta
            .get(KEY_LAST_SEQUENCE)?
            .and_then(|v| <[u8; 8]>::try_from(v.value()).ok())
            .map(u64::from_le_bytes)
            .unwrap_or(0))
    }

    /// Visit every record, unsorted, deletions included. The visitor returns
    /// `Ok(true)` to continue, `Ok(false)` to stop.
    pub fn enumerate<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(Record) -> Result<bool>,
    {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(TABLE_DOCS) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in table.iter()? {
            let (key_guard, value_guard) = entry?;
            let key = String::from_utf8_lossy(key_guard.value()).into_owned();
            let record = decode_row(&key, value_guard.value(), ContentLevel::Entire)?;
            if !visitor(record)? {
                break;
            }
        }
        Ok(())
    }

    /// Load each key's record (entire content) and collect the callback's
    /// output per key, in input order. Missing documents are passed through
    /// as non-existent records.
    pub fn with_doc_bodies<F>(&self, keys: &[&str], mut callback: F) -> Result<Vec<Vec<u8>>>
    where
        F: FnMut(&Record) -> Result<Vec<u8>>,
    {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let record = self.get(key, ContentLevel::Entire)?;
            results.push(callback(&record)?);
        }
        Ok(results)
    }
}
