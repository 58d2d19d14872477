use std::convert::TryInto;
use std::sync::Arc;

use crate::{
    btree::{BtreeCtx, RecordRef},
    config::{self, RecordNumber},
    env::{apply_erase, apply_insert, DbState, EnvInner},
    error::{ErrorCode, OakError},
    storage::Changeset,
    txn::{OpKind, Transaction},
    types::{OakResult, Pod},
    utils::HandyRwLock,
};

/// A handle to one named database of an environment.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<EnvInner>,
    pub(crate) name: u16,
}

impl Database {
    pub fn name(&self) -> u16 {
        self.name
    }

    /// Inserts (or with the right flags: overwrites, duplicates) one
    /// key/record pair. Without a transaction the operation runs as
    /// its own atomic unit.
    pub fn insert(
        &self,
        txn: Option<&Transaction>,
        key: &[u8],
        record: &[u8],
        flags: u32,
    ) -> OakResult {
        let _guard = self.inner.mutex.lock().unwrap();
        let result = self.insert_locked(txn, key, record, flags);
        self.inner.latch(result)
    }

    /// Point lookup. The transaction's own buffered writes win over
    /// the btree; a buffered write of another live transaction is a
    /// conflict.
    pub fn find(&self, txn: Option<&Transaction>, key: &[u8]) -> Result<Vec<u8>, OakError> {
        let _guard = self.inner.mutex.lock().unwrap();
        let result = self.find_locked(txn, key);
        self.inner.latch(result)
    }

    /// Lookup with approximate matching: `FIND_LT_MATCH` returns the
    /// nearest-smaller, `FIND_GT_MATCH` the nearest-greater entry.
    /// Returns the matched key and its record.
    pub fn find_approx(
        &self,
        txn: Option<&Transaction>,
        key: &[u8],
        flags: u32,
    ) -> Result<(Vec<u8>, Vec<u8>), OakError> {
        let _guard = self.inner.mutex.lock().unwrap();
        self.inner.check_fatal()?;
        let db_pod = self.inner.db_state(self.name)?;
        let caller = txn.map(|t| t.id).unwrap_or(0);
        self.ensure_no_live_ops(&db_pod, key, caller)?;

        let mut pm = self.inner.page_manager.wl();
        let db = db_pod.rl();
        let mut cs = Changeset::new();
        let mut ctx = BtreeCtx {
            pm: &mut pm,
            blob: &self.inner.blob_manager,
            cs: &mut cs,
        };
        let (leaf, slot, found_key) = db.btree.find_entry(&mut ctx, key, flags)?;
        let (_, rref) = db.btree.leaf_entry(&mut ctx, leaf, slot)?;
        let record = db.btree.resolve_record(&mut ctx, &rref, 0)?;
        Ok((found_key, record))
    }

    /// Erases a key and all of its duplicates.
    pub fn erase(&self, txn: Option<&Transaction>, key: &[u8]) -> OakResult {
        let _guard = self.inner.mutex.lock().unwrap();
        let result = self.erase_locked(txn, key, None);
        self.inner.latch(result)
    }

    /// Erases one duplicate of a key by its index.
    pub fn erase_duplicate(
        &self,
        txn: Option<&Transaction>,
        key: &[u8],
        dup_idx: u32,
    ) -> OakResult {
        let _guard = self.inner.mutex.lock().unwrap();
        let result = self.erase_locked(txn, key, Some(dup_idx));
        self.inner.latch(result)
    }

    /// Number of keys (`distinct`) or key/duplicate records.
    pub fn count(&self, distinct: bool) -> Result<u64, OakError> {
        let _guard = self.inner.mutex.lock().unwrap();
        self.inner.check_fatal()?;
        let db_pod = self.inner.db_state(self.name)?;

        let mut pm = self.inner.page_manager.wl();
        let db = db_pod.rl();
        let mut cs = Changeset::new();
        let mut ctx = BtreeCtx {
            pm: &mut pm,
            blob: &self.inner.blob_manager,
            cs: &mut cs,
        };
        db.btree.count(&mut ctx, distinct)
    }

    /// How many records one key holds (1, or the duplicate count).
    pub fn record_count(&self, key: &[u8]) -> Result<u64, OakError> {
        let _guard = self.inner.mutex.lock().unwrap();
        self.inner.check_fatal()?;
        let db_pod = self.inner.db_state(self.name)?;

        let mut pm = self.inner.page_manager.wl();
        let db = db_pod.rl();
        let mut cs = Changeset::new();
        let mut ctx = BtreeCtx {
            pm: &mut pm,
            blob: &self.inner.blob_manager,
            cs: &mut cs,
        };
        db.btree.record_count(&mut ctx, key)
    }

    /// Reads `size` bytes of the record starting at `offset`.
    pub fn partial_read(&self, key: &[u8], offset: u64, size: u64) -> Result<Vec<u8>, OakError> {
        let _guard = self.inner.mutex.lock().unwrap();
        self.inner.check_fatal()?;
        let db_pod = self.inner.db_state(self.name)?;
        self.ensure_no_live_ops(&db_pod, key, 0)?;

        let rref = self.record_ref(&db_pod, key)?;
        let full_size = self.record_size_of(&db_pod, &rref)?;
        if offset == 0 && size == full_size {
            // promoted to a full read
            return self.resolve(&db_pod, &rref, 0);
        }

        match rref {
            RecordRef::Blob(id) => {
                let mut pm = self.inner.page_manager.wl();
                self.inner.blob_manager.read_partial(&mut pm, id, offset, size)
            }
            rref => {
                let full = self.resolve(&db_pod, &rref, 0)?;
                let start = offset as usize;
                let end = start + size as usize;
                if end > full.len() {
                    return Err(OakError::invalid_parameter(
                        "partial read beyond record size",
                    ));
                }
                Ok(full[start..end].to_vec())
            }
        }
    }

    /// Overwrites the byte window `[offset, offset + data.len())` of
    /// the record. Bytes outside the window are unchanged; a window
    /// beyond the current size zero-fills the gap. A missing key
    /// creates a zero-filled record.
    pub fn partial_overwrite(&self, key: &[u8], offset: u64, data: &[u8]) -> OakResult {
        let _guard = self.inner.mutex.lock().unwrap();
        let result = self.partial_overwrite_locked(key, offset, data);
        self.inner.latch(result)
    }

    pub fn cursor(&self) -> Result<Cursor, OakError> {
        let _guard = self.inner.mutex.lock().unwrap();
        self.inner.check_fatal()?;
        let db_pod = self.inner.db_state(self.name)?;
        db_pod.wl().open_cursors += 1;
        Ok(Cursor {
            db: self.clone(),
            position: None,
        })
    }

    pub fn check_integrity(&self) -> OakResult {
        let _guard = self.inner.mutex.lock().unwrap();
        self.inner.check_fatal()?;
        let db_pod = self.inner.db_state(self.name)?;

        let mut pm = self.inner.page_manager.wl();
        let db = db_pod.rl();
        let mut cs = Changeset::new();
        let mut ctx = BtreeCtx {
            pm: &mut pm,
            blob: &self.inner.blob_manager,
            cs: &mut cs,
        };
        let result = db.btree.check_integrity(&mut ctx);
        drop(pm);
        drop(db);
        self.inner.latch(result)
    }

    // ------------------------------------------------------------------
    // locked implementations
    // ------------------------------------------------------------------

    fn insert_locked(
        &self,
        txn: Option<&Transaction>,
        key: &[u8],
        record: &[u8],
        flags: u32,
    ) -> OakResult {
        self.inner.check_fatal()?;
        let db_pod = self.inner.db_state(self.name)?;

        let key_bytes = self.prepare_key(&db_pod, key)?;
        self.validate_record(&db_pod, record)?;

        if !self.inner.config.enable_transactions {
            let mut cs = Changeset::new();
            return apply_insert(&self.inner, &db_pod, &key_bytes, record, flags, &mut cs);
        }

        let caller = txn.map(|t| t.id).unwrap_or(0);
        self.ensure_no_live_ops(&db_pod, &key_bytes, caller)?;

        // duplicate keys surface at issue time, not at commit
        let exists = self.key_exists(&db_pod, &key_bytes)?;
        if exists {
            let may_exist = flags
                & (config::OVERWRITE
                    | config::DUPLICATE
                    | config::DUPLICATE_INSERT_FIRST
                    | config::DUPLICATE_INSERT_LAST)
                != 0;
            let dup_allowed = db_pod.rl().config.enable_duplicates
                || flags & config::OVERWRITE != 0;
            if !may_exist || !dup_allowed {
                return Err(OakError::duplicate_key());
            }
        }

        let lsn = self.inner.lsn.wl().next();
        let temporary = txn.is_none();
        let buffer_pos = match &self.inner.journal {
            Some(journal) => {
                let mut journal = journal.wl();
                let pos = journal.buffer_position();
                journal.append_insert(
                    self.name, caller, &key_bytes, record, flags, lsn, temporary,
                )?;
                pos
            }
            None => 0,
        };

        match txn {
            Some(txn) => {
                let op_index = db_pod.wl().txn_index.append(
                    caller,
                    lsn,
                    key_bytes.clone(),
                    OpKind::Insert {
                        record: record.to_vec(),
                        flags,
                    },
                );
                self.inner.txns.wl().get_mut(txn.id)?.ops.push((self.name, op_index));
                Ok(())
            }
            None => {
                // a temporary transaction is its own atomic unit
                let mut cs = Changeset::new();
                if let Err(err) =
                    apply_insert(&self.inner, &db_pod, &key_bytes, record, flags, &mut cs)
                {
                    if let Some(journal) = &self.inner.journal {
                        journal.wl().truncate_buffer(buffer_pos);
                    }
                    return Err(err);
                }
                let cs_lsn = self.inner.lsn.wl().next();
                self.inner.flush_changeset(&mut cs, cs_lsn)?;
                if let Some(journal) = &self.inner.journal {
                    journal.wl().flush(self.inner.config.enable_fsync)?;
                }
                Ok(())
            }
        }
    }

    fn erase_locked(
        &self,
        txn: Option<&Transaction>,
        key: &[u8],
        dup_idx: Option<u32>,
    ) -> OakResult {
        self.inner.check_fatal()?;
        let db_pod = self.inner.db_state(self.name)?;
        self.validate_key(&db_pod, key)?;

        if !self.inner.config.enable_transactions {
            let mut cs = Changeset::new();
            return apply_erase(&self.inner, &db_pod, key, dup_idx, &mut cs);
        }

        let caller = txn.map(|t| t.id).unwrap_or(0);
        self.ensure_no_live_ops(&db_pod, key, caller)?;

        if !self.key_exists(&db_pod, key)? {
            return Err(OakError::key_not_found());
        }

        let lsn = self.inner.lsn.wl().next();
        let temporary = txn.is_none();
        let duplicate = dup_idx.map(|i| i + 1).unwrap_or(0);
        let buffer_pos = match &self.inner.journal {
            Some(journal) => {
                let mut journal = journal.wl();
                let pos = journal.buffer_position();
                journal.append_erase(self.name, caller, key, duplicate, 0, lsn, temporary)?;
                pos
            }
            None => 0,
        };

        match txn {
            Some(txn) => {
                let op_index = db_pod.wl().txn_index.append(
                    caller,
                    lsn,
                    key.to_vec(),
                    OpKind::Erase { dup_idx },
                );
                self.inner.txns.wl().get_mut(txn.id)?.ops.push((self.name, op_index));
                Ok(())
            }
            None => {
                let mut cs = Changeset::new();
                if let Err(err) = apply_erase(&self.inner, &db_pod, key, dup_idx, &mut cs) {
                    if let Some(journal) = &self.inner.journal {
                        journal.wl().truncate_buffer(buffer_pos);
                    }
                    return Err(err);
                }
                let cs_lsn = self.inner.lsn.wl().next();
                self.inner.flush_changeset(&mut cs, cs_lsn)?;
                if let Some(journal) = &self.inner.journal {
                    journal.wl().flush(self.inner.config.enable_fsync)?;
                }
                Ok(())
            }
        }
    }

    fn find_locked(&self, txn: Option<&Transaction>, key: &[u8]) -> Result<Vec<u8>, OakError> {
        self.inner.check_fatal()?;
        let db_pod = self.inner.db_state(self.name)?;
        let caller = txn.map(|t| t.id).unwrap_or(0);

        if self.inner.config.enable_transactions {
            let db = db_pod.rl();
            if let Some(op) = db.txn_index.latest(key) {
                if op.txn_id != caller {
                    return Err(OakError::txn_conflict());
                }
                match &op.kind {
                    OpKind::Insert { record, .. } => return Ok(record.clone()),
                    OpKind::Erase { dup_idx: None } => return Err(OakError::key_not_found()),
                    // a buffered single-duplicate erase still leaves
                    // btree records behind
                    OpKind::Erase { .. } => {}
                }
            }
        }

        let mut pm = self.inner.page_manager.wl();
        let db = db_pod.rl();
        let mut cs = Changeset::new();
        let mut ctx = BtreeCtx {
            pm: &mut pm,
            blob: &self.inner.blob_manager,
            cs: &mut cs,
        };
        db.btree.find(&mut ctx, key, 0)
    }

    fn partial_overwrite_locked(&self, key: &[u8], offset: u64, data: &[u8]) -> OakResult {
        self.inner.check_fatal()?;
        let db_pod = self.inner.db_state(self.name)?;
        self.ensure_no_live_ops(&db_pod, key, 0)?;

        if db_pod.rl().config.record_compression.is_enabled() {
            return Err(OakError::invalid_parameter(
                "partial write is not allowed on compressed records",
            ));
        }

        let existing = match self.record_ref(&db_pod, key) {
            Ok(rref) => Some(rref),
            Err(err) if err.code() == ErrorCode::KeyNotFound => None,
            Err(err) => return Err(err),
        };

        match existing {
            None => {
                // fresh allocation: unspecified bytes are zero
                let mut record = vec![0u8; offset as usize + data.len()];
                record[offset as usize..].copy_from_slice(data);
                self.insert_locked(None, key, &record, 0)
            }
            Some(RecordRef::Blob(id)) => {
                let full_size = {
                    let mut pm = self.inner.page_manager.wl();
                    self.inner.blob_manager.get_size(&mut pm, id)?
                };
                if offset == 0 && data.len() as u64 == full_size {
                    // promoted to a full write
                    return self.insert_locked(None, key, data, config::OVERWRITE);
                }

                let new_id = {
                    let mut pm = self.inner.page_manager.wl();
                    self.inner
                        .blob_manager
                        .overwrite_partial(&mut pm, id, offset, data, crate::storage::BlobKind::Data)?
                };

                let mut cs = Changeset::new();
                if new_id != id {
                    self.set_record_ref(&db_pod, key, RecordRef::Blob(new_id), &mut cs)?;
                }

                // the journal gets the resulting record so that the
                // logical replay stays position-free
                let full = {
                    let mut pm = self.inner.page_manager.wl();
                    self.inner.blob_manager.read(&mut pm, new_id)?
                };
                let lsn = self.inner.lsn.wl().next();
                if let Some(journal) = &self.inner.journal {
                    journal.wl().append_insert(
                        self.name,
                        0,
                        key,
                        &full,
                        config::OVERWRITE,
                        lsn,
                        true,
                    )?;
                }
                let cs_lsn = self.inner.lsn.wl().next();
                self.inner.flush_changeset(&mut cs, cs_lsn)?;
                if let Some(journal) = &self.inner.journal {
                    journal.wl().flush(self.inner.config.enable_fsync)?;
                }
                Ok(())
            }
            Some(rref) => {
                // small records are rewritten wholesale
                let mut full = self.resolve(&db_pod, &rref, 0)?;
                let end = offset as usize + data.len();
                if full.len() < end {
                    full.resize(end, 0);
                }
                full[offset as usize..end].copy_from_slice(data);
                self.insert_locked(None, key, &full, config::OVERWRITE)
            }
        }
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    /// Returns `txn-conflict` when another live transaction buffered
    /// an operation on this key.
    fn ensure_no_live_ops(&self, db_pod: &Pod<DbState>, key: &[u8], caller: u64) -> OakResult {
        if !self.inner.config.enable_transactions {
            return Ok(());
        }
        let db = db_pod.rl();
        if let Some(op) = db.txn_index.latest(key) {
            if op.txn_id != caller {
                return Err(OakError::txn_conflict());
            }
        }
        Ok(())
    }

    /// Whether the key is visible, considering the caller's own
    /// buffered operations first.
    fn key_exists(&self, db_pod: &Pod<DbState>, key: &[u8]) -> Result<bool, OakError> {
        {
            let db = db_pod.rl();
            if let Some(op) = db.txn_index.latest(key) {
                return Ok(match op.kind {
                    OpKind::Insert { .. } => true,
                    OpKind::Erase { dup_idx: None } => false,
                    OpKind::Erase { .. } => true,
                });
            }
        }
        match self.record_ref(db_pod, key) {
            Ok(_) => Ok(true),
            Err(err) if err.code() == ErrorCode::KeyNotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn record_ref(&self, db_pod: &Pod<DbState>, key: &[u8]) -> Result<RecordRef, OakError> {
        let mut pm = self.inner.page_manager.wl();
        let db = db_pod.rl();
        let mut cs = Changeset::new();
        let mut ctx = BtreeCtx {
            pm: &mut pm,
            blob: &self.inner.blob_manager,
            cs: &mut cs,
        };
        let (leaf, slot, _) = db.btree.find_entry(&mut ctx, key, 0)?;
        let (_, rref) = db.btree.leaf_entry(&mut ctx, leaf, slot)?;
        Ok(rref)
    }

    fn set_record_ref(
        &self,
        db_pod: &Pod<DbState>,
        key: &[u8],
        rref: RecordRef,
        cs: &mut Changeset,
    ) -> OakResult {
        let mut pm = self.inner.page_manager.wl();
        let db = db_pod.rl();
        let mut ctx = BtreeCtx {
            pm: &mut pm,
            blob: &self.inner.blob_manager,
            cs,
        };
        db.btree.set_leaf_record(&mut ctx, key, rref)
    }

    fn resolve(
        &self,
        db_pod: &Pod<DbState>,
        rref: &RecordRef,
        dup_idx: usize,
    ) -> Result<Vec<u8>, OakError> {
        let mut pm = self.inner.page_manager.wl();
        let db = db_pod.rl();
        let mut cs = Changeset::new();
        let mut ctx = BtreeCtx {
            pm: &mut pm,
            blob: &self.inner.blob_manager,
            cs: &mut cs,
        };
        db.btree.resolve_record(&mut ctx, rref, dup_idx)
    }

    fn record_size_of(&self, db_pod: &Pod<DbState>, rref: &RecordRef) -> Result<u64, OakError> {
        match rref {
            RecordRef::Inline(bytes) => Ok(bytes.len() as u64),
            RecordRef::Blob(id) => {
                let mut pm = self.inner.page_manager.wl();
                self.inner.blob_manager.get_size(&mut pm, *id)
            }
            RecordRef::DupTable(_) => {
                let full = self.resolve(db_pod, rref, 0)?;
                Ok(full.len() as u64)
            }
        }
    }

    /// Validates the key, assigning the next record number when the
    /// database auto-numbers its keys.
    fn prepare_key(&self, db_pod: &Pod<DbState>, key: &[u8]) -> Result<Vec<u8>, OakError> {
        let mut db = db_pod.wl();
        match db.config.record_number {
            RecordNumber::Disabled => {
                drop(db);
                self.validate_key(db_pod, key)?;
                Ok(key.to_vec())
            }
            RecordNumber::U32 => {
                if key.is_empty() {
                    let next = db.next_record_number + 1;
                    db.next_record_number = next;
                    Ok((next as u32).to_le_bytes().to_vec())
                } else if key.len() == 4 {
                    let value = u32::from_le_bytes(key.try_into().unwrap()) as u64;
                    if value > db.next_record_number {
                        db.next_record_number = value;
                    }
                    Ok(key.to_vec())
                } else {
                    Err(OakError::invalid_parameter(
                        "record number keys are 4 bytes",
                    ))
                }
            }
            RecordNumber::U64 => {
                if key.is_empty() {
                    let next = db.next_record_number + 1;
                    db.next_record_number = next;
                    Ok(next.to_le_bytes().to_vec())
                } else if key.len() == 8 {
                    let value = u64::from_le_bytes(key.try_into().unwrap());
                    if value > db.next_record_number {
                        db.next_record_number = value;
                    }
                    Ok(key.to_vec())
                } else {
                    Err(OakError::invalid_parameter(
                        "record number keys are 8 bytes",
                    ))
                }
            }
        }
    }

    fn validate_key(&self, db_pod: &Pod<DbState>, key: &[u8]) -> OakResult {
        let db = db_pod.rl();
        if db.config.key_size != config::KEY_SIZE_UNLIMITED {
            if key.len() != db.config.key_size as usize {
                return Err(OakError::invalid_parameter(&format!(
                    "key size {} does not match the configured {}",
                    key.len(),
                    db.config.key_size
                )));
            }
        } else if key.len() >= u16::MAX as usize {
            return Err(OakError::invalid_parameter("key is too large"));
        }
        Ok(())
    }

    fn validate_record(&self, db_pod: &Pod<DbState>, record: &[u8]) -> OakResult {
        let db = db_pod.rl();
        if db.config.record_size != config::RECORD_SIZE_UNLIMITED
            && record.len() != db.config.record_size as usize
        {
            return Err(OakError::invalid_parameter(&format!(
                "record size {} does not match the configured {}",
                record.len(),
                db.config.record_size
            )));
        }
        Ok(())
    }
}

struct CursorPosition {
    key: Vec<u8>,
    dup_idx: usize,
}

/// A forward cursor over one database. The cursor addresses its entry
/// by key, so it stays valid across mutations of the tree.
pub struct Cursor {
    db: Database,
    position: Option<CursorPosition>,
}

impl Cursor {
    /// Positions on the exact key; returns the first duplicate's
    /// record.
    pub fn find(&mut self, key: &[u8]) -> Result<Vec<u8>, OakError> {
        let inner = self.db.inner.clone();
        let _guard = inner.mutex.lock().unwrap();
        inner.check_fatal()?;
        let db_pod = inner.db_state(self.db.name)?;

        let rref = self.db.record_ref(&db_pod, key)?;
        let record = self.db.resolve(&db_pod, &rref, 0)?;
        self.position = Some(CursorPosition {
            key: key.to_vec(),
            dup_idx: 0,
        });
        Ok(record)
    }

    /// Positions on the smallest key >= `key` and returns it.
    pub fn lower_bound(&mut self, key: &[u8]) -> Result<Vec<u8>, OakError> {
        let inner = self.db.inner.clone();
        let _guard = inner.mutex.lock().unwrap();
        inner.check_fatal()?;
        let db_pod = inner.db_state(self.db.name)?;

        let found = {
            let mut pm = inner.page_manager.wl();
            let db = db_pod.rl();
            let mut cs = Changeset::new();
            let mut ctx = BtreeCtx {
                pm: &mut pm,
                blob: &inner.blob_manager,
                cs: &mut cs,
            };
            let (_, _, found_key) = db.btree.find_entry(&mut ctx, key, config::FIND_GT_MATCH)?;
            found_key
        };
        self.position = Some(CursorPosition {
            key: found.clone(),
            dup_idx: 0,
        });
        Ok(found)
    }

    pub fn move_first(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, OakError> {
        let inner = self.db.inner.clone();
        let _guard = inner.mutex.lock().unwrap();
        inner.check_fatal()?;
        let db_pod = inner.db_state(self.db.name)?;

        let entry = {
            let mut pm = inner.page_manager.wl();
            let db = db_pod.rl();
            let mut cs = Changeset::new();
            let mut ctx = BtreeCtx {
                pm: &mut pm,
                blob: &inner.blob_manager,
                cs: &mut cs,
            };
            first_entry(&db, &mut ctx)?
        };

        match entry {
            Some((key, record)) => {
                self.position = Some(CursorPosition {
                    key: key.clone(),
                    dup_idx: 0,
                });
                Ok(Some((key, record)))
            }
            None => Ok(None),
        }
    }

    /// Advances to the next duplicate of the current key, or to the
    /// next key. An unpositioned cursor starts at the first entry.
    pub fn move_next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, OakError> {
        if self.position.is_none() {
            return self.move_first();
        }

        let inner = self.db.inner.clone();
        let _guard = inner.mutex.lock().unwrap();
        inner.check_fatal()?;
        let db_pod = inner.db_state(self.db.name)?;

        let position = self.position.as_ref().unwrap();
        let step = {
            let mut pm = inner.page_manager.wl();
            let db = db_pod.rl();
            let mut cs = Changeset::new();
            let mut ctx = BtreeCtx {
                pm: &mut pm,
                blob: &inner.blob_manager,
                cs: &mut cs,
            };
            advance(&db, &mut ctx, &position.key, position.dup_idx)?
        };

        match step {
            Some((key, dup_idx, record)) => {
                self.position = Some(CursorPosition {
                    key: key.clone(),
                    dup_idx,
                });
                Ok(Some((key, record)))
            }
            None => Ok(None),
        }
    }

    /// Inserts a duplicate record before the cursor's current
    /// duplicate.
    pub fn insert_before(&mut self, record: &[u8]) -> OakResult {
        let dup_idx = match &self.position {
            Some(position) => position.dup_idx,
            None => return Err(OakError::invalid_parameter("cursor is not positioned")),
        };
        self.insert_duplicate(record, dup_idx)
    }

    /// Inserts a duplicate record after the cursor's current
    /// duplicate.
    pub fn insert_after(&mut self, record: &[u8]) -> OakResult {
        let dup_idx = match &self.position {
            Some(position) => position.dup_idx + 1,
            None => return Err(OakError::invalid_parameter("cursor is not positioned")),
        };
        self.insert_duplicate(record, dup_idx)
    }

    fn insert_duplicate(&mut self, record: &[u8], dup_idx: usize) -> OakResult {
        let key = match &self.position {
            Some(position) => position.key.clone(),
            None => return Err(OakError::invalid_parameter("cursor is not positioned")),
        };
        let new_position = dup_idx;

        let inner = self.db.inner.clone();
        let _guard = inner.mutex.lock().unwrap();
        inner.check_fatal()?;
        let db_pod = inner.db_state(self.db.name)?;
        if !db_pod.rl().config.enable_duplicates {
            return Err(OakError::duplicate_key());
        }
        self.db.ensure_no_live_ops(&db_pod, &key, 0)?;

        let lsn = inner.lsn.wl().next();
        if let Some(journal) = &inner.journal {
            journal.wl().append_insert(
                self.db.name,
                0,
                &key,
                record,
                config::DUPLICATE,
                lsn,
                true,
            )?;
        }

        let mut cs = Changeset::new();
        {
            let mut pm = inner.page_manager.wl();
            let mut db = db_pod.wl();
            let mut ctx = BtreeCtx {
                pm: &mut pm,
                blob: &inner.blob_manager,
                cs: &mut cs,
            };
            db.btree.insert_duplicate_at(&mut ctx, &key, record, dup_idx)?;
        }
        let cs_lsn = inner.lsn.wl().next();
        inner.flush_changeset(&mut cs, cs_lsn)?;
        if let Some(journal) = &inner.journal {
            journal.wl().flush(inner.config.enable_fsync)?;
        }

        // the cursor moves onto the inserted duplicate
        if let Some(position) = &mut self.position {
            position.dup_idx = new_position;
        }
        Ok(())
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        let _guard = self.db.inner.mutex.lock().unwrap();
        if let Ok(db_pod) = self.db.inner.db_state(self.db.name) {
            let mut db = db_pod.wl();
            if db.open_cursors > 0 {
                db.open_cursors -= 1;
            }
        }
    }
}

fn first_entry(
    db: &DbState,
    ctx: &mut BtreeCtx,
) -> Result<Option<(Vec<u8>, Vec<u8>)>, OakError> {
    if db.btree.root_address() == 0 {
        return Ok(None);
    }
    let leaf = db.btree.leftmost_leaf(ctx)?;
    let target = {
        let pod = ctx.cs.fetch(ctx.pm, leaf, 0)?;
        let count = crate::btree::node::slot_count(&pod.rl());
        if count > 0 {
            Some((leaf, 0))
        } else {
            db.btree.next_slot(ctx, leaf, 0)?
        }
    };
    match target {
        Some((leaf, slot)) => {
            let (key, rref) = db.btree.leaf_entry(ctx, leaf, slot)?;
            let record = db.btree.resolve_record(ctx, &rref, 0)?;
            Ok(Some((key, record)))
        }
        None => Ok(None),
    }
}

/// One step of cursor iteration: next duplicate, else next key.
fn advance(
    db: &DbState,
    ctx: &mut BtreeCtx,
    current_key: &[u8],
    dup_idx: usize,
) -> Result<Option<(Vec<u8>, usize, Vec<u8>)>, OakError> {
    let found = match db.btree.find_entry(ctx, current_key, config::FIND_GT_MATCH) {
        Ok(found) => found,
        Err(err) if err.code() == ErrorCode::KeyNotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let (leaf, slot, found_key) = found;

    if found_key == current_key {
        // walk the duplicates of the current key first
        let (_, rref) = db.btree.leaf_entry(ctx, leaf, slot)?;
        let record_count = match &rref {
            RecordRef::DupTable(id) => {
                crate::btree::duplicates::load_table(ctx.blob, ctx.pm, *id)?.len()
            }
            _ => 1,
        };
        if dup_idx + 1 < record_count {
            let record = db.btree.resolve_record(ctx, &rref, dup_idx + 1)?;
            return Ok(Some((found_key, dup_idx + 1, record)));
        }

        match db.btree.next_slot(ctx, leaf, slot)? {
            Some((next_leaf, next_slot)) => {
                let (key, rref) = db.btree.leaf_entry(ctx, next_leaf, next_slot)?;
                let record = db.btree.resolve_record(ctx, &rref, 0)?;
                Ok(Some((key, 0, record)))
            }
            None => Ok(None),
        }
    } else {
        // the current key is gone; found_key is the next greater one
        let (_, rref) = db.btree.leaf_entry(ctx, leaf, slot)?;
        let record = db.btree.resolve_record(ctx, &rref, 0)?;
        Ok(Some((found_key, 0, record)))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "db_{}", self.name)
    }
}
