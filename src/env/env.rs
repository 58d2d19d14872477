use std::{
    collections::HashMap,
    convert::TryInto,
    io::Read,
    path::Path,
    sync::{Arc, Mutex},
};

use log::{debug, info};

use crate::{
    io::{Decodeable, Encodeable},
    btree::{node::NODE_HEADER_SIZE, BTreeIndex, BtreeCtx, KeyCompare, KeyList, NodeLayout, RecordList},
    compare,
    compress::CompressionKind,
    config::{self, DataType, DbConfig, EnvConfig, RecordNumber},
    db::Database,
    error::{ErrorCode, OakError},
    journal::Journal,
    lsn_manager::LsnManager,
    storage::{
        blob::BlobKind,
        device::{Device, FileDevice, MemDevice},
        freelist::Freelist,
        page::{Page, PageType, PAGE_HEADER_SIZE},
        BlobManager, Changeset, PageManager,
    },
    txn::{Transaction, TxnManager, TxnStatus},
    types::{new_pod, OakResult, Pod, ResultPod},
    utils::HandyRwLock,
};

use super::header::{self, BTreeDescriptor, EnvHeader};
use super::recovery;

/// The open state of one database inside the environment.
pub(crate) struct DbState {
    pub name: u16,
    pub descriptor_index: usize,
    pub config: DbConfig,
    pub btree: BTreeIndex,
    pub txn_index: crate::txn::TxnIndex,
    pub next_record_number: u64,
    pub open_cursors: usize,
    /// hash of the custom compare function name, 0 when none
    pub compare_hash: u32,
}

/// Root holder of device, page manager, blob manager, journal, lsn
/// manager, transaction manager and the database directory. One mutex
/// serializes every public call that mutates state.
pub(crate) struct EnvInner {
    pub(crate) mutex: Mutex<()>,
    pub(crate) config: EnvConfig,
    pub(crate) page_manager: Pod<PageManager>,
    pub(crate) blob_manager: BlobManager,
    pub(crate) journal: Option<Pod<Journal>>,
    pub(crate) lsn: Pod<LsnManager>,
    pub(crate) txns: Pod<TxnManager>,
    pub(crate) header_page: Pod<Page>,
    pub(crate) databases: Pod<HashMap<u16, Pod<DbState>>>,
    fatal: Mutex<Option<ErrorCode>>,
}

impl EnvInner {
    pub(crate) fn check_fatal(&self) -> OakResult {
        match *self.fatal.lock().unwrap() {
            Some(code) => Err(OakError::new(code, "environment is unusable")),
            None => Ok(()),
        }
    }

    /// Latches fatal error codes; after a fatal failure every public
    /// call (except close) keeps returning it.
    pub(crate) fn latch<T>(&self, result: Result<T, OakError>) -> Result<T, OakError> {
        if let Err(err) = &result {
            match err.code() {
                ErrorCode::IntegrityViolated
                | ErrorCode::InvalidFileHeader
                | ErrorCode::InvalidFileVersion => {
                    *self.fatal.lock().unwrap() = Some(err.code());
                }
                _ => {}
            }
        }
        result
    }

    pub(crate) fn db_state(&self, name: u16) -> ResultPod<DbState> {
        self.databases
            .rl()
            .get(&name)
            .cloned()
            .ok_or_else(|| OakError::new(ErrorCode::DatabaseNotFound, "database is not open"))
    }

    /// Writes the descriptor of one database into the header page and
    /// tracks the header page in the changeset.
    pub(crate) fn sync_descriptor(&self, db: &DbState, cs: &mut Changeset) {
        let descriptor = build_descriptor(db);
        {
            let mut page = self.header_page.wl();
            header::write_descriptor(&mut page, db.descriptor_index, &descriptor);
        }
        cs.put(self.header_page.clone());
    }

    /// Stamps every touched page with the lsn and writes the physical
    /// changeset entry, then forgets the pages.
    pub(crate) fn flush_changeset(&self, cs: &mut Changeset, lsn: u64) -> OakResult {
        if cs.is_empty() {
            return Ok(());
        }
        if let Some(journal) = &self.journal {
            let freelist_blob_id = self.page_manager.rl().freelist_blob_id();
            let mut pages = Vec::with_capacity(cs.len());
            for pod in cs.pages() {
                let mut page = pod.wl();
                page.set_lsn(lsn);
                pages.push((page.address(), page.raw_data().to_vec()));
            }
            journal.wl().append_changeset(&pages, freelist_blob_id, lsn)?;
        }
        cs.clear();
        Ok(())
    }

    /// Checkpoint: persists the freelist as a blob, rewrites the
    /// header page and writes every dirty page back to the device.
    pub(crate) fn persist_state(&self) -> OakResult {
        let freelist_blob_id;
        {
            let mut pm = self.page_manager.wl();
            let old = pm.freelist_blob_id();
            if old != 0 {
                self.blob_manager.erase(&mut pm, old)?;
                pm.set_freelist_blob_id(0);
            }
            freelist_blob_id = if pm.freelist().is_empty() {
                0
            } else {
                // sizing slack: the allocation below removes at most
                // one range from the list being encoded
                let probe = pm.freelist().encode();
                let id = self.blob_manager.allocate_zeroed(
                    &mut pm,
                    probe.len() as u64 + 64,
                    BlobKind::Data,
                )?;
                let bytes = pm.freelist().encode();
                self.blob_manager.write_at(&mut pm, id, 0, &bytes)?;
                id
            };
            pm.set_freelist_blob_id(freelist_blob_id);
        }

        {
            let mut page = self.header_page.wl();
            let mut env_header = EnvHeader::read_from(&page)?;
            env_header.freelist_blob_id = freelist_blob_id;
            env_header.write_to(&mut page);
        }

        // bring every open database's descriptor up to date
        {
            let databases = self.databases.rl();
            for db_pod in databases.values() {
                let db = db_pod.rl();
                let mut page = self.header_page.wl();
                header::write_descriptor(&mut page, db.descriptor_index, &build_descriptor(&db));
            }
        }

        let mut pm = self.page_manager.wl();
        pm.flush_all()?;
        pm.device().flush()?;
        drop(pm);

        if let Some(journal) = &self.journal {
            journal.wl().flush(self.config.enable_fsync)?;
        }
        Ok(())
    }
}

pub struct Environment {
    pub(crate) inner: Arc<EnvInner>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment").finish()
    }
}

impl Environment {
    /// Creates a fresh environment. With `in_memory` set in the
    /// config, the path is ignored and nothing is persisted.
    pub fn create<P: AsRef<Path>>(path: P, config: EnvConfig) -> Result<Environment, OakError> {
        config.validate()?;
        let page_size = config.page_size as usize;
        if config.max_databases as usize > header::descriptor_capacity(page_size) {
            return Err(OakError::invalid_parameter(&format!(
                "max_databases {} does not fit into one header page",
                config.max_databases
            )));
        }

        let device: Arc<dyn Device> = if config.in_memory {
            Arc::new(MemDevice::new())
        } else {
            Arc::new(FileDevice::create(path.as_ref(), config.enable_fsync)?)
        };

        let mut pm = PageManager::new(device, page_size, config.cache_capacity_bytes);
        let header_page = pm.alloc(PageType::Header)?;
        {
            let mut page = header_page.wl();
            EnvHeader {
                page_size: config.page_size,
                max_databases: config.max_databases,
                freelist_blob_id: 0,
                journal_compression: config.journal_compression.to_u32(),
            }
            .write_to(&mut page);
        }
        pm.flush_all()?;

        let journal = if !config.in_memory && config.enable_transactions {
            Some(new_pod(Journal::create(
                path.as_ref(),
                config.journal_switch_threshold,
                config.enable_fsync,
                config.journal_compression,
                page_size,
            )?))
        } else {
            None
        };

        info!(
            "environment created: page size {}, max databases {}",
            config.page_size, config.max_databases
        );
        Ok(Environment {
            inner: Arc::new(EnvInner {
                mutex: Mutex::new(()),
                config,
                page_manager: new_pod(pm),
                blob_manager: BlobManager::new(),
                journal,
                lsn: new_pod(LsnManager::new()),
                txns: new_pod(TxnManager::new()),
                header_page,
                databases: new_pod(HashMap::new()),
                fatal: Mutex::new(None),
            }),
        })
    }

    /// Opens an existing file-backed environment. The page size is
    /// taken from the header, not from the config. Non-empty journal
    /// files trigger recovery, or fail with `need-recovery` when
    /// recovery is disabled.
    pub fn open<P: AsRef<Path>>(path: P, config: EnvConfig) -> Result<Environment, OakError> {
        if config.in_memory {
            return Err(OakError::invalid_parameter(
                "in-memory environments cannot be reopened",
            ));
        }

        // bootstrap: the page size lives in the header page
        let mut prefix = vec![0u8; EnvHeader::bootstrap_len()];
        {
            let mut file = std::fs::File::open(path.as_ref())?;
            file.read_exact(&mut prefix)
                .or_else(|_| Err(OakError::new(ErrorCode::InvalidFileHeader, "file is truncated")))?;
        }
        let boot = EnvHeader::parse(&prefix[PAGE_HEADER_SIZE..])?;
        let page_size = boot.page_size as usize;
        if boot.page_size < config::MIN_PAGE_SIZE
            || boot.page_size > config::MAX_PAGE_SIZE
            || !boot.page_size.is_power_of_two()
        {
            return Err(OakError::new(
                ErrorCode::InvalidFileHeader,
                "header page carries a bogus page size",
            ));
        }

        let device: Arc<dyn Device> = Arc::new(FileDevice::open(path.as_ref(), config.enable_fsync)?);
        let mut pm = PageManager::new(device, page_size, config.cache_capacity_bytes);
        let header_page = pm.fetch(0, 0)?;

        let journal = if config.enable_transactions {
            Some(new_pod(Journal::open(
                path.as_ref(),
                config.journal_switch_threshold,
                config.enable_fsync,
                CompressionKind::from_u32(boot.journal_compression)
                    .unwrap_or(CompressionKind::None),
                page_size,
            )?))
        } else {
            None
        };

        let inner = Arc::new(EnvInner {
            mutex: Mutex::new(()),
            config,
            page_manager: new_pod(pm),
            blob_manager: BlobManager::new(),
            journal,
            lsn: new_pod(LsnManager::new()),
            txns: new_pod(TxnManager::new()),
            header_page,
            databases: new_pod(HashMap::new()),
            fatal: Mutex::new(None),
        });

        if let Some(journal) = &inner.journal {
            let max_lsn = journal.wl().max_lsn()?;
            inner.lsn.wl().seed(max_lsn);

            let journal_empty = journal.wl().is_empty()?;
            if !journal_empty {
                if !inner.config.enable_recovery {
                    return Err(OakError::new(
                        ErrorCode::NeedRecovery,
                        "journal files are not empty",
                    ));
                }
                let recovered = recovery::recover(&inner);
                inner.latch(recovered)?;
            }
        }

        load_freelist(&inner)?;
        debug!("environment opened: page size {}", page_size);
        Ok(Environment { inner })
    }

    pub fn create_db(&self, name: u16, db_config: DbConfig) -> Result<Database, OakError> {
        let inner = &self.inner;
        let _guard = inner.mutex.lock().unwrap();
        inner.check_fatal()?;
        if name == 0 {
            return Err(OakError::invalid_parameter("database name 0 is reserved"));
        }

        let env_header = EnvHeader::read_from(&inner.header_page.rl())?;
        let mut free_slot = None;
        for index in 0..env_header.max_databases as usize {
            let descriptor = header::read_descriptor(&inner.header_page.rl(), index);
            if descriptor.dbname == name {
                return Err(OakError::new(
                    ErrorCode::DatabaseAlreadyExists,
                    &format!("database {} already exists", name),
                ));
            }
            if descriptor.dbname == 0 && free_slot.is_none() {
                free_slot = Some(index);
            }
        }
        let descriptor_index = free_slot.ok_or_else(|| {
            OakError::new(ErrorCode::LimitsReached, "no free database slots left")
        })?;

        let resolved = resolve_db_config(db_config)?;
        let compare = resolve_compare(&resolved, false)?;
        // the authoritative page size is the one in the header page
        let page_size = env_header.page_size as usize;
        let (layout, _) = db_layout(&resolved, page_size);

        let state = DbState {
            name,
            descriptor_index,
            btree: BTreeIndex::new(
                layout,
                compare,
                resolved.enable_duplicates,
                resolved.record_compression,
                0,
            ),
            compare_hash: resolved
                .compare_name
                .as_ref()
                .map(|name| compare::compare_hash(name))
                .unwrap_or(0),
            config: resolved,
            txn_index: crate::txn::TxnIndex::new(),
            next_record_number: 0,
            open_cursors: 0,
        };

        // the new descriptor is journaled through a changeset so that
        // the creation survives a crash
        let mut cs = Changeset::new();
        inner.sync_descriptor(&state, &mut cs);
        let lsn = inner.lsn.wl().next();
        inner.flush_changeset(&mut cs, lsn)?;
        if let Some(journal) = &inner.journal {
            journal.wl().flush(inner.config.enable_fsync)?;
        }

        let pod = new_pod(state);
        inner.databases.wl().insert(name, pod);
        debug!("database {} created in slot {}", name, descriptor_index);
        Ok(Database {
            inner: inner.clone(),
            name,
        })
    }

    pub fn open_db(&self, name: u16, db_config: DbConfig) -> Result<Database, OakError> {
        let inner = &self.inner;
        let _guard = inner.mutex.lock().unwrap();
        inner.check_fatal()?;

        if inner.databases.rl().contains_key(&name) {
            return Ok(Database {
                inner: inner.clone(),
                name,
            });
        }

        let pod = open_db_state(inner, name, db_config.ignore_missing_callback)?;
        inner.databases.wl().insert(name, pod);
        Ok(Database {
            inner: inner.clone(),
            name,
        })
    }

    pub fn erase_db(&self, name: u16) -> OakResult {
        let inner = &self.inner;
        let _guard = inner.mutex.lock().unwrap();
        inner.check_fatal()?;

        let pod = match inner.databases.rl().get(&name).cloned() {
            Some(pod) => {
                if pod.rl().open_cursors > 0 {
                    return Err(OakError::new(
                        ErrorCode::CursorStillOpen,
                        "database has open cursors",
                    ));
                }
                pod
            }
            None => open_db_state(inner, name, true)?,
        };
        inner.databases.wl().remove(&name);

        let mut cs = Changeset::new();
        {
            let mut pm = inner.page_manager.wl();
            let mut db = pod.wl();
            let mut ctx = BtreeCtx {
                pm: &mut pm,
                blob: &inner.blob_manager,
                cs: &mut cs,
            };
            db.btree.drop_all(&mut ctx)?;
        }
        {
            let mut page = inner.header_page.wl();
            header::write_descriptor(
                &mut page,
                pod.rl().descriptor_index,
                &BTreeDescriptor::default(),
            );
        }
        cs.put(inner.header_page.clone());
        let lsn = inner.lsn.wl().next();
        inner.flush_changeset(&mut cs, lsn)?;
        debug!("database {} erased", name);
        Ok(())
    }

    pub fn rename_db(&self, old_name: u16, new_name: u16) -> OakResult {
        let inner = &self.inner;
        let _guard = inner.mutex.lock().unwrap();
        inner.check_fatal()?;
        if new_name == 0 {
            return Err(OakError::invalid_parameter("database name 0 is reserved"));
        }

        let env_header = EnvHeader::read_from(&inner.header_page.rl())?;
        let mut found = None;
        for index in 0..env_header.max_databases as usize {
            let descriptor = header::read_descriptor(&inner.header_page.rl(), index);
            if descriptor.dbname == new_name {
                return Err(OakError::new(
                    ErrorCode::DatabaseAlreadyExists,
                    "target name is taken",
                ));
            }
            if descriptor.dbname == old_name {
                found = Some((index, descriptor));
            }
        }
        let (index, mut descriptor) = found.ok_or_else(|| {
            OakError::new(ErrorCode::DatabaseNotFound, "no database with that name")
        })?;

        descriptor.dbname = new_name;
        let mut cs = Changeset::new();
        {
            let mut page = inner.header_page.wl();
            header::write_descriptor(&mut page, index, &descriptor);
        }
        cs.put(inner.header_page.clone());

        let mut databases = inner.databases.wl();
        if let Some(pod) = databases.remove(&old_name) {
            pod.wl().name = new_name;
            databases.insert(new_name, pod);
        }
        drop(databases);

        let lsn = inner.lsn.wl().next();
        inner.flush_changeset(&mut cs, lsn)
    }

    pub fn database_names(&self) -> Result<Vec<u16>, OakError> {
        let inner = &self.inner;
        let _guard = inner.mutex.lock().unwrap();
        let env_header = EnvHeader::read_from(&inner.header_page.rl())?;
        let mut names = Vec::new();
        for index in 0..env_header.max_databases as usize {
            let descriptor = header::read_descriptor(&inner.header_page.rl(), index);
            if descriptor.dbname != 0 {
                names.push(descriptor.dbname);
            }
        }
        Ok(names)
    }

    pub fn txn_begin(&self, name: Option<&str>, flags: u32) -> Result<Transaction, OakError> {
        let inner = &self.inner;
        let _guard = inner.mutex.lock().unwrap();
        inner.check_fatal()?;
        if !inner.config.enable_transactions {
            return Err(OakError::invalid_parameter("transactions are disabled"));
        }

        let id = inner.txns.wl().begin(name, flags);
        let lsn = inner.lsn.wl().next();
        if let Some(journal) = &inner.journal {
            journal.wl().append_txn_begin(id, name, lsn)?;
        }
        debug!("txn {} started", id);
        Ok(Transaction {
            id,
            env: inner.clone(),
        })
    }

    /// Writes dirty pages, the freelist blob and the journal buffer to
    /// their devices.
    pub fn flush(&self) -> OakResult {
        let inner = &self.inner;
        let _guard = inner.mutex.lock().unwrap();
        inner.check_fatal()?;
        let result = inner.persist_state();
        inner.latch(result)
    }

    /// Flushes and shuts down. Live transactions are aborted. Close is
    /// honored even after a fatal error.
    pub fn close(self) -> OakResult {
        let inner = &self.inner;
        let _guard = inner.mutex.lock().unwrap();

        let active = inner.txns.wl().active_ids();
        for id in active {
            abort_txn_locked(inner, id)?;
        }

        if inner.check_fatal().is_ok() {
            inner.persist_state()?;
            if let Some(journal) = &inner.journal {
                // a clean shutdown leaves empty journal files behind
                journal.wl().clear()?;
            }
        }
        info!("environment closed");
        Ok(())
    }
}

/// Builds the persisted descriptor from the open state.
pub(crate) fn build_descriptor(db: &DbState) -> BTreeDescriptor {
    let cfg = &db.config;
    let mut flags = 0u32;
    if cfg.enable_duplicates {
        flags |= config::DB_FLAG_DUPLICATES;
    }
    match cfg.record_number {
        RecordNumber::U32 => flags |= config::DB_FLAG_RECORD_NUMBER32,
        RecordNumber::U64 => flags |= config::DB_FLAG_RECORD_NUMBER64,
        RecordNumber::Disabled => {}
    }
    BTreeDescriptor {
        root_address: db.btree.root_address(),
        flags,
        dbname: db.name,
        key_size: cfg.key_size as u16,
        key_type: cfg.key_type as u16,
        compression: cfg.record_compression.to_u32() as u8,
        record_size: cfg.record_size,
        compare_hash: db.compare_hash,
        record_type: cfg.record_type as u16,
    }
}

/// Normalizes a user-supplied database config: fixed-width types force
/// their key/record sizes, record-number databases force their key
/// type.
fn resolve_db_config(mut cfg: DbConfig) -> Result<DbConfig, OakError> {
    match cfg.record_number {
        RecordNumber::U32 => {
            cfg.key_type = DataType::UInt32;
        }
        RecordNumber::U64 => {
            cfg.key_type = DataType::UInt64;
        }
        RecordNumber::Disabled => {}
    }
    if let Some(size) = cfg.key_type.fixed_size() {
        cfg.key_size = size;
    }
    if let Some(size) = cfg.record_type.fixed_size() {
        cfg.record_size = size;
    }
    if cfg.key_type == DataType::Custom && cfg.compare_name.is_none() {
        return Err(OakError::invalid_parameter(
            "custom key type requires a compare function name",
        ));
    }
    Ok(cfg)
}

fn resolve_compare(cfg: &DbConfig, ignore_missing: bool) -> Result<KeyCompare, OakError> {
    Ok(match cfg.key_type {
        DataType::Binary => KeyCompare::Binary,
        DataType::UInt8 => KeyCompare::UInt8,
        DataType::UInt16 => KeyCompare::UInt16,
        DataType::UInt32 => KeyCompare::UInt32,
        DataType::UInt64 => KeyCompare::UInt64,
        DataType::Real32 => KeyCompare::Real32,
        DataType::Real64 => KeyCompare::Real64,
        DataType::Custom => {
            let name = cfg.compare_name.as_deref().unwrap_or("");
            match compare::find_compare(compare::compare_hash(name)) {
                Some(func) => KeyCompare::Custom(func),
                None if ignore_missing => KeyCompare::Binary,
                None => {
                    return Err(OakError::new(
                        ErrorCode::PluginNotFound,
                        &format!("compare function '{}' is not registered", name),
                    ))
                }
            }
        }
    })
}

/// The KeyList/RecordList pair for a database config.
pub(crate) fn db_layout(cfg: &DbConfig, page_size: usize) -> (NodeLayout, Option<usize>) {
    let key_fixed: Option<usize> = if cfg.key_size != config::KEY_SIZE_UNLIMITED {
        Some(cfg.key_size as usize)
    } else {
        None
    };
    let key_list = match key_fixed {
        Some(size) => KeyList::Fixed { size },
        None => {
            let usable = page_size - PAGE_HEADER_SIZE - NODE_HEADER_SIZE;
            KeyList::Var {
                max_inline: (usable / 8).min(512),
            }
        }
    };

    let record_fixed: Option<usize> = if cfg.record_size != config::RECORD_SIZE_UNLIMITED {
        Some(cfg.record_size as usize)
    } else {
        None
    };
    let leaf_records = match record_fixed {
        Some(size) if !cfg.enable_duplicates && size <= page_size / 16 => {
            RecordList::Fixed { size }
        }
        _ => RecordList::Default,
    };

    (NodeLayout::new(key_list, leaf_records, page_size), key_fixed)
}

/// Builds the open state of a database from its persisted descriptor.
pub(crate) fn open_db_state(
    inner: &Arc<EnvInner>,
    name: u16,
    ignore_missing_callback: bool,
) -> ResultPod<DbState> {
    let env_header = EnvHeader::read_from(&inner.header_page.rl())?;
    let mut found = None;
    for index in 0..env_header.max_databases as usize {
        let descriptor = header::read_descriptor(&inner.header_page.rl(), index);
        if descriptor.dbname == name {
            found = Some((index, descriptor));
            break;
        }
    }
    let (descriptor_index, descriptor) = found.ok_or_else(|| {
        OakError::new(
            ErrorCode::DatabaseNotFound,
            &format!("no database named {}", name),
        )
    })?;

    let key_type = DataType::from_u16(descriptor.key_type).ok_or_else(|| {
        OakError::new(ErrorCode::InvalidFileHeader, "descriptor has a bad key type")
    })?;
    let record_type = DataType::from_u16(descriptor.record_type).ok_or_else(|| {
        OakError::new(
            ErrorCode::InvalidFileHeader,
            "descriptor has a bad record type",
        )
    })?;

    let record_number = if descriptor.flags & config::DB_FLAG_RECORD_NUMBER32 != 0 {
        RecordNumber::U32
    } else if descriptor.flags & config::DB_FLAG_RECORD_NUMBER64 != 0 {
        RecordNumber::U64
    } else {
        RecordNumber::Disabled
    };

    let cfg = DbConfig {
        key_type,
        key_size: descriptor.key_size as u32,
        record_type,
        record_size: descriptor.record_size,
        enable_duplicates: descriptor.flags & config::DB_FLAG_DUPLICATES != 0,
        record_number,
        record_compression: CompressionKind::from_u32(descriptor.compression as u32)
            .unwrap_or(CompressionKind::None),
        compare_name: None,
        ignore_missing_callback,
    };

    let compare = if key_type == DataType::Custom {
        match compare::find_compare(descriptor.compare_hash) {
            Some(func) => KeyCompare::Custom(func),
            None if ignore_missing_callback => KeyCompare::Binary,
            None => {
                return Err(OakError::new(
                    ErrorCode::PluginNotFound,
                    "the database needs an unregistered compare function",
                ))
            }
        }
    } else {
        resolve_compare(&cfg, ignore_missing_callback)?
    };

    let page_size = EnvHeader::read_from(&inner.header_page.rl())?.page_size as usize;
    let (layout, _) = db_layout(&cfg, page_size);

    let mut state = DbState {
        name,
        descriptor_index,
        btree: BTreeIndex::new(
            layout,
            compare,
            cfg.enable_duplicates,
            cfg.record_compression,
            descriptor.root_address,
        ),
        config: cfg,
        txn_index: crate::txn::TxnIndex::new(),
        next_record_number: 0,
        open_cursors: 0,
        compare_hash: descriptor.compare_hash,
    };

    // a record-number database resumes behind its highest key
    if state.config.record_number != RecordNumber::Disabled {
        state.next_record_number = highest_record_number(inner, &state)?;
    }

    debug!("database {} opened from slot {}", name, descriptor_index);
    Ok(new_pod(state))
}

fn highest_record_number(inner: &Arc<EnvInner>, state: &DbState) -> Result<u64, OakError> {
    let mut pm = inner.page_manager.wl();
    let mut cs = Changeset::new();
    let mut ctx = BtreeCtx {
        pm: &mut pm,
        blob: &inner.blob_manager,
        cs: &mut cs,
    };
    match state.btree.max_key(&mut ctx)? {
        Some(key) => Ok(match state.config.record_number {
            RecordNumber::U32 => u32::from_le_bytes(key[0..4].try_into().unwrap()) as u64,
            _ => u64::from_le_bytes(key[0..8].try_into().unwrap()),
        }),
        None => Ok(0),
    }
}

fn load_freelist(inner: &Arc<EnvInner>) -> OakResult {
    let blob_id = EnvHeader::read_from(&inner.header_page.rl())?.freelist_blob_id;
    if blob_id == 0 {
        return Ok(());
    }

    let mut pm = inner.page_manager.wl();
    let bytes = inner.blob_manager.read(&mut pm, blob_id)?;
    let freelist = Freelist::decode_from(&mut std::io::Cursor::new(bytes))?;
    pm.set_freelist(freelist);
    // the state blob itself becomes free space again
    inner.blob_manager.erase(&mut pm, blob_id)?;
    pm.set_freelist_blob_id(0);
    drop(pm);

    let mut page = inner.header_page.wl();
    let mut env_header = EnvHeader::read_from(&page)?;
    env_header.freelist_blob_id = 0;
    env_header.write_to(&mut page);
    Ok(())
}

pub(crate) fn commit_txn(inner: &Arc<EnvInner>, id: u64) -> OakResult {
    let _guard = inner.mutex.lock().unwrap();
    inner.check_fatal()?;

    let ops = {
        let txns = inner.txns.rl();
        let state = txns.get(id)?;
        if state.status != TxnStatus::Active {
            return Err(OakError::invalid_parameter("transaction is not active"));
        }
        state.ops.clone()
    };

    // flush the buffered operations into the btree, oldest first,
    // through one shared changeset
    let mut cs = Changeset::new();
    for (dbname, op_index) in &ops {
        let db_pod = inner.db_state(*dbname)?;
        let op = {
            let db = db_pod.rl();
            db.txn_index.get(*op_index).cloned()
        };
        let op = match op {
            Some(op) => op,
            None => continue,
        };
        let applied = apply_op(inner, &db_pod, &op, &mut cs);
        inner.latch(applied)?;
    }

    let cs_lsn = inner.lsn.wl().next();
    inner.flush_changeset(&mut cs, cs_lsn)?;
    if let Some(journal) = &inner.journal {
        let lsn = inner.lsn.wl().next();
        journal.wl().append_txn_commit(id, lsn)?;
    }

    for (dbname, op_index) in &ops {
        if let Ok(db_pod) = inner.db_state(*dbname) {
            db_pod.wl().txn_index.remove(*op_index);
        }
    }
    inner.txns.wl().remove(id);
    debug!("txn {} committed ({} ops)", id, ops.len());
    Ok(())
}

pub(crate) fn abort_txn(inner: &Arc<EnvInner>, id: u64) -> OakResult {
    let _guard = inner.mutex.lock().unwrap();
    inner.check_fatal()?;
    abort_txn_locked(inner, id)
}

pub(crate) fn abort_txn_locked(inner: &Arc<EnvInner>, id: u64) -> OakResult {
    let ops = {
        let txns = inner.txns.rl();
        let state = txns.get(id)?;
        if state.status != TxnStatus::Active {
            return Err(OakError::invalid_parameter("transaction is not active"));
        }
        state.ops.clone()
    };

    // abort drops the operations without touching the btree
    for (dbname, op_index) in &ops {
        if let Ok(db_pod) = inner.db_state(*dbname) {
            db_pod.wl().txn_index.remove(*op_index);
        }
    }

    if let Some(journal) = &inner.journal {
        let lsn = inner.lsn.wl().next();
        journal.wl().append_txn_abort(id, lsn)?;
    }
    inner.txns.wl().remove(id);
    debug!("txn {} aborted ({} ops dropped)", id, ops.len());
    Ok(())
}

/// Applies one buffered operation to the btree; called during commit
/// and during logical recovery.
pub(crate) fn apply_op(
    inner: &Arc<EnvInner>,
    db_pod: &Pod<DbState>,
    op: &crate::txn::TxnOperation,
    cs: &mut Changeset,
) -> OakResult {
    match &op.kind {
        crate::txn::OpKind::Insert { record, flags } => {
            apply_insert(inner, db_pod, &op.key, record, *flags, cs)
        }
        crate::txn::OpKind::Erase { dup_idx } => {
            // the key may already be gone when an erase is re-applied
            match apply_erase(inner, db_pod, &op.key, *dup_idx, cs) {
                Err(err) if err.code() == ErrorCode::KeyNotFound => Ok(()),
                other => other,
            }
        }
    }
}

/// Runs one insert against the btree through the given changeset.
pub(crate) fn apply_insert(
    inner: &Arc<EnvInner>,
    db_pod: &Pod<DbState>,
    key: &[u8],
    record: &[u8],
    flags: u32,
    cs: &mut Changeset,
) -> OakResult {
    let mut pm = inner.page_manager.wl();
    let mut db = db_pod.wl();
    let db = &mut *db;
    {
        let mut ctx = BtreeCtx {
            pm: &mut pm,
            blob: &inner.blob_manager,
            cs,
        };
        db.btree.insert(&mut ctx, key, record, flags)?;
    }
    drop(pm);
    if db.btree.take_root_dirty() {
        inner.sync_descriptor(db, cs);
    }
    Ok(())
}

/// Runs one erase against the btree through the given changeset.
pub(crate) fn apply_erase(
    inner: &Arc<EnvInner>,
    db_pod: &Pod<DbState>,
    key: &[u8],
    dup_idx: Option<u32>,
    cs: &mut Changeset,
) -> OakResult {
    let mut pm = inner.page_manager.wl();
    let mut db = db_pod.wl();
    let db = &mut *db;
    {
        let mut ctx = BtreeCtx {
            pm: &mut pm,
            blob: &inner.blob_manager,
            cs,
        };
        db.btree.erase(&mut ctx, key, dup_idx)?;
    }
    drop(pm);
    if db.btree.take_root_dirty() {
        inner.sync_descriptor(db, cs);
    }
    Ok(())
}
