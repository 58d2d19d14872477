use std::sync::Arc;

use log::{info, warn};

use crate::{
    error::ErrorCode,
    io::Decodeable,
    journal::{EntryType, ErasePayload, InsertPayload},
    storage::{freelist::Freelist, Changeset},
    txn::OpKind,
    types::{OakResult, Pod, ResultPod},
    utils::HandyRwLock,
};

use super::env::{
    abort_txn, apply_erase, apply_insert, commit_txn, open_db_state, DbState, EnvInner,
};
use super::header::EnvHeader;

/// Replays the journal after a crash.
///
/// 1. Physical redo: every changeset's page images are applied to the
///    device in lsn order, restoring the freelist blob id carried in
///    the newest changeset.
/// 2. Logical redo: all per-operation entries newer than the last
///    applied changeset are re-executed through the normal paths.
/// 3. Cleanup: uncommitted transactions are aborted, everything is
///    flushed and the journal files are cleared.
pub(crate) fn recover(inner: &Arc<EnvInner>) -> OakResult {
    let journal_pod = match &inner.journal {
        Some(journal) => journal.clone(),
        None => return Ok(()),
    };

    info!("journal files are not empty, starting recovery");
    journal_pod.wl().set_disable_logging(true);
    let result = recover_inner(inner, &journal_pod);
    journal_pod.wl().set_disable_logging(false);
    result
}

fn recover_inner(inner: &Arc<EnvInner>, journal_pod: &Pod<crate::journal::Journal>) -> OakResult {
    // stage 1: physical redo
    let mut start_lsn = 0u64;
    {
        let mut journal = journal_pod.wl();
        let entries = journal.read_entries(true)?;
        let device = inner.page_manager.rl().device();
        let mut freelist_blob_id = 0u64;

        for (header, payload) in &entries {
            if header.kind != EntryType::Changeset {
                continue;
            }
            let (blob_id, pages) = journal.decode_changeset(payload)?;
            for (address, bytes) in pages {
                device.write(address, &bytes)?;
            }
            start_lsn = header.lsn;
            freelist_blob_id = blob_id;
        }

        if start_lsn > 0 {
            // the device changed under the cache
            let mut pm = inner.page_manager.wl();
            pm.clear_cache();

            let mut buf = vec![0u8; pm.page_size()];
            pm.device().read(0, &mut buf)?;
            {
                let mut page = inner.header_page.wl();
                page.overwrite_raw(&buf);
                page.set_dirty(false);
            }
            pm.put_page(inner.header_page.clone());

            if freelist_blob_id != 0 {
                let bytes = inner.blob_manager.read(&mut pm, freelist_blob_id)?;
                let freelist = Freelist::decode_from(&mut std::io::Cursor::new(bytes))?;
                pm.set_freelist(freelist);
                inner.blob_manager.erase(&mut pm, freelist_blob_id)?;
                pm.set_freelist_blob_id(0);

                let mut page = inner.header_page.wl();
                let mut env_header = EnvHeader::read_from(&page)?;
                env_header.freelist_blob_id = 0;
                env_header.write_to(&mut page);
            }
            info!("physical redo done, newest changeset lsn {}", start_lsn);
        }
    }

    // stage 2: logical redo of everything newer than the changesets
    let entries = journal_pod.wl().read_entries(false)?;
    for (header, payload) in entries {
        match header.kind {
            EntryType::Changeset => {}
            EntryType::TxnBegin => {
                let name = parse_txn_name(&payload);
                inner
                    .txns
                    .wl()
                    .begin_with_id(header.txn_id, name.as_deref(), 0);
            }
            EntryType::TxnCommit => {
                if let Err(err) = commit_txn(inner, header.txn_id) {
                    // its begin record may live in the rotated file
                    warn!("skipping commit of txn {}: {}", header.txn_id, err);
                }
            }
            EntryType::TxnAbort => {
                if let Err(err) = abort_txn(inner, header.txn_id) {
                    warn!("skipping abort of txn {}: {}", header.txn_id, err);
                }
            }
            EntryType::Insert => {
                if header.lsn <= start_lsn {
                    continue;
                }
                let insert = InsertPayload::decode(&payload)?;
                let db_pod = match recovered_db(inner, header.dbname) {
                    Ok(db_pod) => db_pod,
                    Err(err) => {
                        warn!("skipping insert for db {}: {}", header.dbname, err);
                        continue;
                    }
                };

                if header.txn_id != 0 {
                    ensure_txn(inner, header.txn_id);
                    let op_index = db_pod.wl().txn_index.append(
                        header.txn_id,
                        header.lsn,
                        insert.key.clone(),
                        OpKind::Insert {
                            record: insert.record.clone(),
                            flags: insert.insert_flags,
                        },
                    );
                    inner
                        .txns
                        .wl()
                        .get_mut(header.txn_id)?
                        .ops
                        .push((header.dbname, op_index));
                } else {
                    let mut cs = Changeset::new();
                    match apply_insert(
                        inner,
                        &db_pod,
                        &insert.key,
                        &insert.record,
                        insert.insert_flags,
                        &mut cs,
                    ) {
                        // the key may have been flushed with a changeset
                        Err(err) if err.code() == ErrorCode::DuplicateKey => {}
                        other => other?,
                    }
                }
            }
            EntryType::Erase => {
                if header.lsn <= start_lsn {
                    continue;
                }
                let erase = ErasePayload::decode(&payload)?;
                let db_pod = match recovered_db(inner, header.dbname) {
                    Ok(db_pod) => db_pod,
                    Err(err) => {
                        warn!("skipping erase for db {}: {}", header.dbname, err);
                        continue;
                    }
                };
                let dup_idx = if erase.duplicate == 0 {
                    None
                } else {
                    Some(erase.duplicate - 1)
                };

                if header.txn_id != 0 {
                    ensure_txn(inner, header.txn_id);
                    let op_index = db_pod.wl().txn_index.append(
                        header.txn_id,
                        header.lsn,
                        erase.key.clone(),
                        OpKind::Erase { dup_idx },
                    );
                    inner
                        .txns
                        .wl()
                        .get_mut(header.txn_id)?
                        .ops
                        .push((header.dbname, op_index));
                } else {
                    let mut cs = Changeset::new();
                    match apply_erase(inner, &db_pod, &erase.key, dup_idx, &mut cs) {
                        // already erased via changeset replay
                        Err(err) if err.code() == ErrorCode::KeyNotFound => {}
                        other => other?,
                    }
                }
            }
        }
    }

    // stage 3: cleanup
    let active = inner.txns.wl().active_ids();
    for id in active {
        if let Err(err) = abort_txn(inner, id) {
            warn!("aborting txn {} during recovery failed: {}", id, err);
        }
    }
    inner.persist_state()?;
    journal_pod.wl().clear()?;
    info!("recovery finished");
    Ok(())
}

fn parse_txn_name(payload: &[u8]) -> Option<String> {
    if payload.is_empty() {
        return None;
    }
    let end = payload.len() - 1; // strip the terminating NUL
    String::from_utf8(payload[..end].to_vec()).ok()
}

fn ensure_txn(inner: &Arc<EnvInner>, txn_id: u64) {
    let mut txns = inner.txns.wl();
    if txns.get(txn_id).is_err() {
        // its begin record was rotated away
        txns.begin_with_id(txn_id, None, 0);
    }
}

fn recovered_db(inner: &Arc<EnvInner>, name: u16) -> ResultPod<DbState> {
    if let Ok(db_pod) = inner.db_state(name) {
        return Ok(db_pod);
    }
    let db_pod = open_db_state(inner, name, true)?;
    inner.databases.wl().insert(name, db_pod.clone());
    Ok(db_pod)
}
