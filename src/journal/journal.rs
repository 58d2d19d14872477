use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::{
    compress::{self, CompressionKind},
    error::OakError,
    io::{Decodeable, OakFile, OakWriter},
    journal::entries::{
        ChangesetHeader, ChangesetPageHeader, EntryHeader, EntryType, ErasePayload,
        InsertPayload, ENTRY_HEADER_SIZE,
    },
    types::OakResult,
};

/// flush the write buffer once it grows past this limit
const BUFFER_LIMIT: usize = 1024 * 1024;

fn journal_paths(base: &Path) -> (PathBuf, PathBuf) {
    let mut path0 = base.as_os_str().to_os_string();
    path0.push(".jrn0");
    let mut path1 = base.as_os_str().to_os_string();
    path1.push(".jrn1");
    (PathBuf::from(path0), PathBuf::from(path1))
}

/// The dual-file write-ahead journal. Physical changesets and logical
/// per-operation records share the files; writes are buffered and
/// flushed on changeset append, temporary-transaction completion,
/// commit and explicit environment flush.
pub struct Journal {
    files: [OakFile; 2],
    current: usize,
    num_transactions: u32,
    threshold: u32,
    buffer: OakWriter,
    disable_logging: bool,
    enable_fsync: bool,
    compression: CompressionKind,
    page_size: usize,
    count_bytes_flushed: u64,
}

impl Journal {
    pub fn create(
        base: &Path,
        threshold: u32,
        enable_fsync: bool,
        compression: CompressionKind,
        page_size: usize,
    ) -> Result<Self, OakError> {
        let (path0, path1) = journal_paths(base);
        Ok(Self {
            files: [OakFile::create(&path0)?, OakFile::create(&path1)?],
            current: 0,
            num_transactions: 0,
            threshold,
            buffer: OakWriter::new(),
            disable_logging: false,
            enable_fsync,
            compression,
            page_size,
            count_bytes_flushed: 0,
        })
    }

    pub fn open(
        base: &Path,
        threshold: u32,
        enable_fsync: bool,
        compression: CompressionKind,
        page_size: usize,
    ) -> Result<Self, OakError> {
        let (path0, path1) = journal_paths(base);
        let file0 = OakFile::open(&path0).or_else(|_| OakFile::create(&path0))?;
        let file1 = OakFile::open(&path1).or_else(|_| OakFile::create(&path1))?;
        Ok(Self {
            files: [file0, file1],
            current: 0,
            num_transactions: 0,
            threshold,
            enable_fsync,
            buffer: OakWriter::new(),
            disable_logging: false,
            compression,
            page_size,
            count_bytes_flushed: 0,
        })
    }

    pub fn is_empty(&self) -> Result<bool, OakError> {
        Ok(self.files[0].size()? == 0 && self.files[1].size()? == 0)
    }

    /// Total bytes flushed to the files since open.
    pub fn bytes_flushed(&self) -> u64 {
        self.count_bytes_flushed
    }

    pub fn set_disable_logging(&mut self, disable: bool) {
        self.disable_logging = disable;
    }

    /// The current end of the write buffer; paired with
    /// `truncate_buffer` to drop the records of a failed operation.
    pub fn buffer_position(&self) -> usize {
        self.buffer.size()
    }

    pub fn truncate_buffer(&mut self, position: usize) {
        self.buffer.truncate(position);
    }

    pub fn append_txn_begin(
        &mut self,
        txn_id: u64,
        name: Option<&str>,
        lsn: u64,
    ) -> OakResult {
        if self.disable_logging {
            return Ok(());
        }
        self.switch_files_maybe()?;

        let mut payload = Vec::new();
        if let Some(name) = name {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
        }
        self.append_entry(
            EntryHeader {
                lsn,
                txn_id,
                dbname: 0,
                kind: EntryType::TxnBegin,
                followup_size: payload.len() as u32,
            },
            &payload,
        );
        self.num_transactions += 1;
        Ok(())
    }

    pub fn append_txn_commit(&mut self, txn_id: u64, lsn: u64) -> OakResult {
        if self.disable_logging {
            return Ok(());
        }
        self.append_entry(
            EntryHeader {
                lsn,
                txn_id,
                dbname: 0,
                kind: EntryType::TxnCommit,
                followup_size: 0,
            },
            &[],
        );
        // a returned commit implies the record reached the OS cache
        self.flush(self.enable_fsync)
    }

    pub fn append_txn_abort(&mut self, txn_id: u64, lsn: u64) -> OakResult {
        if self.disable_logging {
            return Ok(());
        }
        self.append_entry(
            EntryHeader {
                lsn,
                txn_id,
                dbname: 0,
                kind: EntryType::TxnAbort,
                followup_size: 0,
            },
            &[],
        );
        Ok(())
    }

    pub fn append_insert(
        &mut self,
        dbname: u16,
        txn_id: u64,
        key: &[u8],
        record: &[u8],
        insert_flags: u32,
        lsn: u64,
        temporary: bool,
    ) -> OakResult {
        if self.disable_logging {
            return Ok(());
        }
        if temporary {
            self.switch_files_maybe()?;
            self.num_transactions += 1;
        }
        let payload = InsertPayload {
            insert_flags,
            key: key.to_vec(),
            record: record.to_vec(),
        }
        .encode(self.compression)?;
        self.append_entry(
            EntryHeader {
                lsn,
                txn_id,
                dbname,
                kind: EntryType::Insert,
                followup_size: payload.len() as u32,
            },
            &payload,
        );
        self.flush_if_full()
    }

    pub fn append_erase(
        &mut self,
        dbname: u16,
        txn_id: u64,
        key: &[u8],
        duplicate: u32,
        erase_flags: u32,
        lsn: u64,
        temporary: bool,
    ) -> OakResult {
        if self.disable_logging {
            return Ok(());
        }
        if temporary {
            self.switch_files_maybe()?;
            self.num_transactions += 1;
        }
        let payload = ErasePayload {
            duplicate,
            erase_flags,
            key: key.to_vec(),
        }
        .encode(self.compression)?;
        self.append_entry(
            EntryHeader {
                lsn,
                txn_id,
                dbname,
                kind: EntryType::Erase,
                followup_size: payload.len() as u32,
            },
            &payload,
        );
        self.flush_if_full()
    }

    /// Appends the full page images of one operation plus the current
    /// freelist blob id, then flushes.
    pub fn append_changeset(
        &mut self,
        pages: &[(u64, Vec<u8>)],
        freelist_blob_id: u64,
        lsn: u64,
    ) -> OakResult {
        if self.disable_logging || pages.is_empty() {
            return Ok(());
        }

        let mut payload = OakWriter::new();
        payload.write(&ChangesetHeader {
            num_pages: pages.len() as u32,
            freelist_blob_id,
        });
        for (address, data) in pages {
            let mut compressed_size = 0u32;
            let mut bytes: &[u8] = data;
            let packed;
            if self.compression.is_enabled() {
                packed = compress::compress(self.compression, data)?;
                if packed.len() < data.len() {
                    compressed_size = packed.len() as u32;
                    bytes = &packed;
                }
            }
            payload.write(&ChangesetPageHeader {
                address: *address,
                compressed_size,
            });
            payload.write_bytes(bytes);
        }

        let payload = payload.to_bytes();
        self.append_entry(
            EntryHeader {
                lsn,
                txn_id: 0,
                dbname: 0,
                kind: EntryType::Changeset,
                followup_size: payload.len() as u32,
            },
            &payload,
        );
        self.flush(self.enable_fsync)
    }

    pub fn flush(&mut self, sync: bool) -> OakResult {
        if self.buffer.size() > 0 {
            let file = &mut self.files[self.current];
            file.seek_end()?;
            file.write_bytes(self.buffer.as_slice())?;
            self.count_bytes_flushed += self.buffer.size() as u64;
            self.buffer.clear();
        }
        if sync {
            self.files[self.current].sync()?;
        }
        Ok(())
    }

    /// Truncates both files; called after recovery and on clean close.
    pub fn clear(&mut self) -> OakResult {
        self.buffer.clear();
        for file in self.files.iter_mut() {
            file.truncate(0)?;
        }
        self.current = 0;
        self.num_transactions = 0;
        Ok(())
    }

    /// The highest lsn found in either file; seeds the lsn manager at
    /// open time.
    pub fn max_lsn(&mut self) -> Result<u64, OakError> {
        let mut max = 0;
        for idx in 0..2 {
            for (header, _) in self.read_file_entries(idx, false)? {
                if header.lsn > max {
                    max = header.lsn;
                }
            }
        }
        Ok(max)
    }

    /// Every entry of both files, sorted by lsn. `with_payload`
    /// controls whether followup bytes are materialized (the physical
    /// pass wants changeset payloads, the logical pass skips them).
    pub fn read_entries(
        &mut self,
        with_changeset_payload: bool,
    ) -> Result<Vec<(EntryHeader, Vec<u8>)>, OakError> {
        let mut entries = Vec::new();
        for idx in 0..2 {
            entries.extend(self.read_file_entries(idx, with_changeset_payload)?);
        }
        entries.sort_by_key(|(header, _)| header.lsn);
        Ok(entries)
    }

    fn read_file_entries(
        &mut self,
        idx: usize,
        with_changeset_payload: bool,
    ) -> Result<Vec<(EntryHeader, Vec<u8>)>, OakError> {
        let mut entries = Vec::new();
        let file = &mut self.files[idx];
        let size = file.size()?;
        file.seek(0)?;

        let mut offset = 0u64;
        while offset + ENTRY_HEADER_SIZE as u64 <= size {
            let header = match file.read::<EntryHeader>() {
                Ok(header) => header,
                Err(_) => {
                    // a torn tail ends the log
                    warn!("journal file {} has a torn entry at {}", idx, offset);
                    break;
                }
            };
            if header.lsn == 0 {
                break;
            }
            offset += ENTRY_HEADER_SIZE as u64;

            if offset + header.followup_size as u64 > size {
                warn!("journal file {} has a torn payload at {}", idx, offset);
                break;
            }
            let payload = if header.followup_size == 0 {
                Vec::new()
            } else if header.kind == EntryType::Changeset && !with_changeset_payload {
                file.seek(offset + header.followup_size as u64)?;
                Vec::new()
            } else {
                file.read_bytes(header.followup_size as usize)?
            };
            offset += header.followup_size as u64;
            entries.push((header, payload));
        }
        Ok(entries)
    }

    /// Decodes one changeset payload into (freelist blob id, page
    /// images).
    pub fn decode_changeset(
        &self,
        payload: &[u8],
    ) -> Result<(u64, Vec<(u64, Vec<u8>)>), OakError> {
        let mut reader = std::io::Cursor::new(payload);
        let header = ChangesetHeader::decode_from(&mut reader)?;
        let mut pages = Vec::with_capacity(header.num_pages as usize);
        for _ in 0..header.num_pages {
            let page_header = ChangesetPageHeader::decode_from(&mut reader)?;
            let bytes = if page_header.compressed_size == 0 {
                crate::io::read_exact(&mut reader, self.page_size)?
            } else {
                let packed =
                    crate::io::read_exact(&mut reader, page_header.compressed_size as usize)?;
                compress::decompress(CompressionKind::Zlib, &packed, self.page_size)?
            };
            pages.push((page_header.address, bytes));
        }
        Ok((header.freelist_blob_id, pages))
    }

    /// Dumps the journal contents via the `log` facade; a debugging
    /// aid kept cheap enough to call from tests.
    pub fn show_contents(&mut self) -> OakResult {
        let mut depiction = String::new();
        for (header, payload) in self.read_entries(false)? {
            depiction.push_str(&format!(
                "├── [lsn {}] [txn {}] [db {}] {:?}",
                header.lsn, header.txn_id, header.dbname, header.kind
            ));
            match header.kind {
                EntryType::Insert => {
                    if let Ok(insert) = InsertPayload::decode(&payload) {
                        depiction.push_str(&format!(
                            " key: {}, record: {} bytes",
                            hex::encode(&insert.key),
                            insert.record.len()
                        ));
                    }
                }
                EntryType::Erase => {
                    if let Ok(erase) = ErasePayload::decode(&payload) {
                        depiction
                            .push_str(&format!(" key: {}", hex::encode(&erase.key)));
                    }
                }
                _ => {}
            }
            depiction.push('\n');
        }
        debug!("journal contents:\n{}", depiction);
        Ok(())
    }

    fn append_entry(&mut self, header: EntryHeader, payload: &[u8]) {
        self.buffer.write(&header);
        self.buffer.write_bytes(payload);
    }

    fn flush_if_full(&mut self) -> OakResult {
        if self.buffer.size() > BUFFER_LIMIT {
            self.flush(false)?;
        }
        Ok(())
    }

    /// Rotates to the other file once enough transactions accumulated;
    /// the rotated-to file is truncated first.
    fn switch_files_maybe(&mut self) -> OakResult {
        if self.num_transactions <= self.threshold {
            return Ok(());
        }
        self.flush(false)?;
        let other = 1 - self.current;
        self.files[other].truncate(0)?;
        self.current = other;
        self.num_transactions = 0;
        debug!("journal switched to file {}", other);
        Ok(())
    }
}
