use std::cmp::Ordering;
use std::convert::TryInto;

use log::debug;

use crate::{
    btree::{
        duplicates::{self, DuplicateTable},
        key_list::{KeyCell, KeyList},
        node::{self, NodeLayout},
        record_list::{decode_cell, encode_cell, RecordList, RecordRef, INLINE_RECORD_MAX},
    },
    compare::CompareFn,
    compress::CompressionKind,
    config,
    error::OakError,
    storage::{
        blob::BlobKind,
        page::{Page, PageType},
        BlobManager, Changeset, PageManager,
    },
    types::{OakResult, Pod},
    utils::HandyRwLock,
};

/// nodes at or below this occupancy shift a key from a sibling or
/// merge with it
const MIN_SLOTS: usize = 3;

/// The comparator of one database, fixed at create time.
#[derive(Clone, Copy)]
pub enum KeyCompare {
    Binary,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Real32,
    Real64,
    Custom(CompareFn),
}

impl KeyCompare {
    pub fn compare(&self, lhs: &[u8], rhs: &[u8]) -> Ordering {
        match self {
            KeyCompare::Binary => lhs.cmp(rhs),
            KeyCompare::UInt8 => lhs[0].cmp(&rhs[0]),
            KeyCompare::UInt16 => decode_u16(lhs).cmp(&decode_u16(rhs)),
            KeyCompare::UInt32 => decode_u32(lhs).cmp(&decode_u32(rhs)),
            KeyCompare::UInt64 => decode_u64(lhs).cmp(&decode_u64(rhs)),
            KeyCompare::Real32 => {
                let l = f32::from_le_bytes(lhs[0..4].try_into().unwrap());
                let r = f32::from_le_bytes(rhs[0..4].try_into().unwrap());
                l.partial_cmp(&r).unwrap_or(Ordering::Equal)
            }
            KeyCompare::Real64 => {
                let l = f64::from_le_bytes(lhs[0..8].try_into().unwrap());
                let r = f64::from_le_bytes(rhs[0..8].try_into().unwrap());
                l.partial_cmp(&r).unwrap_or(Ordering::Equal)
            }
            KeyCompare::Custom(func) => func(lhs, rhs),
        }
    }
}

fn decode_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes(bytes[0..2].try_into().unwrap())
}

fn decode_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes[0..4].try_into().unwrap())
}

fn decode_u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes(bytes[0..8].try_into().unwrap())
}

/// Everything a btree operation needs from the environment. Pages are
/// acquired through the changeset so that one journal entry can cover
/// the whole operation.
pub struct BtreeCtx<'a> {
    pub pm: &'a mut PageManager,
    pub blob: &'a BlobManager,
    pub cs: &'a mut Changeset,
}

/// The ordered map from keys to records of one database.
///
/// Internal nodes follow the convention: `left_child` holds all keys
/// smaller than key[0]; the child at slot i holds the keys in
/// [key[i], key[i+1]).
pub struct BTreeIndex {
    layout: NodeLayout,
    compare: KeyCompare,
    root_address: u64,
    dup_enabled: bool,
    record_compression: CompressionKind,
    /// set when the root address changed and the descriptor must be
    /// rewritten
    root_dirty: bool,
}

impl BTreeIndex {
    pub fn new(
        layout: NodeLayout,
        compare: KeyCompare,
        dup_enabled: bool,
        record_compression: CompressionKind,
        root_address: u64,
    ) -> Self {
        Self {
            layout,
            compare,
            root_address,
            dup_enabled,
            record_compression,
            root_dirty: false,
        }
    }

    pub fn root_address(&self) -> u64 {
        self.root_address
    }

    pub fn take_root_dirty(&mut self) -> bool {
        let dirty = self.root_dirty;
        self.root_dirty = false;
        dirty
    }

    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    pub fn compare_keys(&self, lhs: &[u8], rhs: &[u8]) -> Ordering {
        self.compare.compare(lhs, rhs)
    }

    // ------------------------------------------------------------------
    // lookups
    // ------------------------------------------------------------------

    /// Point or approximate lookup; returns the record of the first
    /// duplicate.
    pub fn find(&self, ctx: &mut BtreeCtx, key: &[u8], flags: u32) -> Result<Vec<u8>, OakError> {
        let (leaf, slot, _) = self.find_entry(ctx, key, flags)?;
        let (_, rref) = self.leaf_entry(ctx, leaf, slot)?;
        self.resolve_record(ctx, &rref, 0)
    }

    /// Returns (leaf address, slot, key bytes) of the matching entry.
    /// Approximate-match flags return the nearest-smaller or
    /// nearest-greater key.
    pub fn find_entry(
        &self,
        ctx: &mut BtreeCtx,
        key: &[u8],
        flags: u32,
    ) -> Result<(u64, usize, Vec<u8>), OakError> {
        if self.root_address == 0 {
            return Err(OakError::key_not_found());
        }
        let (_, leaf_addr) = self.descend(ctx, key)?;
        let pod = ctx.cs.fetch(ctx.pm, leaf_addr, 0)?;
        let (pos, exact) = {
            let page = pod.rl();
            self.search_node(ctx, &page, key)?
        };

        if exact {
            let bytes = {
                let page = pod.rl();
                self.load_key(ctx, &page, pos as usize)?
            };
            return Ok((leaf_addr, pos as usize, bytes));
        }

        if flags & config::FIND_LT_MATCH != 0 && pos >= 0 {
            let bytes = {
                let page = pod.rl();
                self.load_key(ctx, &page, pos as usize)?
            };
            return Ok((leaf_addr, pos as usize, bytes));
        }

        if flags & config::FIND_GT_MATCH != 0 {
            let slot = (pos + 1) as usize;
            let count = node::slot_count(&pod.rl());
            if slot < count {
                let bytes = {
                    let page = pod.rl();
                    self.load_key(ctx, &page, slot)?
                };
                return Ok((leaf_addr, slot, bytes));
            }
            // the next key lives in a right sibling
            if let Some((next_leaf, next_slot)) =
                self.next_slot(ctx, leaf_addr, count.saturating_sub(1))?
            {
                let next_pod = ctx.cs.fetch(ctx.pm, next_leaf, 0)?;
                let bytes = {
                    let page = next_pod.rl();
                    self.load_key(ctx, &page, next_slot)?
                };
                return Ok((next_leaf, next_slot, bytes));
            }
        }

        Err(OakError::key_not_found())
    }

    /// How many records (duplicates included) one key holds.
    pub fn record_count(&self, ctx: &mut BtreeCtx, key: &[u8]) -> Result<u64, OakError> {
        let (leaf, slot, _) = self.find_entry(ctx, key, 0)?;
        let (_, rref) = self.leaf_entry(ctx, leaf, slot)?;
        match rref {
            RecordRef::DupTable(id) => {
                Ok(duplicates::load_table(ctx.blob, ctx.pm, id)?.len() as u64)
            }
            _ => Ok(1),
        }
    }

    pub fn count(&self, ctx: &mut BtreeCtx, distinct: bool) -> Result<u64, OakError> {
        if self.root_address == 0 {
            return Ok(0);
        }
        let mut total: u64 = 0;
        let mut addr = self.leftmost_leaf(ctx)?;
        loop {
            let pod = ctx.cs.fetch(ctx.pm, addr, 0)?;
            let (count, next) = {
                let page = pod.rl();
                (node::slot_count(&page), node::right_sibling(&page))
            };
            for slot in 0..count {
                if distinct {
                    total += 1;
                } else {
                    let (_, rref) = self.leaf_entry(ctx, addr, slot)?;
                    total += match rref {
                        RecordRef::DupTable(id) => {
                            duplicates::load_table(ctx.blob, ctx.pm, id)?.len() as u64
                        }
                        _ => 1,
                    };
                }
            }
            if next == 0 {
                return Ok(total);
            }
            addr = next;
        }
    }

    /// Replaces the record cell of an existing key in place; used by
    /// partial writes when a blob relocates.
    pub fn set_leaf_record(
        &self,
        ctx: &mut BtreeCtx,
        key: &[u8],
        rref: RecordRef,
    ) -> OakResult {
        let (leaf, slot, _) = self.find_entry(ctx, key, 0)?;
        let pod = ctx.cs.fetch(ctx.pm, leaf, 0)?;
        let mut page = pod.wl();
        node::set_record_cell(&mut page, &self.layout, slot, &encode_cell(&rref));
        Ok(())
    }

    /// The largest key of the tree, or None when it is empty.
    pub fn max_key(&self, ctx: &mut BtreeCtx) -> Result<Option<Vec<u8>>, OakError> {
        if self.root_address == 0 {
            return Ok(None);
        }
        let mut addr = self.root_address;
        loop {
            let pod = ctx.cs.fetch(ctx.pm, addr, 0)?;
            let page = pod.rl();
            let count = node::slot_count(&page);
            if node::is_leaf(&page) {
                if count == 0 {
                    return Ok(None);
                }
                return Ok(Some(self.load_key(ctx, &page, count - 1)?));
            }
            addr = node::child_at(&page, &self.layout, count as i64 - 1);
        }
    }

    pub fn leftmost_leaf(&self, ctx: &mut BtreeCtx) -> Result<u64, OakError> {
        let mut addr = self.root_address;
        loop {
            let pod = ctx.cs.fetch(ctx.pm, addr, 0)?;
            let page = pod.rl();
            if node::is_leaf(&page) {
                return Ok(addr);
            }
            addr = node::left_child(&page);
        }
    }

    /// The key and record reference stored in one leaf slot.
    pub fn leaf_entry(
        &self,
        ctx: &mut BtreeCtx,
        leaf_addr: u64,
        slot: usize,
    ) -> Result<(Vec<u8>, RecordRef), OakError> {
        let pod = ctx.cs.fetch(ctx.pm, leaf_addr, 0)?;
        let page = pod.rl();
        let key = self.load_key(ctx, &page, slot)?;
        let rref = self.leaf_record_ref(&node::record_cell(&page, &self.layout, slot))?;
        Ok((key, rref))
    }

    /// Advances (leaf, slot) by one position, following the
    /// right-sibling chain at the leaf level.
    pub fn next_slot(
        &self,
        ctx: &mut BtreeCtx,
        leaf_addr: u64,
        slot: usize,
    ) -> Result<Option<(u64, usize)>, OakError> {
        let pod = ctx.cs.fetch(ctx.pm, leaf_addr, 0)?;
        let (count, mut next) = {
            let page = pod.rl();
            (node::slot_count(&page), node::right_sibling(&page))
        };
        if slot + 1 < count {
            return Ok(Some((leaf_addr, slot + 1)));
        }
        while next != 0 {
            let pod = ctx.cs.fetch(ctx.pm, next, 0)?;
            let (count, sibling) = {
                let page = pod.rl();
                (node::slot_count(&page), node::right_sibling(&page))
            };
            if count > 0 {
                return Ok(Some((next, 0)));
            }
            next = sibling;
        }
        Ok(None)
    }

    pub fn resolve_record(
        &self,
        ctx: &mut BtreeCtx,
        rref: &RecordRef,
        dup_idx: usize,
    ) -> Result<Vec<u8>, OakError> {
        match rref {
            RecordRef::Inline(bytes) => {
                if dup_idx != 0 {
                    return Err(OakError::key_not_found());
                }
                Ok(bytes.clone())
            }
            RecordRef::Blob(id) => {
                if dup_idx != 0 {
                    return Err(OakError::key_not_found());
                }
                ctx.blob.read(ctx.pm, *id)
            }
            RecordRef::DupTable(id) => {
                let table = duplicates::load_table(ctx.blob, ctx.pm, *id)?;
                if dup_idx >= table.len() {
                    return Err(OakError::key_not_found());
                }
                match &table.entries[dup_idx] {
                    RecordRef::Inline(bytes) => Ok(bytes.clone()),
                    RecordRef::Blob(id) => ctx.blob.read(ctx.pm, *id),
                    RecordRef::DupTable(_) => {
                        Err(OakError::integrity("nested duplicate table"))
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // insert
    // ------------------------------------------------------------------

    pub fn insert(
        &mut self,
        ctx: &mut BtreeCtx,
        key: &[u8],
        record: &[u8],
        flags: u32,
    ) -> OakResult {
        self.ensure_root(ctx)?;
        let (path, leaf_addr) = self.descend(ctx, key)?;
        let pod = ctx.cs.fetch(ctx.pm, leaf_addr, 0)?;
        let (pos, exact) = {
            let page = pod.rl();
            self.search_node(ctx, &page, key)?
        };

        if exact {
            return self.update_existing(ctx, &pod, pos as usize, record, flags, None);
        }

        let rec_cell = self.make_record_cell(ctx, record)?;
        let key_cell = self.make_key_cell(ctx, key)?;
        self.insert_with_splits(ctx, path, leaf_addr, key, key_cell, rec_cell)
    }

    /// Cursor-relative duplicate insert (before/after the current
    /// duplicate).
    pub fn insert_duplicate_at(
        &mut self,
        ctx: &mut BtreeCtx,
        key: &[u8],
        record: &[u8],
        dup_pos: usize,
    ) -> OakResult {
        if self.root_address == 0 {
            return Err(OakError::key_not_found());
        }
        let (_, leaf_addr) = self.descend(ctx, key)?;
        let pod = ctx.cs.fetch(ctx.pm, leaf_addr, 0)?;
        let (pos, exact) = {
            let page = pod.rl();
            self.search_node(ctx, &page, key)?
        };
        if !exact {
            return Err(OakError::key_not_found());
        }
        self.update_existing(ctx, &pod, pos as usize, record, config::DUPLICATE, Some(dup_pos))
    }

    fn update_existing(
        &self,
        ctx: &mut BtreeCtx,
        pod: &Pod<Page>,
        slot: usize,
        record: &[u8],
        flags: u32,
        dup_pos: Option<usize>,
    ) -> OakResult {
        let cell = {
            let page = pod.rl();
            node::record_cell(&page, &self.layout, slot)
        };
        let rref = self.leaf_record_ref(&cell)?;

        let dup_requested = dup_pos.is_some()
            || flags
                & (config::DUPLICATE
                    | config::DUPLICATE_INSERT_FIRST
                    | config::DUPLICATE_INSERT_LAST)
                != 0;

        if dup_requested && self.dup_enabled {
            let entry = self.make_dup_entry(ctx, record)?;
            let (mut table, old_id) = match rref {
                RecordRef::DupTable(id) => (duplicates::load_table(ctx.blob, ctx.pm, id)?, Some(id)),
                single => {
                    let mut table = DuplicateTable::new();
                    table.insert_at(usize::MAX, single);
                    (table, None)
                }
            };
            let index = if flags & config::DUPLICATE_INSERT_FIRST != 0 {
                0
            } else if let Some(index) = dup_pos {
                index
            } else {
                table.len()
            };
            table.insert_at(index, entry);

            let new_id = duplicates::store_table(ctx.blob, ctx.pm, &table, old_id)?;
            let mut page = pod.wl();
            node::set_record_cell(
                &mut page,
                &self.layout,
                slot,
                &encode_cell(&RecordRef::DupTable(new_id)),
            );
            return Ok(());
        }

        if flags & config::OVERWRITE != 0 {
            let new_cell = match (&self.layout.leaf_records, rref) {
                (RecordList::Fixed { size }, _) => {
                    if record.len() != *size {
                        return Err(OakError::invalid_parameter("wrong record size"));
                    }
                    record.to_vec()
                }
                (RecordList::Default, RecordRef::Blob(id)) => {
                    if record.len() <= INLINE_RECORD_MAX
                        && !self.record_compression.is_enabled()
                    {
                        ctx.blob.erase(ctx.pm, id)?;
                        encode_cell(&RecordRef::Inline(record.to_vec())).to_vec()
                    } else {
                        let new_id = ctx.blob.overwrite(
                            ctx.pm,
                            id,
                            record,
                            BlobKind::Data,
                            self.record_compression,
                        )?;
                        encode_cell(&RecordRef::Blob(new_id)).to_vec()
                    }
                }
                (RecordList::Default, RecordRef::DupTable(id)) => {
                    // overwrite replaces the first duplicate
                    let mut table = duplicates::load_table(ctx.blob, ctx.pm, id)?;
                    if let Some(RecordRef::Blob(old)) = table.entries.first() {
                        let old = *old;
                        ctx.blob.erase(ctx.pm, old)?;
                    }
                    let entry = self.make_dup_entry(ctx, record)?;
                    if table.len() == 0 {
                        table.insert_at(0, entry);
                    } else {
                        table.entries[0] = entry;
                    }
                    let new_id = duplicates::store_table(ctx.blob, ctx.pm, &table, Some(id))?;
                    encode_cell(&RecordRef::DupTable(new_id)).to_vec()
                }
                (RecordList::Default, RecordRef::Inline(_)) => {
                    self.make_record_cell(ctx, record)?
                }
            };
            let mut page = pod.wl();
            node::set_record_cell(&mut page, &self.layout, slot, &new_cell);
            return Ok(());
        }

        Err(OakError::duplicate_key())
    }

    /// Inserts a fresh slot into the leaf, splitting nodes up the path
    /// as needed.
    fn insert_with_splits(
        &mut self,
        ctx: &mut BtreeCtx,
        mut path: Vec<(u64, i64)>,
        leaf_addr: u64,
        key: &[u8],
        key_cell: KeyCell,
        rec_cell: Vec<u8>,
    ) -> OakResult {
        let mut cur_addr = leaf_addr;
        let mut insert_key = key.to_vec();
        let mut insert_cell = key_cell;
        let mut insert_rec = rec_cell;

        loop {
            let pod = ctx.cs.fetch(ctx.pm, cur_addr, 0)?;
            let cell_len = insert_cell.cell_len();

            let mut fits = {
                let page = pod.rl();
                node::has_room(&page, &self.layout, cell_len)
            };
            if !fits {
                let mut page = pod.wl();
                node::vacuumize(&mut page, &self.layout);
                fits = node::has_room(&page, &self.layout, cell_len);
                if !fits {
                    node::reorganize(&mut page, &self.layout, cell_len + 8);
                    fits = node::has_room(&page, &self.layout, cell_len);
                }
            }

            if fits {
                let slot = {
                    let page = pod.rl();
                    let (pos, _) = self.search_node(ctx, &page, &insert_key)?;
                    (pos + 1) as usize
                };
                let mut page = pod.wl();
                return node::insert_at(&mut page, &self.layout, slot, &insert_cell, &insert_rec);
            }

            // split, then insert into the proper half
            let (pivot_bytes, right_addr) = self.split_node(ctx, &pod, &insert_key)?;
            debug!(
                "split node {:#x}, new sibling {:#x}",
                cur_addr, right_addr
            );

            let target = if self.compare.compare(&insert_key, &pivot_bytes) == Ordering::Less {
                cur_addr
            } else {
                right_addr
            };
            {
                let tpod = ctx.cs.fetch(ctx.pm, target, 0)?;
                let slot = {
                    let page = tpod.rl();
                    let (pos, _) = self.search_node(ctx, &page, &insert_key)?;
                    (pos + 1) as usize
                };
                let mut page = tpod.wl();
                node::insert_at(&mut page, &self.layout, slot, &insert_cell, &insert_rec)?;
            }

            // propagate the pivot upward
            let pivot_cell = self.make_key_cell(ctx, &pivot_bytes)?;
            let right_rec = right_addr.to_le_bytes().to_vec();
            match path.pop() {
                Some((parent_addr, _)) => {
                    cur_addr = parent_addr;
                    insert_key = pivot_bytes;
                    insert_cell = pivot_cell;
                    insert_rec = right_rec;
                }
                None => {
                    // the root split: grow the tree by one level
                    let root_pod = ctx.cs.alloc(ctx.pm, PageType::BTreeRoot)?;
                    let root_addr = {
                        let mut page = root_pod.wl();
                        node::init(&mut page, &self.layout, false);
                        node::set_left_child(&mut page, cur_addr);
                        node::insert_at(&mut page, &self.layout, 0, &pivot_cell, &right_rec)?;
                        page.address()
                    };
                    {
                        let old = ctx.cs.fetch(ctx.pm, cur_addr, 0)?;
                        let mut page = old.wl();
                        let ptype = if node::is_leaf(&page) {
                            PageType::BTreeLeaf
                        } else {
                            PageType::BTreeInternal
                        };
                        page.set_ptype(ptype);
                    }
                    self.root_address = root_addr;
                    self.root_dirty = true;
                    return Ok(());
                }
            }
        }
    }

    /// Splits the node into itself and a fresh right sibling; returns
    /// the pivot key (the smallest key of the right half) and the
    /// sibling's address.
    fn split_node(
        &mut self,
        ctx: &mut BtreeCtx,
        pod: &Pod<Page>,
        pending_key: &[u8],
    ) -> Result<(Vec<u8>, u64), OakError> {
        let leaf = node::is_leaf(&pod.rl());
        let count = node::slot_count(&pod.rl());

        // balanced halves; shifted when the new key lands at either end
        let first = self.load_key(ctx, &pod.rl(), 0)?;
        let last = self.load_key(ctx, &pod.rl(), count - 1)?;
        let mut pivot = if self.compare.compare(pending_key, &last) == Ordering::Greater {
            count.saturating_sub(2)
        } else if self.compare.compare(pending_key, &first) == Ordering::Less {
            2
        } else {
            count / 2
        };
        pivot = pivot.max(1).min(count - 1);

        let right_pod = ctx.cs.alloc(
            ctx.pm,
            if leaf {
                PageType::BTreeLeaf
            } else {
                PageType::BTreeInternal
            },
        )?;
        let right_addr = right_pod.rl().address();
        {
            let mut page = right_pod.wl();
            node::init(&mut page, &self.layout, leaf);
        }

        let pivot_bytes;
        if leaf {
            pivot_bytes = self.load_key(ctx, &pod.rl(), pivot)?;
            self.move_slots(ctx, pod, &right_pod, pivot, count)?;
            {
                let mut right = right_pod.wl();
                let mut left = pod.wl();
                node::set_right_sibling(&mut right, node::right_sibling(&left));
                node::set_right_sibling(&mut left, right_addr);
            }
        } else {
            // the pivot key of an internal node moves up, its child
            // becomes the sibling's left child
            pivot_bytes = self.load_key(ctx, &pod.rl(), pivot)?;
            let pivot_child = {
                let page = pod.rl();
                node::child_at(&page, &self.layout, pivot as i64)
            };
            {
                let mut right = right_pod.wl();
                node::set_left_child(&mut right, pivot_child);
            }
            self.move_slots(ctx, pod, &right_pod, pivot + 1, count)?;
            let pivot_cell = {
                let page = pod.rl();
                node::key_cell(&page, &self.layout, pivot)
            };
            self.free_key_cell(ctx, &pivot_cell)?;
            {
                let mut page = pod.wl();
                node::erase_at(&mut page, &self.layout, pivot);
            }
        }

        {
            let mut page = pod.wl();
            node::vacuumize(&mut page, &self.layout);
        }
        Ok((pivot_bytes, right_addr))
    }

    /// Moves the slots [from, to) of src to the end of dst and drops
    /// them from src.
    fn move_slots(
        &self,
        _ctx: &mut BtreeCtx,
        src: &Pod<Page>,
        dst: &Pod<Page>,
        from: usize,
        to: usize,
    ) -> OakResult {
        let mut moved = Vec::with_capacity(to - from);
        {
            let page = src.rl();
            for slot in from..to {
                moved.push((
                    node::key_cell(&page, &self.layout, slot),
                    node::record_cell(&page, &self.layout, slot),
                ));
            }
        }
        {
            let mut page = dst.wl();
            for (key_cell, rec_cell) in &moved {
                node::push(&mut page, &self.layout, key_cell, rec_cell)?;
            }
        }
        {
            let mut page = src.wl();
            // dropping the trailing slots; their heap cells are
            // reclaimed by the next vacuumize
            node::set_slot_count(&mut page, from);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // erase
    // ------------------------------------------------------------------

    /// Erases a key, one duplicate of it (`dup_idx`), or all of its
    /// duplicates (`None`).
    pub fn erase(
        &mut self,
        ctx: &mut BtreeCtx,
        key: &[u8],
        dup_idx: Option<u32>,
    ) -> OakResult {
        if self.root_address == 0 {
            return Err(OakError::key_not_found());
        }
        let (path, leaf_addr) = self.descend(ctx, key)?;
        let pod = ctx.cs.fetch(ctx.pm, leaf_addr, 0)?;
        let (pos, exact) = {
            let page = pod.rl();
            self.search_node(ctx, &page, key)?
        };
        if !exact {
            return Err(OakError::key_not_found());
        }
        let slot = pos as usize;

        let cell = {
            let page = pod.rl();
            node::record_cell(&page, &self.layout, slot)
        };
        let rref = self.leaf_record_ref(&cell)?;

        let remove_slot = match (dup_idx, rref) {
            (None, rref) => {
                self.free_record_ref(ctx, &rref)?;
                true
            }
            (Some(index), RecordRef::DupTable(id)) => {
                let mut table = duplicates::load_table(ctx.blob, ctx.pm, id)?;
                if index as usize >= table.len() {
                    return Err(OakError::key_not_found());
                }
                let removed = table.erase_at(index as usize);
                if let RecordRef::Blob(blob_id) = removed {
                    ctx.blob.erase(ctx.pm, blob_id)?;
                }
                match table.len() {
                    0 => {
                        duplicates::erase_table(ctx.blob, ctx.pm, id)?;
                        true
                    }
                    1 => {
                        // a single survivor moves back into the leaf
                        let survivor = table.entries[0].clone();
                        duplicates::erase_table(ctx.blob, ctx.pm, id)?;
                        let mut page = pod.wl();
                        node::set_record_cell(
                            &mut page,
                            &self.layout,
                            slot,
                            &encode_cell(&survivor),
                        );
                        false
                    }
                    _ => {
                        let new_id =
                            duplicates::store_table(ctx.blob, ctx.pm, &table, Some(id))?;
                        if new_id != id {
                            let mut page = pod.wl();
                            node::set_record_cell(
                                &mut page,
                                &self.layout,
                                slot,
                                &encode_cell(&RecordRef::DupTable(new_id)),
                            );
                        }
                        false
                    }
                }
            }
            (Some(0), rref) => {
                self.free_record_ref(ctx, &rref)?;
                true
            }
            (Some(_), _) => return Err(OakError::key_not_found()),
        };

        if !remove_slot {
            return Ok(());
        }

        {
            let key_cell = {
                let page = pod.rl();
                node::key_cell(&page, &self.layout, slot)
            };
            self.free_key_cell(ctx, &key_cell)?;
            let mut page = pod.wl();
            node::erase_at(&mut page, &self.layout, slot);
        }

        self.rebalance(ctx, path, leaf_addr)
    }

    /// Restores minimum occupancy after a slot was removed: shift one
    /// key from a sibling when it can spare one, merge otherwise, and
    /// collapse the root when it runs empty.
    fn rebalance(
        &mut self,
        ctx: &mut BtreeCtx,
        mut path: Vec<(u64, i64)>,
        mut node_addr: u64,
    ) -> OakResult {
        loop {
            let pod = ctx.cs.fetch(ctx.pm, node_addr, 0)?;
            let (count, leaf) = {
                let page = pod.rl();
                (node::slot_count(&page), node::is_leaf(&page))
            };

            let parent = match path.last().copied() {
                None => {
                    // node is the root
                    if !leaf && count == 0 {
                        let only_child = {
                            let page = pod.rl();
                            node::left_child(&page)
                        };
                        debug!("collapsing empty root {:#x}", node_addr);
                        {
                            let child = ctx.cs.fetch(ctx.pm, only_child, 0)?;
                            child.wl().set_ptype(PageType::BTreeRoot);
                        }
                        ctx.pm.free_page(&pod);
                        self.root_address = only_child;
                        self.root_dirty = true;
                    }
                    return Ok(());
                }
                Some(parent) => parent,
            };

            if count > MIN_SLOTS {
                return Ok(());
            }

            let (parent_addr, pos) = parent;
            let parent_pod = ctx.cs.fetch(ctx.pm, parent_addr, 0)?;
            let parent_count = node::slot_count(&parent_pod.rl()) as i64;

            let left_addr = if pos >= 0 {
                Some({
                    let page = parent_pod.rl();
                    node::child_at(&page, &self.layout, pos - 1)
                })
            } else {
                None
            };
            let right_addr = if pos + 1 < parent_count {
                Some({
                    let page = parent_pod.rl();
                    node::child_at(&page, &self.layout, pos + 1)
                })
            } else {
                None
            };

            // shift one key from a sibling that can spare it; the
            // rotation swaps a parent separator, so the parent must
            // have room for a worst-case replacement key
            let parent_has_room = {
                let page = parent_pod.rl();
                self.can_replace_separator(&page)
            };
            if parent_has_room {
                if let Some(right) = right_addr {
                    let right_pod = ctx.cs.fetch(ctx.pm, right, 0)?;
                    if node::slot_count(&right_pod.rl()) > MIN_SLOTS {
                        return self.borrow_from_right(ctx, &parent_pod, &pod, pos, &right_pod);
                    }
                }
                if let Some(left) = left_addr {
                    let left_pod = ctx.cs.fetch(ctx.pm, left, 0)?;
                    if node::slot_count(&left_pod.rl()) > MIN_SLOTS {
                        return self.borrow_from_left(ctx, &parent_pod, &pod, pos, &left_pod);
                    }
                }
            }

            // merge with a sibling
            let mut merged = false;
            if let Some(right) = right_addr {
                if self.can_merge(ctx, node_addr, right)? {
                    self.merge_nodes(ctx, &parent_pod, node_addr, pos, right)?;
                    merged = true;
                }
            }
            if !merged {
                if let Some(left) = left_addr {
                    if self.can_merge(ctx, left, node_addr)? {
                        self.merge_nodes(ctx, &parent_pod, left, pos - 1, node_addr)?;
                        merged = true;
                    }
                }
            }
            if !merged {
                return Ok(());
            }

            // the parent lost a key, continue there
            path.pop();
            node_addr = parent_addr;
        }
    }

    /// Whether the node can swap one separator for a worst-case
    /// replacement key without overflowing its key region.
    fn can_replace_separator(&self, page: &Page) -> bool {
        match self.layout.key_list {
            KeyList::Fixed { .. } => true,
            KeyList::Var { max_inline } => {
                let count = node::slot_count(page);
                let used: usize = (0..count)
                    .map(|slot| node::key_cell(page, &self.layout, slot).cell_len())
                    .sum();
                used + max_inline + count * 4 <= node::key_region(page).len()
            }
        }
    }

    /// Whether all slots of `right_addr` (plus the pulled-down
    /// separator for internal nodes) fit into `left_addr`.
    fn can_merge(
        &self,
        ctx: &mut BtreeCtx,
        left_addr: u64,
        right_addr: u64,
    ) -> Result<bool, OakError> {
        let left_pod = ctx.cs.fetch(ctx.pm, left_addr, 0)?;
        let right_pod = ctx.cs.fetch(ctx.pm, right_addr, 0)?;
        let left = left_pod.rl();
        let right = right_pod.rl();

        let leaf = node::is_leaf(&left);
        let extra = if leaf { 0 } else { 1 };
        let total = node::slot_count(&left) + node::slot_count(&right) + extra;

        if total > node::record_capacity(&left, &self.layout) {
            return Ok(false);
        }

        match self.layout.key_list {
            KeyList::Fixed { size } => Ok(total * size <= node::key_region(&left).len()),
            KeyList::Var { .. } => {
                let used = |page: &Page| -> usize {
                    (0..node::slot_count(page))
                        .map(|slot| node::key_cell(page, &self.layout, slot).cell_len())
                        .sum()
                };
                // the separator is bounded by the largest key cell
                let sep_bound = if leaf {
                    0
                } else {
                    self.layout.key_list.max_inline().max(8)
                };
                let needed = used(&left) + used(&right) + sep_bound + total * 4;
                Ok(needed <= node::key_region(&left).len())
            }
        }
    }

    /// Appends the right node to the left one and drops the right
    /// node; `left_pos` is the left node's child position in the
    /// parent.
    fn merge_nodes(
        &mut self,
        ctx: &mut BtreeCtx,
        parent_pod: &Pod<Page>,
        left_addr: u64,
        left_pos: i64,
        right_addr: u64,
    ) -> OakResult {
        let sep_idx = (left_pos + 1) as usize;
        let sep_bytes = {
            let page = parent_pod.rl();
            self.load_key(ctx, &page, sep_idx)?
        };

        let left_pod = ctx.cs.fetch(ctx.pm, left_addr, 0)?;
        let right_pod = ctx.cs.fetch(ctx.pm, right_addr, 0)?;
        let leaf = node::is_leaf(&left_pod.rl());

        debug!(
            "merging node {:#x} into {:#x} (separator idx {})",
            right_addr, left_addr, sep_idx
        );

        if leaf {
            let right_sibling = node::right_sibling(&right_pod.rl());
            let count = node::slot_count(&right_pod.rl());
            {
                let mut left = left_pod.wl();
                node::vacuumize(&mut left, &self.layout);
            }
            self.move_slots(ctx, &right_pod, &left_pod, 0, count)?;
            let mut left = left_pod.wl();
            node::set_right_sibling(&mut left, right_sibling);
        } else {
            // the separator comes down between the two halves
            let sep_cell = self.make_key_cell(ctx, &sep_bytes)?;
            let right_left_child = node::left_child(&right_pod.rl());
            {
                let mut left = left_pod.wl();
                node::vacuumize(&mut left, &self.layout);
                node::push(
                    &mut left,
                    &self.layout,
                    &sep_cell,
                    &right_left_child.to_le_bytes(),
                )?;
            }
            let count = node::slot_count(&right_pod.rl());
            self.move_slots(ctx, &right_pod, &left_pod, 0, count)?;
        }

        // drop the separator and the right child pointer
        {
            let sep_cell = {
                let page = parent_pod.rl();
                node::key_cell(&page, &self.layout, sep_idx)
            };
            self.free_key_cell(ctx, &sep_cell)?;
            let mut parent = parent_pod.wl();
            node::erase_at(&mut parent, &self.layout, sep_idx);
        }

        ctx.pm.free_page(&right_pod);
        Ok(())
    }

    fn borrow_from_right(
        &mut self,
        ctx: &mut BtreeCtx,
        parent_pod: &Pod<Page>,
        node_pod: &Pod<Page>,
        pos: i64,
        right_pod: &Pod<Page>,
    ) -> OakResult {
        let sep_idx = (pos + 1) as usize;
        let leaf = node::is_leaf(&node_pod.rl());

        let new_sep;
        if leaf {
            let (moved_cell, moved_rec) = {
                let page = right_pod.rl();
                (
                    node::key_cell(&page, &self.layout, 0),
                    node::record_cell(&page, &self.layout, 0),
                )
            };
            {
                let mut page = node_pod.wl();
                node::vacuumize(&mut page, &self.layout);
                node::push(&mut page, &self.layout, &moved_cell, &moved_rec)?;
            }
            {
                let mut page = right_pod.wl();
                node::erase_at(&mut page, &self.layout, 0);
            }
            new_sep = {
                let page = right_pod.rl();
                self.load_key(ctx, &page, 0)?
            };
        } else {
            // rotate through the parent separator
            let sep_bytes = {
                let page = parent_pod.rl();
                self.load_key(ctx, &page, sep_idx)?
            };
            let sep_cell = self.make_key_cell(ctx, &sep_bytes)?;
            let right_left_child = node::left_child(&right_pod.rl());
            {
                let mut page = node_pod.wl();
                node::vacuumize(&mut page, &self.layout);
                node::push(
                    &mut page,
                    &self.layout,
                    &sep_cell,
                    &right_left_child.to_le_bytes(),
                )?;
            }
            // the right node's first key becomes the new separator
            let new_left_child = {
                let page = right_pod.rl();
                node::child_at(&page, &self.layout, 0)
            };
            new_sep = {
                let page = right_pod.rl();
                self.load_key(ctx, &page, 0)?
            };
            let first_cell = {
                let page = right_pod.rl();
                node::key_cell(&page, &self.layout, 0)
            };
            self.free_key_cell(ctx, &first_cell)?;
            {
                let mut page = right_pod.wl();
                node::set_left_child(&mut page, new_left_child);
                node::erase_at(&mut page, &self.layout, 0);
            }
        }

        // the right subtree's smallest key changed
        self.replace_parent_key(ctx, parent_pod, sep_idx, &new_sep)
    }

    fn borrow_from_left(
        &mut self,
        ctx: &mut BtreeCtx,
        parent_pod: &Pod<Page>,
        node_pod: &Pod<Page>,
        pos: i64,
        left_pod: &Pod<Page>,
    ) -> OakResult {
        let sep_idx = pos as usize;
        let leaf = node::is_leaf(&node_pod.rl());
        let left_count = node::slot_count(&left_pod.rl());

        if leaf {
            let (moved_cell, moved_rec, moved_bytes) = {
                let page = left_pod.rl();
                (
                    node::key_cell(&page, &self.layout, left_count - 1),
                    node::record_cell(&page, &self.layout, left_count - 1),
                    self.load_key(ctx, &page, left_count - 1)?,
                )
            };
            {
                let mut page = node_pod.wl();
                node::vacuumize(&mut page, &self.layout);
                node::insert_at(&mut page, &self.layout, 0, &moved_cell, &moved_rec)?;
            }
            {
                let mut page = left_pod.wl();
                node::set_slot_count(&mut page, left_count - 1);
            }
            self.replace_parent_key(ctx, parent_pod, sep_idx, &moved_bytes)
        } else {
            let sep_bytes = {
                let page = parent_pod.rl();
                self.load_key(ctx, &page, sep_idx)?
            };
            let sep_cell = self.make_key_cell(ctx, &sep_bytes)?;
            let node_left_child = node::left_child(&node_pod.rl());
            {
                let mut page = node_pod.wl();
                node::vacuumize(&mut page, &self.layout);
                node::insert_at(
                    &mut page,
                    &self.layout,
                    0,
                    &sep_cell,
                    &node_left_child.to_le_bytes(),
                )?;
            }

            let moved_child = {
                let page = left_pod.rl();
                node::child_at(&page, &self.layout, (left_count - 1) as i64)
            };
            let moved_bytes = {
                let page = left_pod.rl();
                self.load_key(ctx, &page, left_count - 1)?
            };
            let moved_cell = {
                let page = left_pod.rl();
                node::key_cell(&page, &self.layout, left_count - 1)
            };
            self.free_key_cell(ctx, &moved_cell)?;
            {
                let mut page = node_pod.wl();
                node::set_left_child(&mut page, moved_child);
            }
            {
                let mut page = left_pod.wl();
                node::set_slot_count(&mut page, left_count - 1);
            }
            self.replace_parent_key(ctx, parent_pod, sep_idx, &moved_bytes)
        }
    }

    /// Swaps the separator key at `sep_idx` for `new_key`, keeping the
    /// child pointer.
    fn replace_parent_key(
        &mut self,
        ctx: &mut BtreeCtx,
        parent_pod: &Pod<Page>,
        sep_idx: usize,
        new_key: &[u8],
    ) -> OakResult {
        let old_cell = {
            let page = parent_pod.rl();
            node::key_cell(&page, &self.layout, sep_idx)
        };
        let child_rec = {
            let page = parent_pod.rl();
            node::record_cell(&page, &self.layout, sep_idx)
        };
        self.free_key_cell(ctx, &old_cell)?;
        let new_cell = self.make_key_cell(ctx, new_key)?;

        let mut page = parent_pod.wl();
        node::erase_at(&mut page, &self.layout, sep_idx);
        node::vacuumize(&mut page, &self.layout);
        node::insert_at(&mut page, &self.layout, sep_idx, &new_cell, &child_rec)
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    fn ensure_root(&mut self, ctx: &mut BtreeCtx) -> OakResult {
        if self.root_address != 0 {
            return Ok(());
        }
        let pod = ctx.cs.alloc(ctx.pm, PageType::BTreeRoot)?;
        {
            let mut page = pod.wl();
            node::init(&mut page, &self.layout, true);
        }
        self.root_address = pod.rl().address();
        self.root_dirty = true;
        debug!("btree root created at {:#x}", self.root_address);
        Ok(())
    }

    /// Walks from the root to the leaf that covers `key`. Returns the
    /// path of (address, child position) pairs and the leaf address.
    fn descend(
        &self,
        ctx: &mut BtreeCtx,
        key: &[u8],
    ) -> Result<(Vec<(u64, i64)>, u64), OakError> {
        let mut path = Vec::new();
        let mut cur = self.root_address;
        loop {
            let pod = ctx.cs.fetch(ctx.pm, cur, 0)?;
            let (leaf, pos, child) = {
                let page = pod.rl();
                if node::is_leaf(&page) {
                    (true, 0, 0)
                } else {
                    let (pos, _) = self.search_node(ctx, &page, key)?;
                    (false, pos, node::child_at(&page, &self.layout, pos))
                }
            };
            if leaf {
                return Ok((path, cur));
            }
            path.push((cur, pos));
            cur = child;
        }
    }

    /// Binary search: the largest slot whose key is <= `key`, or -1.
    fn search_node(
        &self,
        ctx: &mut BtreeCtx,
        page: &Page,
        key: &[u8],
    ) -> Result<(i64, bool), OakError> {
        let count = node::slot_count(page) as i64;
        let mut lo: i64 = 0;
        let mut hi: i64 = count - 1;
        let mut pos: i64 = -1;
        let mut exact = false;

        while lo <= hi {
            let mid = (lo + hi) / 2;
            let mid_key = self.load_key(ctx, page, mid as usize)?;
            match self.compare.compare(&mid_key, key) {
                Ordering::Less => {
                    pos = mid;
                    lo = mid + 1;
                }
                Ordering::Equal => {
                    pos = mid;
                    exact = true;
                    break;
                }
                Ordering::Greater => {
                    hi = mid - 1;
                }
            }
        }
        Ok((pos, exact))
    }

    /// The full key bytes of a slot; overflow keys are read from their
    /// blob.
    fn load_key(&self, ctx: &mut BtreeCtx, page: &Page, slot: usize) -> Result<Vec<u8>, OakError> {
        match node::key_cell(page, &self.layout, slot) {
            KeyCell::Inline(bytes) => Ok(bytes),
            KeyCell::Extended(id) => ctx.blob.read(ctx.pm, id),
        }
    }

    fn make_key_cell(&self, ctx: &mut BtreeCtx, key: &[u8]) -> Result<KeyCell, OakError> {
        match self.layout.key_list {
            KeyList::Fixed { .. } => Ok(KeyCell::Inline(key.to_vec())),
            KeyList::Var { max_inline } => {
                if key.len() > max_inline {
                    let id = ctx.blob.allocate(
                        ctx.pm,
                        key,
                        BlobKind::OverflowKey,
                        CompressionKind::None,
                    )?;
                    Ok(KeyCell::Extended(id))
                } else {
                    Ok(KeyCell::Inline(key.to_vec()))
                }
            }
        }
    }

    fn free_key_cell(&self, ctx: &mut BtreeCtx, cell: &KeyCell) -> OakResult {
        if let KeyCell::Extended(id) = cell {
            ctx.blob.erase(ctx.pm, *id)?;
        }
        Ok(())
    }

    fn leaf_record_ref(&self, cell: &[u8]) -> Result<RecordRef, OakError> {
        match self.layout.leaf_records {
            RecordList::Fixed { .. } => Ok(RecordRef::Inline(cell.to_vec())),
            RecordList::Default => decode_cell(cell),
        }
    }

    fn make_record_cell(&self, ctx: &mut BtreeCtx, record: &[u8]) -> Result<Vec<u8>, OakError> {
        match self.layout.leaf_records {
            RecordList::Fixed { size } => {
                if record.len() != size {
                    return Err(OakError::invalid_parameter("wrong record size"));
                }
                Ok(record.to_vec())
            }
            RecordList::Default => {
                let rref = self.make_dup_entry(ctx, record)?;
                Ok(encode_cell(&rref).to_vec())
            }
        }
    }

    /// Builds an inline-or-blob reference for one record.
    fn make_dup_entry(&self, ctx: &mut BtreeCtx, record: &[u8]) -> Result<RecordRef, OakError> {
        if record.len() <= INLINE_RECORD_MAX && !self.record_compression.is_enabled() {
            return Ok(RecordRef::Inline(record.to_vec()));
        }
        let id = ctx
            .blob
            .allocate(ctx.pm, record, BlobKind::Data, self.record_compression)?;
        Ok(RecordRef::Blob(id))
    }

    fn free_record_ref(&self, ctx: &mut BtreeCtx, rref: &RecordRef) -> OakResult {
        match rref {
            RecordRef::Inline(_) => Ok(()),
            RecordRef::Blob(id) => ctx.blob.erase(ctx.pm, *id),
            RecordRef::DupTable(id) => {
                let table = duplicates::load_table(ctx.blob, ctx.pm, *id)?;
                for entry in &table.entries {
                    if let RecordRef::Blob(blob_id) = entry {
                        ctx.blob.erase(ctx.pm, *blob_id)?;
                    }
                }
                duplicates::erase_table(ctx.blob, ctx.pm, *id)
            }
        }
    }

    // ------------------------------------------------------------------
    // maintenance
    // ------------------------------------------------------------------

    /// Verifies slot ordering, child intervals and uniform leaf depth.
    pub fn check_integrity(&self, ctx: &mut BtreeCtx) -> OakResult {
        if self.root_address == 0 {
            return Ok(());
        }
        self.check_subtree(ctx, self.root_address, None, None)?;
        Ok(())
    }

    fn check_subtree(
        &self,
        ctx: &mut BtreeCtx,
        addr: u64,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Result<usize, OakError> {
        let pod = ctx.cs.fetch(ctx.pm, addr, 0)?;
        let (count, leaf) = {
            let page = pod.rl();
            (node::slot_count(&page), node::is_leaf(&page))
        };

        let mut keys = Vec::with_capacity(count);
        {
            let page = pod.rl();
            for slot in 0..count {
                keys.push(self.load_key(ctx, &page, slot)?);
            }
        }

        for window in keys.windows(2) {
            if self.compare.compare(&window[0], &window[1]) != Ordering::Less {
                return Err(OakError::integrity(&format!(
                    "keys out of order in node {:#x}",
                    addr
                )));
            }
        }
        if let Some(lower) = lower {
            if let Some(first) = keys.first() {
                if self.compare.compare(first, lower) == Ordering::Less {
                    return Err(OakError::integrity(&format!(
                        "key below lower bound in node {:#x}",
                        addr
                    )));
                }
            }
        }
        if let Some(upper) = upper {
            if let Some(last) = keys.last() {
                if self.compare.compare(last, upper) != Ordering::Less {
                    return Err(OakError::integrity(&format!(
                        "key above upper bound in node {:#x}",
                        addr
                    )));
                }
            }
        }

        if leaf {
            return Ok(0);
        }

        let mut depth = None;
        for pos in -1..count as i64 {
            let child = {
                let page = pod.rl();
                node::child_at(&page, &self.layout, pos)
            };
            let child_lower = if pos < 0 {
                lower
            } else {
                Some(keys[pos as usize].as_slice())
            };
            let child_upper = if pos + 1 < count as i64 {
                Some(keys[(pos + 1) as usize].as_slice())
            } else {
                upper
            };
            let child_depth = self.check_subtree(ctx, child, child_lower, child_upper)?;
            match depth {
                None => depth = Some(child_depth),
                Some(expected) if expected != child_depth => {
                    return Err(OakError::integrity("leaf depth is not uniform"));
                }
                _ => {}
            }
        }
        Ok(depth.unwrap_or(0) + 1)
    }

    /// Frees every page, record blob and overflow key of the tree.
    /// Used when a database is erased.
    pub fn drop_all(&mut self, ctx: &mut BtreeCtx) -> OakResult {
        if self.root_address == 0 {
            return Ok(());
        }
        self.drop_subtree(ctx, self.root_address)?;
        self.root_address = 0;
        self.root_dirty = true;
        Ok(())
    }

    fn drop_subtree(&self, ctx: &mut BtreeCtx, addr: u64) -> OakResult {
        let pod = ctx.cs.fetch(ctx.pm, addr, 0)?;
        let (count, leaf) = {
            let page = pod.rl();
            (node::slot_count(&page), node::is_leaf(&page))
        };

        if leaf {
            for slot in 0..count {
                let (key_cell, rec_cell) = {
                    let page = pod.rl();
                    (
                        node::key_cell(&page, &self.layout, slot),
                        node::record_cell(&page, &self.layout, slot),
                    )
                };
                self.free_key_cell(ctx, &key_cell)?;
                let rref = self.leaf_record_ref(&rec_cell)?;
                self.free_record_ref(ctx, &rref)?;
            }
        } else {
            let children: Vec<u64> = {
                let page = pod.rl();
                (-1..count as i64)
                    .map(|pos| node::child_at(&page, &self.layout, pos))
                    .collect()
            };
            // one batched read fills the cache for the whole level
            ctx.pm.fetch_multiple(&children)?;

            for (index, child) in children.iter().enumerate() {
                self.drop_subtree(ctx, *child)?;
                // the first child hangs off the left-child pointer
                // and has no separator key
                if index >= 1 {
                    let key_cell = {
                        let page = pod.rl();
                        node::key_cell(&page, &self.layout, index - 1)
                    };
                    self.free_key_cell(ctx, &key_cell)?;
                }
            }
        }
        ctx.pm.free_page(&pod);
        Ok(())
    }
}
