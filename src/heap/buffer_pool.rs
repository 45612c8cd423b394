use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, RwLock,
};

use log::debug;

use crate::{
    error::{ErrorKind, SmallError},
    heap::{HeapPage, HeapPageID},
    storage::Tuple,
    transaction::{ConcurrentStatus, Permission, Transaction, TransactionID},
    tx_log::LogManager,
    types::{Pod, ResultPod, SmallResult},
    utils::HandyRwLock,
    Database,
};

pub const DEFAULT_PAGE_SIZE: usize = 4096;
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

pub const DEFAULT_PAGES: usize = 50;

struct BufferSlot {
    pid: HeapPageID,
    page: Pod<HeapPage>,
}

/// The transactional page cache.
///
/// A fixed array of slots sits between the tuple operations and the
/// table files. Every page access goes through `get_page`, which
/// latches the chosen slot (via `ConcurrentStatus`) before the slot
/// is filled, so a page reference stays valid for as long as its
/// latch is held.
///
/// The pool runs NO-STEAL / FORCE: a page dirtied by a live
/// transaction is never evicted or written back early, and a commit
/// flushes everything the transaction touched, appending and forcing
/// the UPDATE log record before each page write.
pub struct BufferPool {
    slots: Vec<Option<BufferSlot>>,

    /// Clock hand of the eviction sweep.
    evict_idx: usize,
}

impl BufferPool {
    pub fn new(num_pages: usize) -> Self {
        Self {
            slots: (0..num_pages).map(|_| None).collect(),
            evict_idx: 0,
        }
    }

    /// Drop every cached page and change the slot count. Callers
    /// must make sure no transaction is active, since latches refer
    /// to slot indices.
    pub fn set_capacity(&mut self, num_pages: usize) {
        self.slots = (0..num_pages).map(|_| None).collect();
        self.evict_idx = 0;
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.evict_idx = 0;
    }

    pub fn set_page_size(page_size: usize) {
        PAGE_SIZE.store(page_size, Ordering::Relaxed);
    }

    pub fn get_page_size() -> usize {
        PAGE_SIZE.load(Ordering::Relaxed)
    }

    fn slot_of(&self, pid: &HeapPageID) -> Option<usize> {
        self.slots.iter().position(|slot| match slot {
            Some(resident) => resident.pid == *pid,
            None => false,
        })
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.is_none())
    }

    /// Is `pid` cached right now?
    pub fn contains(&self, pid: &HeapPageID) -> bool {
        self.slot_of(pid).is_some()
    }

    /// Retrieve the page with the requested permission, blocking
    /// until the matching latch is granted. The page is looked up in
    /// the pool first; on a miss it is read through the table file
    /// into an empty (possibly just evicted) slot.
    ///
    /// The slot latch is always acquired *before* the slot is
    /// filled, and the pool guard is never held while blocking on a
    /// latch. Because of that gap the chosen slot must be
    /// re-validated after the latch is granted; a stale choice backs
    /// off and starts over.
    ///
    /// Fails with `DeadlockAborted` (propagated from the latch
    /// table) or `NoEvictablePage` (every slot pinned by the
    /// NO-STEAL rule).
    pub fn get_page(tx: &Transaction, perm: Permission, pid: &HeapPageID) -> ResultPod<HeapPage> {
        loop {
            // step 1: pick a slot under the pool guard. A hit must
            // reuse the resident slot; a miss takes an empty slot,
            // evicting one when none is left.
            let slot = {
                let mut bp = Database::mut_buffer_pool();
                match bp.slot_of(pid) {
                    Some(slot) => slot,
                    None => match bp.free_slot() {
                        Some(slot) => slot,
                        None => bp.evict_page()?,
                    },
                }
            };

            // step 2: latch the slot with the pool guard dropped,
            // the wait can be unbounded
            let held_before = Database::concurrent_status().is_holding(tx.get_id(), slot);
            ConcurrentStatus::request_latch(tx, &perm.to_lock(), slot)?;

            // step 3: re-validate, the slot may have been filled,
            // evicted or reused while we were blocked
            let needs_fill = {
                let bp = Database::buffer_pool();
                match &bp.slots[slot] {
                    Some(resident) if resident.pid == *pid => {
                        return Ok(resident.page.clone());
                    }
                    // the slot went to another page
                    Some(_) => false,
                    // fill it, unless the page surfaced elsewhere
                    None => !bp.contains(pid),
                }
            };
            if !needs_fill {
                Self::back_off(tx, slot, held_before);
                continue;
            }

            // step 4: read through the storage backend, holding
            // nothing but the slot latch
            let page = match Self::load_page(pid) {
                Ok(page) => page,
                Err(e) => {
                    Self::back_off(tx, slot, held_before);
                    return Err(e);
                }
            };

            // step 5: publish, unless the page raced in elsewhere
            // while we were reading
            {
                let mut bp = Database::mut_buffer_pool();
                if bp.slots[slot].is_none() && !bp.contains(pid) {
                    bp.slots[slot] = Some(BufferSlot {
                        pid: *pid,
                        page: page.clone(),
                    });
                    return Ok(page);
                }
            }
            Self::back_off(tx, slot, held_before);
        }
    }

    /// Undo a latch acquired by the current `get_page` attempt. A
    /// latch the transaction held before the attempt stays held.
    fn back_off(tx: &Transaction, slot: usize, held_before: bool) {
        if !held_before {
            Database::mut_concurrent_status()
                .release_latch(tx.get_id(), slot)
                .ok();
        }
    }

    fn load_page(pid: &HeapPageID) -> ResultPod<HeapPage> {
        let table_rc = Database::catalog().get_table(&pid.table_id).ok_or_else(|| {
            SmallError::new(
                ErrorKind::InvariantViolation,
                &format!("table {} is not in the catalog", pid.table_id),
            )
        })?;

        let table = table_rc.rl();
        let buf = table.read_page(pid.page_index)?;
        let page = HeapPage::new(pid, &buf, &table.schema);
        Ok(Arc::new(RwLock::new(page)))
    }

    /// Free one slot with a clock sweep over the clean, unlatched
    /// slots. Dirty slots are never candidates (NO-STEAL), so the
    /// dropped page needs no log record and no disk write. When the
    /// hand comes back around without finding a victim, the workload
    /// has outgrown the buffer and the caller has to abort.
    fn evict_page(&mut self) -> Result<usize, SmallError> {
        let capacity = self.slots.len();
        let cs = Database::concurrent_status();

        for _ in 0..capacity {
            let slot = self.evict_idx;
            self.evict_idx = (self.evict_idx + 1) % capacity;

            let evictable = match &self.slots[slot] {
                None => true,
                Some(resident) => {
                    resident.page.rl().dirtier().is_none() && !cs.has_holder(slot)
                }
            };

            if evictable {
                if let Some(resident) = self.slots[slot].take() {
                    debug!("evicting {} from slot {}", resident.pid, slot);
                }
                return Ok(slot);
            }
        }

        Err(SmallError::new(
            ErrorKind::NoEvictablePage,
            "every buffer slot holds a dirty or latched page",
        ))
    }

    /// True iff `pid` is resident and `tx` latches its slot in
    /// either mode.
    pub fn holds_lock(tx: &Transaction, pid: &HeapPageID) -> bool {
        let bp = Database::buffer_pool();
        match bp.slot_of(pid) {
            Some(slot) => Database::concurrent_status().is_holding(tx.get_id(), slot),
            None => false,
        }
    }

    /// Give back the latch on `pid` before the transaction
    /// completes. Only safe for pages the transaction read but never
    /// modified, e.g. probed-and-rejected pages of an insert; it is
    /// a caller error when the page is not resident or not latched
    /// by `tx`.
    pub fn release_page(tx: &Transaction, pid: &HeapPageID) -> SmallResult {
        let slot = Database::buffer_pool().slot_of(pid).ok_or_else(|| {
            SmallError::new(
                ErrorKind::InvariantViolation,
                &format!("{} is not resident", pid),
            )
        })?;

        Database::mut_concurrent_status().release_latch(tx.get_id(), slot)
    }

    /// Add the tuple to the table on behalf of `tx`. The table picks
    /// and write-latches the pages it edits through `get_page`; the
    /// pages it reports back are marked dirty here.
    pub fn insert_tuple(tx: &Transaction, table_id: u32, tuple: &mut Tuple) -> SmallResult {
        let table_rc = Database::catalog().get_table(&table_id).ok_or_else(|| {
            SmallError::new(
                ErrorKind::InvariantViolation,
                &format!("table {} is not in the catalog", table_id),
            )
        })?;

        let dirtied = table_rc.rl().insert_tuple(tx, tuple)?;
        for page_rc in dirtied {
            page_rc.wl().set_dirty(tx.get_id());
        }
        Ok(())
    }

    /// Remove the tuple from the table that owns it, routed through
    /// the tuple's record id.
    pub fn delete_tuple(tx: &Transaction, tuple: &Tuple) -> SmallResult {
        let rid = tuple.get_rid().ok_or_else(|| {
            SmallError::new(ErrorKind::InvariantViolation, "tuple has no record id")
        })?;

        let table_rc = Database::catalog()
            .get_table(&rid.pid.table_id)
            .ok_or_else(|| {
                SmallError::new(
                    ErrorKind::InvariantViolation,
                    &format!("table {} is not in the catalog", rid.pid.table_id),
                )
            })?;

        let page_rc = table_rc.rl().delete_tuple(tx, tuple)?;
        page_rc.wl().set_dirty(tx.get_id());
        Ok(())
    }

    /// Finish `tx`.
    ///
    /// On commit every slot the transaction latches is flushed (a
    /// no-op for clean slots) and its before-image refreshed; on
    /// abort every slot it dirtied is emptied, so the next read
    /// observes the pre-transaction bytes on disk. Either way the
    /// latches are released only after the per-slot pass, since the
    /// latch set is what identifies the pages the transaction
    /// touched.
    ///
    /// A flush failure leaves the transaction in doubt: the error
    /// propagates and nothing is released, recovery is up to the
    /// surrounding engine.
    pub fn tx_complete(tx: &Transaction, commit: bool) -> SmallResult {
        let locked_slots = Database::concurrent_status().hold_slots(tx.get_id());

        {
            let mut bp = Database::mut_buffer_pool();
            let mut log_manager = Database::mut_log_manager();

            if commit {
                for &slot in &locked_slots {
                    bp.flush_slot(slot, &mut log_manager)?;
                }
                log_manager.log_commit(tx)?;
                log_manager.force()?;
            } else {
                for &slot in &locked_slots {
                    bp.discard_if_dirty_by(slot, tx.get_id());
                }
                log_manager.log_abort(tx)?;
            }
        }

        Database::mut_concurrent_status().release_all(tx.get_id());
        Ok(())
    }

    /// Write the page in `slot` back to its table if it is dirty:
    /// UPDATE record, log force, page write, then mark clean and
    /// refresh the undo snapshot. Latches are untouched.
    fn flush_slot(&mut self, slot: usize, log_manager: &mut LogManager) -> SmallResult {
        let (pid, page_rc) = match &self.slots[slot] {
            Some(resident) => (resident.pid, resident.page.clone()),
            None => return Ok(()),
        };

        let table_rc = Database::catalog().get_table(&pid.table_id).ok_or_else(|| {
            SmallError::new(
                ErrorKind::InvariantViolation,
                &format!("table {} is not in the catalog", pid.table_id),
            )
        })?;

        let mut page = page_rc.wl();
        let dirtier = match page.dirtier() {
            Some(tid) => tid,
            None => return Ok(()),
        };

        let after_image = page.get_page_data();

        // WAL: the update record is durable before the page write
        log_manager.log_update(dirtier, &pid, &page.get_before_image(), &after_image)?;
        log_manager.force()?;

        table_rc.rl().write_page(&pid, &after_image)?;

        page.set_clean();
        page.set_before_image();

        debug!("flushed {} from slot {}", pid, slot);
        Ok(())
    }

    /// Flush `pid` if it is resident and dirty. Latches are
    /// untouched.
    pub fn flush_page(&mut self, pid: &HeapPageID, log_manager: &mut LogManager) -> SmallResult {
        match self.slot_of(pid) {
            Some(slot) => self.flush_slot(slot, log_manager),
            None => Ok(()),
        }
    }

    /// Flush every resident dirty page.
    ///
    /// NB: be careful using this routine. Writing the pages of a
    /// live transaction breaks the NO-STEAL guarantee that abort can
    /// rely on the disk holding pre-transaction bytes; it exists for
    /// tests and checkpoint-style maintenance.
    pub fn flush_all_pages(&mut self, log_manager: &mut LogManager) -> SmallResult {
        for slot in 0..self.slots.len() {
            self.flush_slot(slot, log_manager)?;
        }
        Ok(())
    }

    /// Forcibly empty the slot holding `pid` without flushing.
    /// Needed to drop a rolled-back page and to reclaim deleted
    /// pages. Latches are untouched; the caller must know that no
    /// other transaction is using the page.
    pub fn discard_page(&mut self, pid: &HeapPageID) {
        if let Some(slot) = self.slot_of(pid) {
            self.slots[slot] = None;
        }
    }

    fn discard_if_dirty_by(&mut self, slot: usize, tid: TransactionID) {
        let discard = match &self.slots[slot] {
            Some(resident) => resident.page.rl().dirtier() == Some(tid),
            None => false,
        };

        if discard {
            if let Some(resident) = self.slots[slot].take() {
                debug!("dropping {} dirtied by aborted tx_{}", resident.pid, tid);
            }
        }
    }
}
