//! Lazy, paged, restartable iteration over a tenant's chain.

use std::collections::VecDeque;

use ledgerseal_contracts::{
    entry::{AuditEntry, TenantId},
    error::LedgerResult,
};

use crate::traits::{EntryRecord, LedgerStore};

/// What a stream yields and how a page of it is fetched.
pub trait StreamItem: Sized {
    fn sequence(&self) -> u64;

    fn fetch<S: LedgerStore + ?Sized>(
        store: &S,
        tenant: &TenantId,
        from: u64,
        through: u64,
        limit: usize,
    ) -> LedgerResult<Vec<Self>>;
}

impl StreamItem for AuditEntry {
    fn sequence(&self) -> u64 {
        AuditEntry::sequence(self)
    }

    fn fetch<S: LedgerStore + ?Sized>(
        store: &S,
        tenant: &TenantId,
        from: u64,
        through: u64,
        limit: usize,
    ) -> LedgerResult<Vec<Self>> {
        store.read_page(tenant, from, through, limit)
    }
}

impl StreamItem for EntryRecord {
    fn sequence(&self) -> u64 {
        EntryRecord::sequence(self)
    }

    fn fetch<S: LedgerStore + ?Sized>(
        store: &S,
        tenant: &TenantId,
        from: u64,
        through: u64,
        limit: usize,
    ) -> LedgerResult<Vec<Self>> {
        store.read_records(tenant, from, through, limit)
    }
}

/// Ascending stream of one tenant's entries, fetched a page at a time.
///
/// Yields `Err` at most once (the failing page read) and then ends.  With
/// `T = EntryRecord` (see `records`) undecodable entries are yielded as
/// items instead of ending the stream.
pub struct EntryStream<'s, S: LedgerStore + ?Sized, T = AuditEntry> {
    store: &'s S,
    tenant: TenantId,
    next: u64,
    through: u64,
    page_size: usize,
    buffer: VecDeque<T>,
    exhausted: bool,
}

impl<'s, S: LedgerStore + ?Sized> EntryStream<'s, S, AuditEntry> {
    /// Stream `tenant` from `from` up to and including `through`.
    pub fn new(store: &'s S, tenant: TenantId, from: u64, through: u64, page_size: usize) -> Self {
        Self::open(store, tenant, from, through, page_size)
    }
}

impl<'s, S: LedgerStore + ?Sized> EntryStream<'s, S, EntryRecord> {
    /// Like `new`, but reads through `LedgerStore::read_records`.
    pub fn records(store: &'s S, tenant: TenantId, from: u64, through: u64, page_size: usize) -> Self {
        Self::open(store, tenant, from, through, page_size)
    }
}

impl<'s, S: LedgerStore + ?Sized, T: StreamItem> EntryStream<'s, S, T> {
    fn open(store: &'s S, tenant: TenantId, from: u64, through: u64, page_size: usize) -> Self {
        Self {
            store,
            tenant,
            next: from,
            through,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            exhausted: from > through,
        }
    }

    /// Sequence the stream would read next.  Pass it to `iterate` to resume.
    pub fn next_sequence(&self) -> u64 {
        self.buffer.front().map(T::sequence).unwrap_or(self.next)
    }

    /// Upper bound fixed when the stream was opened.
    pub fn through(&self) -> u64 {
        self.through
    }

    fn fill(&mut self) -> LedgerResult<()> {
        let page = T::fetch(self.store, &self.tenant, self.next, self.through, self.page_size)?;
        match page.last() {
            Some(last) => {
                self.next = last.sequence() + 1;
                if self.next > self.through {
                    self.exhausted = true;
                }
            }
            None => self.exhausted = true,
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<S: LedgerStore + ?Sized, T: StreamItem> Iterator for EntryStream<'_, S, T> {
    type Item = LedgerResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
