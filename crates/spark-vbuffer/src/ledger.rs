//! 追加账本：每次追加一条记录，按“待排出 / 已保留”两条 FIFO 队列组织。
//!
//! - `pending`：已追加、尚未排出的记录，队首即下一次 `drain` 的目标；
//! - `retained`：已排出但被只读标记钉住的记录，等待回收扫描释放其边界与数据块。
//!
//! 记录与其推送边界一一对应：边界块上的 [`EntryId`] 指回记录，记录中的
//! `boundary` 指向边界块。

use std::collections::{TryReserveError, VecDeque};

use crate::chunk::ChunkId;

/// 账本记录标识，在单个流内单调递增。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EntryId(u64);

impl EntryId {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub(crate) struct LedgerEntry<T> {
    pub(crate) id: EntryId,
    pub(crate) boundary: ChunkId,
    pub(crate) tag: Option<T>,
}

#[derive(Debug)]
pub(crate) struct Ledger<T> {
    pending: VecDeque<LedgerEntry<T>>,
    retained: VecDeque<LedgerEntry<T>>,
    next_id: u64,
}

impl<T> Ledger<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity),
            retained: VecDeque::new(),
            next_id: 1,
        }
    }

    /// 下一条记录将使用的标识；仅在 [`Ledger::push_pending`] 成功后才被消耗。
    pub(crate) fn peek_id(&self) -> EntryId {
        EntryId(self.next_id)
    }

    /// 预留一条待排出记录的空间，保证随后的 `push_pending` 不再分配。
    pub(crate) fn try_reserve_pending(&mut self) -> Result<(), TryReserveError> {
        self.pending.try_reserve(1)
    }

    pub(crate) fn push_pending(&mut self, boundary: ChunkId, tag: T) -> EntryId {
        let id = self.peek_id();
        self.next_id += 1;
        self.pending.push_back(LedgerEntry {
            id,
            boundary,
            tag: Some(tag),
        });
        id
    }

    pub(crate) fn oldest_pending(&self) -> Option<&LedgerEntry<T>> {
        self.pending.front()
    }

    pub(crate) fn pop_pending(&mut self) -> Option<LedgerEntry<T>> {
        self.pending.pop_front()
    }

    /// 将已排出但仍被钉住的记录移入保留队列。
    pub(crate) fn retain(&mut self, entry: LedgerEntry<T>) {
        debug_assert!(entry.tag.is_none());
        self.retained.push_back(entry);
    }

    pub(crate) fn oldest_retained(&self) -> Option<&LedgerEntry<T>> {
        self.retained.front()
    }

    pub(crate) fn newest_retained(&self) -> Option<&LedgerEntry<T>> {
        self.retained.back()
    }

    pub(crate) fn pop_retained(&mut self) -> Option<LedgerEntry<T>> {
        self.retained.pop_front()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn retained_len(&self) -> usize {
        self.retained.len()
    }

    /// 取出所有仍由账本持有的标签，用于流销毁时交给标签回收回调。
    pub(crate) fn take_tags(&mut self) -> Vec<T> {
        self.pending
            .drain(..)
            .chain(self.retained.drain(..))
            .filter_map(|entry| entry.tag)
            .collect()
    }
}
