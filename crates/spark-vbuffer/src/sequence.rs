//! 主块序列：以代数槽位为地址的双向链表。
//!
//! # 教案式说明
//! - **意图（Why）**：流的全部结构（数据、边界、标记、尾锚点）都线性排列在同一条序列中，
//!   游标与账本通过 [`ChunkId`] 引用其中的块，因此块地址必须在插入、删除其它块时保持不变；
//! - **结构（How）**：
//!   - `slots` 为槽位数组，空闲槽位下标记录在 `free` 中复用；
//!   - 槽位释放时代数加一，持有旧 [`ChunkId`] 的游标在解析时得到 `DanglingCursor`；
//!   - 链接字段保存裸下标，只有存活节点才会出现在链上；
//!   - 序列永远以尾锚点收尾，`tail` 始终指向带 `end` 标志的块；
//! - **契约（What）**：
//!   - 新增节点前必须先调用 [`ChunkSequence::reserve`]，预留成功后插入不会失败，
//!     从而保证上层操作“要么全部完成，要么不改变序列”；
//!   - `live`/`resident_bytes` 随分配与释放实时维护，供统计快照使用。

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    chunk::{Chunk, ChunkFlags, ChunkId, ChunkKind},
    cursor::Cursor,
    error::StreamError,
};

#[derive(Debug)]
struct Node {
    chunk: Chunk,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// 流的主块序列，对外只读。
#[derive(Debug)]
pub struct ChunkSequence {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: u32,
    tail: u32,
    live: usize,
    resident_bytes: usize,
    budget: Option<usize>,
}

impl ChunkSequence {
    /// 创建只含尾锚点占位的序列。
    pub(crate) fn new(initial_chunks: usize, budget: Option<usize>) -> Self {
        let mut slots = Vec::with_capacity(initial_chunks.max(1));
        slots.push(Slot {
            generation: 0,
            node: Some(Node {
                chunk: Chunk {
                    kind: ChunkKind::Anchor,
                    flags: ChunkFlags {
                        end: true,
                        ..ChunkFlags::default()
                    },
                },
                prev: None,
                next: None,
            }),
        });
        Self {
            slots,
            free: Vec::new(),
            head: 0,
            tail: 0,
            live: 1,
            resident_bytes: 0,
            budget,
        }
    }

    // ---- 只读视图 ----

    /// 首块标识。
    pub fn head(&self) -> ChunkId {
        self.id_of(self.head)
    }

    /// 尾锚点标识。
    pub fn tail(&self) -> ChunkId {
        self.id_of(self.tail)
    }

    /// 查询块；标识已失效时返回 `None`。
    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_ref())
            .map(|node| &node.chunk)
    }

    /// 块标识是否仍然有效。
    pub fn contains(&self, id: ChunkId) -> bool {
        self.get(id).is_some()
    }

    /// 当前存活块数（含控制块与尾锚点）。
    pub fn live_chunks(&self) -> usize {
        self.live
    }

    /// 当前序列中数据块的字节总数。共享存储的克隆各自计数。
    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }

    /// 从首块到尾锚点依次遍历。
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            sequence: self,
            next: Some(self.head),
        }
    }

    /// 全部数据字节的拷贝，诊断用途。
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.resident_bytes);
        for (_, chunk) in self.iter() {
            if let Some(bytes) = chunk.bytes() {
                out.put_slice(bytes);
            }
        }
        out.freeze()
    }

    /// 从游标位置起读取数据字节，直至尾锚点或达到 `limit`。控制块被跳过。
    ///
    /// 这是消费者透过标记重读被钉住区间的方式：标记本身位于序列中，
    /// 以 [`crate::Mark::cursor`] 为起点即可读到其后的全部保留字节。
    pub fn copy_from(&self, at: Cursor, limit: Option<usize>) -> Result<Bytes, StreamError> {
        let (mut index, mut offset) = self.normalize(at)?;
        let mut budget = limit.unwrap_or(usize::MAX);
        let mut out = BytesMut::new();
        loop {
            if budget == 0 {
                break;
            }
            let node = self.node(index);
            if let Some(bytes) = node.chunk.bytes() {
                let take = (bytes.len() - offset).min(budget);
                out.put_slice(&bytes[offset..offset + take]);
                budget -= take;
            }
            offset = 0;
            match node.next {
                Some(next) => index = next,
                None => break,
            }
        }
        Ok(out.freeze())
    }

    // ---- 内部操作 ----

    pub(crate) fn head_index(&self) -> u32 {
        self.head
    }

    pub(crate) fn tail_index(&self) -> u32 {
        self.tail
    }

    pub(crate) fn id_of(&self, index: u32) -> ChunkId {
        ChunkId::new(index, self.slots[index as usize].generation)
    }

    /// 将标识解析为槽位下标。
    pub(crate) fn resolve(&self, id: ChunkId) -> Result<u32, StreamError> {
        if self.contains(id) {
            Ok(id.index() as u32)
        } else {
            Err(StreamError::DanglingCursor { chunk: id })
        }
    }

    pub(crate) fn chunk(&self, index: u32) -> &Chunk {
        &self.node(index).chunk
    }

    /// 可变访问块的标志与控制元数据。调用方不得改变数据块的字节长度。
    pub(crate) fn chunk_mut(&mut self, index: u32) -> &mut Chunk {
        &mut self.node_mut(index).chunk
    }

    pub(crate) fn next(&self, index: u32) -> Option<u32> {
        self.node(index).next
    }

    /// 预留 `count` 个新块的空间。
    ///
    /// 超出块预算或底层分配失败时返回 `OutOfMemory`，序列保持不变。
    pub(crate) fn reserve(&mut self, count: usize) -> Result<(), StreamError> {
        let out_of_memory = |live, budget| StreamError::OutOfMemory {
            requested: count,
            live,
            budget,
        };
        if let Some(budget) = self.budget
            && self.live + count > budget
        {
            return Err(out_of_memory(self.live, Some(budget)));
        }
        let fresh = count.saturating_sub(self.free.len());
        self.slots
            .try_reserve(fresh)
            .map_err(|_| out_of_memory(self.live, self.budget))?;
        if self.slots.len() + fresh > u32::MAX as usize {
            return Err(out_of_memory(self.live, self.budget));
        }
        Ok(())
    }

    /// 在 `at` 之前插入新块。
    pub(crate) fn insert_before(&mut self, at: u32, chunk: Chunk) -> u32 {
        let prev = self.node(at).prev;
        let index = self.alloc(chunk, prev, Some(at));
        match prev {
            Some(prev) => self.node_mut(prev).next = Some(index),
            None => self.head = index,
        }
        self.node_mut(at).prev = Some(index);
        index
    }

    /// 在 `at` 之后插入新块；若 `at` 是尾部，新块成为尾部。
    pub(crate) fn insert_after(&mut self, at: u32, chunk: Chunk) -> u32 {
        let next = self.node(at).next;
        let index = self.alloc(chunk, Some(at), next);
        match next {
            Some(next) => self.node_mut(next).prev = Some(index),
            None => self.tail = index,
        }
        self.node_mut(at).next = Some(index);
        index
    }

    /// 将数据块在 `offset` 处一分为二，返回后半块下标。字节存储保持共享。
    pub(crate) fn split_data(&mut self, index: u32, offset: usize) -> u32 {
        let chunk = self.chunk_mut(index);
        let flags = chunk.flags;
        let rest = match &mut chunk.kind {
            ChunkKind::Data(bytes) => bytes.split_off(offset),
            _ => unreachable!("split_data 仅作用于数据块"),
        };
        self.resident_bytes -= rest.len();
        self.insert_after(index, Chunk::data(rest, flags.writable))
    }

    /// 解除链接并释放块。尾锚点不可移除。
    pub(crate) fn remove(&mut self, index: u32) -> Chunk {
        debug_assert_ne!(index, self.tail, "尾锚点不可移除");
        let (prev, next) = {
            let node = self.node(index);
            (node.prev, node.next)
        };
        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => {
                if let Some(next) = next {
                    self.head = next;
                }
            }
        }
        if let Some(next) = next {
            self.node_mut(next).prev = prev;
        }
        self.release(index)
    }

    /// 移除 `[from, to)` 区间的全部块并按序返回。
    pub(crate) fn take_range(&mut self, from: u32, to: u32) -> Vec<Chunk> {
        let mut taken = Vec::new();
        let mut index = from;
        while index != to {
            let next = self.next(index);
            taken.push(self.remove(index));
            match next {
                Some(next) => index = next,
                None => break,
            }
        }
        taken
    }

    /// 将游标归一化为 `(下标, 块内偏移)`：偏移越过当前块时向后顺延。
    pub(crate) fn normalize(&self, at: Cursor) -> Result<(u32, usize), StreamError> {
        let mut index = self.resolve(at.chunk())?;
        let mut offset = at.offset();
        loop {
            let len = self.chunk(index).len();
            if offset == 0 || offset < len {
                return Ok((index, offset));
            }
            offset -= len;
            index = self.next(index).ok_or_else(|| {
                StreamError::position(format!(
                    "offset {} from {} runs past the tail",
                    at.offset(),
                    at.chunk()
                ))
            })?;
        }
    }

    /// 在游标位置插入控制块，必要时拆分数据块。
    pub(crate) fn insert_control_at(
        &mut self,
        at: Cursor,
        kind: ChunkKind,
    ) -> Result<ChunkId, StreamError> {
        let (index, offset) = self.normalize(at)?;
        let before = if offset == 0 {
            self.reserve(1)?;
            index
        } else {
            self.reserve(2)?;
            self.split_data(index, offset)
        };
        let inserted = self.insert_before(before, Chunk::control(kind));
        Ok(self.id_of(inserted))
    }

    fn alloc(&mut self, chunk: Chunk, prev: Option<u32>, next: Option<u32>) -> u32 {
        self.live += 1;
        self.resident_bytes += chunk.len();
        let node = Node { chunk, prev, next };
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].node = Some(node);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                (self.slots.len() - 1) as u32
            }
        }
    }

    fn release(&mut self, index: u32) -> Chunk {
        let slot = &mut self.slots[index as usize];
        let node = match slot.node.take() {
            Some(node) => node,
            None => unreachable!("链表中的槽位必然被占用"),
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.live -= 1;
        self.resident_bytes -= node.chunk.len();
        node.chunk
    }

    fn node(&self, index: u32) -> &Node {
        match self.slots[index as usize].node.as_ref() {
            Some(node) => node,
            None => unreachable!("链表中的槽位必然被占用"),
        }
    }

    fn node_mut(&mut self, index: u32) -> &mut Node {
        match self.slots[index as usize].node.as_mut() {
            Some(node) => node,
            None => unreachable!("链表中的槽位必然被占用"),
        }
    }
}

/// [`ChunkSequence::iter`] 的迭代器。
pub struct Iter<'a> {
    sequence: &'a ChunkSequence,
    next: Option<u32>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (ChunkId, &'a Chunk);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next?;
        let node = self.sequence.node(index);
        self.next = node.next;
        Some((self.sequence.id_of(index), &node.chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::MarkMode;

    fn sequence_with(data: &[&'static [u8]]) -> ChunkSequence {
        let mut sequence = ChunkSequence::new(4, None);
        sequence.reserve(data.len()).expect("预留");
        for bytes in data {
            sequence.insert_before(
                sequence.tail_index(),
                Chunk::data(Bytes::from_static(bytes), true),
            );
        }
        sequence
    }

    #[test]
    fn starts_with_single_anchor() {
        let sequence = ChunkSequence::new(0, None);
        assert_eq!(sequence.head(), sequence.tail());
        assert_eq!(sequence.live_chunks(), 1);
        let anchor = sequence.get(sequence.tail()).expect("尾锚点");
        assert_eq!(anchor.kind(), &ChunkKind::Anchor);
        assert!(anchor.flags().end);
    }

    #[test]
    fn released_slots_invalidate_old_identifiers() {
        let mut sequence = sequence_with(&[b"ab", b"cd"]);
        let first = sequence.head();
        sequence.remove(first.index() as u32);
        assert!(!sequence.contains(first));
        assert_eq!(
            sequence.resolve(first),
            Err(StreamError::DanglingCursor { chunk: first })
        );

        sequence.reserve(1).expect("预留");
        let reused = sequence.insert_before(
            sequence.tail_index(),
            Chunk::data(Bytes::from_static(b"ef"), true),
        );
        assert_eq!(reused as usize, first.index());
        assert!(!sequence.contains(first));
        assert_eq!(sequence.to_bytes(), Bytes::from_static(b"cdef"));
        assert_eq!(sequence.resident_bytes(), 4);
    }

    #[test]
    fn budget_limits_live_chunks() {
        let mut sequence = ChunkSequence::new(0, Some(2));
        assert_eq!(sequence.reserve(1), Ok(()));
        let err = sequence.reserve(2).expect_err("超出预算");
        assert_eq!(
            err,
            StreamError::OutOfMemory {
                requested: 2,
                live: 1,
                budget: Some(2)
            }
        );
    }

    #[test]
    fn cursor_offsets_roll_forward_across_chunks() {
        let sequence = sequence_with(&[b"abc", b"de"]);
        let head = sequence.head();
        let (index, offset) = sequence
            .normalize(Cursor::new(head, 4))
            .expect("归一化");
        assert_eq!(sequence.chunk(index).bytes(), Some(&Bytes::from_static(b"de")));
        assert_eq!(offset, 1);
        assert!(sequence.normalize(Cursor::new(head, 6)).is_err());
    }

    #[test]
    fn control_insertion_splits_data_without_copy() {
        let mut sequence = sequence_with(&[b"abcdef"]);
        let head = sequence.head();
        let storage = sequence.chunk(head.index() as u32).bytes().cloned();
        let mark = sequence
            .insert_control_at(Cursor::new(head, 2), ChunkKind::Mark(MarkMode::ReadOnly))
            .expect("插入标记");

        let kinds: Vec<_> = sequence.iter().map(|(_, c)| c.kind().clone()).collect();
        assert_eq!(kinds.len(), 4);
        assert_eq!(kinds[1], ChunkKind::Mark(MarkMode::ReadOnly));
        assert_eq!(sequence.resident_bytes(), 6);

        let rest = sequence
            .copy_from(Cursor::new(mark, 0), None)
            .expect("读取标记之后");
        assert_eq!(rest, Bytes::from_static(b"cdef"));
        let tail_bytes = sequence.iter().nth(2).and_then(|(_, c)| c.bytes().cloned());
        let storage = storage.expect("原始数据");
        assert_eq!(
            tail_bytes.map(|b| b.as_ptr()),
            Some(storage[2..].as_ptr())
        );

        let limited = sequence
            .copy_from(Cursor::new(head, 1), Some(3))
            .expect("限长读取");
        assert_eq!(limited, Bytes::from_static(b"bcd"));
    }

    #[test]
    fn take_range_returns_chunks_in_order() {
        let mut sequence = sequence_with(&[b"a", b"b", b"c"]);
        let third = sequence.iter().nth(2).map(|(id, _)| id).expect("第三块");
        let taken = sequence.take_range(sequence.head_index(), third.index() as u32);
        let bytes: Vec<_> = taken.iter().filter_map(Chunk::bytes).cloned().collect();
        assert_eq!(bytes, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert_eq!(sequence.head(), third);
        assert_eq!(sequence.live_chunks(), 2);
    }
}
