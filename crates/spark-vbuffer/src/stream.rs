//! `VBufferStream`：追加、按段排出与标记保留的协调核心。
//!
//! # 教案式说明
//! - **意图（Why）**：协议分析器以突发方式追加字节，按追加顺序整段消费，
//!   同时可能需要在“已消费”之后重读其中一段（例如更多负载到达后重新解析头部）。
//!   本模块在满足这些需求的前提下尽早释放内存，并保持外部游标在变更中有效；
//! - **结构（How）**：
//!   - 主序列从左到右依次为：已回收区（已释放）、保留区（被只读标记钉住）、
//!     待排出区、尾锚点；
//!   - 每次追加在尾部插入一个推送边界，并在账本 `pending` 队尾登记；
//!   - `drain` 先执行回收扫描，再从最近保留边界之后（或序列首）扫描到最早待排出边界，
//!     按块种类决定转出、克隆或放弃；
//! - **契约（What）**：
//!   - 单一所有者，无内部同步；追加、排出、结束与标记操作需由集成方串行化；
//!   - `drain` 返回 [`Drain::NotReady`] 表示稍后重试，不是错误；
//!   - 不变量被破坏时返回 [`StreamError::LogicViolation`]，在所有构建配置下生效。

use core::fmt;

use tracing::{debug, error, trace};

use crate::{
    chunk::{Chunk, ChunkFlags, ChunkId, ChunkKind, MarkMode, StreamId},
    config::StreamConfig,
    cursor::Cursor,
    error::{Rejected, StreamError},
    ledger::{EntryId, Ledger},
    sequence::ChunkSequence,
    vbuffer::VBuffer,
};

type TagDisposer<T> = Box<dyn FnMut(T) + Send>;

/// `drain` 的结果：一段完整数据及其标签，或暂不可排出的原因。
#[derive(Debug)]
pub enum Drain<T> {
    Segment { data: VBuffer, tag: T },
    NotReady(Blocked),
}

impl<T> Drain<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Drain::Segment { .. })
    }

    /// 取出数据段；未就绪时返回 `None`。
    pub fn into_segment(self) -> Option<(VBuffer, T)> {
        match self {
            Drain::Segment { data, tag } => Some((data, tag)),
            Drain::NotReady(_) => None,
        }
    }

    pub fn blocked(&self) -> Option<Blocked> {
        match self {
            Drain::NotReady(reason) => Some(*reason),
            Drain::Segment { .. } => None,
        }
    }
}

/// 暂不可排出的原因。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Blocked {
    /// 没有待排出的追加。
    Empty,
    /// 待排出区间内存在读写标记。
    ReadWriteMark(ChunkId),
    /// 待排出区间内存在外部流的选择边界。
    SelectBoundary(StreamId),
}

/// 资源统计快照。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StreamStats {
    pub pending_entries: usize,
    pub retained_entries: usize,
    pub live_chunks: usize,
    pub resident_bytes: usize,
}

/// 放置在主序列中的标记句柄，移除标记时交还。
#[derive(Debug, Eq, PartialEq)]
pub struct Mark {
    id: ChunkId,
    mode: MarkMode,
}

impl Mark {
    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn mode(&self) -> MarkMode {
        self.mode
    }

    /// 标记所在位置，可用于透过标记重读被钉住的字节。
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.id, 0)
    }
}

/// 外部流放置的选择边界句柄。
#[derive(Debug, Eq, PartialEq)]
pub struct Selection {
    id: ChunkId,
    owner: StreamId,
}

impl Selection {
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// 放置该边界的外部流。
    pub fn owner(&self) -> StreamId {
        self.owner
    }
}

/// [`VBufferStream`] 构造器。
pub struct StreamBuilder<T> {
    config: StreamConfig,
    disposer: Option<TagDisposer<T>>,
}

impl<T> StreamBuilder<T> {
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置标签回收回调：标签未经 `drain` 返回即被丢弃时调用（流销毁）。
    pub fn tag_disposer(mut self, disposer: impl FnMut(T) + Send + 'static) -> Self {
        self.disposer = Some(Box::new(disposer));
        self
    }

    pub fn build(self) -> VBufferStream<T> {
        VBufferStream {
            id: StreamId::next(),
            data: ChunkSequence::new(self.config.initial_chunks, self.config.chunk_budget),
            ledger: Ledger::with_capacity(self.config.initial_entries),
            disposer: self.disposer,
        }
    }
}

/// 扫描时对块种类的归类，避免在遍历中长期借用序列。
#[derive(Clone, Copy)]
enum Scan {
    Data,
    Boundary {
        owner: StreamId,
        entry: Option<EntryId>,
    },
    Select(StreamId),
    Mark(MarkMode),
    Anchor,
}

impl Scan {
    fn of(chunk: &Chunk) -> Self {
        match chunk.kind() {
            ChunkKind::Data(_) => Scan::Data,
            ChunkKind::PushBoundary { owner, entry } => Scan::Boundary {
                owner: *owner,
                entry: *entry,
            },
            ChunkKind::SelectBoundary(owner) => Scan::Select(*owner),
            ChunkKind::Mark(mode) => Scan::Mark(*mode),
            ChunkKind::Anchor => Scan::Anchor,
        }
    }
}

/// 增量字节流缓冲。`T` 为调用方随每次追加附带的标签。
pub struct VBufferStream<T> {
    id: StreamId,
    data: ChunkSequence,
    ledger: Ledger<T>,
    disposer: Option<TagDisposer<T>>,
}

impl<T> Default for VBufferStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for VBufferStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VBufferStream")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .field("stats", &self.statistics())
            .finish()
    }
}

impl<T> VBufferStream<T> {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn with_config(config: StreamConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> StreamBuilder<T> {
        StreamBuilder {
            config: StreamConfig::default(),
            disposer: None,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// 主序列的只读视图，用于诊断与读取被标记钉住的区间。
    pub fn data(&self) -> &ChunkSequence {
        &self.data
    }

    pub fn statistics(&self) -> StreamStats {
        StreamStats {
            pending_entries: self.ledger.pending_len(),
            retained_entries: self.ledger.retained_len(),
            live_chunks: self.data.live_chunks(),
            resident_bytes: self.data.resident_bytes(),
        }
    }

    /// 追加一段数据，返回指向其首个数据块的游标（输入为空时指向新边界）。
    ///
    /// # 契约
    /// - **成功**：`input` 的全部区间转移进主序列，`input` 被清空；新账本记录进入 `pending` 队尾；
    /// - **失败**：`StreamFinished` 或 `OutOfMemory`，流与 `input` 均保持原样，
    ///   标签经 [`Rejected`] 交还调用方；
    /// - 尾部若仍是未物化的锚点占位，先将其物化为无记录的边界，
    ///   使此前停在“末尾”的游标落在新数据之前。
    pub fn append(&mut self, input: &mut VBuffer, tag: T) -> Result<Cursor, Rejected<T>> {
        if self.is_finished() {
            return Err(Rejected {
                error: StreamError::StreamFinished,
                tag,
            });
        }
        if let Err(error) = self.reserve_append(input.chunk_count()) {
            debug!(stream = %self.id, code = error.code(), "append rejected");
            return Err(Rejected { error, tag });
        }

        let anchor = self.data.tail_index();
        if matches!(self.data.chunk(anchor).kind(), ChunkKind::Anchor) {
            self.data.chunk_mut(anchor).kind = ChunkKind::PushBoundary {
                owner: self.id,
                entry: None,
            };
        }

        let entry = self.ledger.peek_id();
        let anchor_flags = self.data.chunk(anchor).flags();
        let writable = input.is_writable();
        let boundary = self.data.insert_after(
            anchor,
            Chunk {
                kind: ChunkKind::PushBoundary {
                    owner: self.id,
                    entry: Some(entry),
                },
                flags: ChunkFlags {
                    writable,
                    ..anchor_flags
                },
            },
        );
        let flags = &mut self.data.chunk_mut(anchor).flags;
        flags.end = false;
        flags.eof = false;

        let bytes = input.len();
        let mut first = None;
        for range in input.take_ranges() {
            let index = self.data.insert_before(
                boundary,
                Chunk::data(range.bytes, writable && range.writable),
            );
            if first.is_none() {
                first = Some(index);
            }
        }

        let boundary_id = self.data.id_of(boundary);
        self.ledger.push_pending(boundary_id, tag);
        debug!(stream = %self.id, entry = entry.get(), bytes, "segment appended");
        Ok(Cursor::new(self.data.id_of(first.unwrap_or(boundary)), 0))
    }

    /// 排出最早一次追加的完整数据段。
    ///
    /// # 流程
    /// 1. 无待排出记录时直接返回 `NotReady(Empty)`；
    /// 2. 执行回收扫描；
    /// 3. 从最近保留边界之后（无保留时从序列首）向目标边界扫描：
    ///    遗留的无记录边界被移除，选择边界与读写标记使本次排出放弃，
    ///    首个只读标记记为钉住点；
    /// 4. 无钉住点时整段转出并移除目标边界（目标即尾锚点时重置为占位）；
    ///    有钉住点时仅转出其前缀，其余数据块克隆输出并将原块置为只读，记录转入保留队列。
    pub fn drain(&mut self) -> Result<Drain<T>, StreamError> {
        let Some(target_id) = self.ledger.oldest_pending().map(|entry| entry.boundary) else {
            trace!(stream = %self.id, "drain: nothing pending");
            return Ok(Drain::NotReady(Blocked::Empty));
        };

        self.sweep()?;

        let target = self.data.resolve(target_id).map_err(|_| {
            self.violation(format!("boundary {target_id} of the oldest pending entry is gone"))
        })?;
        let resume = match self.ledger.newest_retained() {
            Some(entry) => {
                let boundary = self.data.resolve(entry.boundary).map_err(|_| {
                    self.violation(format!("retained boundary {} is gone", entry.boundary))
                })?;
                Some(self.next_or_violation(boundary)?)
            }
            None => None,
        };

        let mut begin = resume.unwrap_or_else(|| self.data.head_index());
        let mut pin = resume;
        let mut orphan_removed = false;
        let mut index = begin;
        while index != target {
            let chunk = self.data.chunk(index);
            if chunk.flags().end {
                return Err(self.violation("reached the tail before the oldest pending boundary"));
            }
            match Scan::of(chunk) {
                Scan::Data => {}
                Scan::Boundary { owner, .. } if owner != self.id => {
                    return Err(self.violation(format!("boundary owned by {owner} found in {}", self.id)));
                }
                Scan::Boundary { entry: None, .. } if !orphan_removed => {
                    let next = self.next_or_violation(index)?;
                    self.data.remove(index);
                    orphan_removed = true;
                    if begin == index {
                        begin = next;
                    }
                    if pin == Some(index) {
                        pin = Some(next);
                    }
                    index = next;
                    continue;
                }
                Scan::Boundary { entry, .. } => {
                    return Err(self.violation(format!(
                        "boundary of entry {:?} precedes the oldest pending boundary",
                        entry.map(EntryId::get)
                    )));
                }
                Scan::Select(owner) => {
                    trace!(stream = %self.id, %owner, "drain: blocked by select boundary");
                    return Ok(Drain::NotReady(Blocked::SelectBoundary(owner)));
                }
                Scan::Mark(MarkMode::ReadWrite) => {
                    let mark = self.data.id_of(index);
                    trace!(stream = %self.id, %mark, "drain: blocked by read-write mark");
                    return Ok(Drain::NotReady(Blocked::ReadWriteMark(mark)));
                }
                Scan::Mark(MarkMode::ReadOnly) => {
                    if pin.is_none() {
                        pin = Some(index);
                    }
                }
                Scan::Anchor => {
                    return Err(self.violation("bare anchor placeholder inside the sequence"));
                }
            }
            index = self.next_or_violation(index)?;
        }

        let target_flags = self.data.chunk(target).flags();
        let mut output = VBuffer::new();
        output.set_writable(target_flags.writable);
        match pin {
            None => {
                transfer(&mut output, self.data.take_range(begin, target));
                if target_flags.end {
                    self.data.chunk_mut(target).kind = ChunkKind::Anchor;
                } else {
                    self.data.remove(target);
                }
            }
            Some(pin) => {
                transfer(&mut output, self.data.take_range(begin, pin));
                let mut index = pin;
                while index != target {
                    let chunk = self.data.chunk_mut(index);
                    if let ChunkKind::Data(bytes) = &chunk.kind {
                        output.push_range(bytes.clone(), false);
                        chunk.flags.writable = false;
                    }
                    index = self.next_or_violation(index)?;
                }
            }
        }

        let Some(mut entry) = self.ledger.pop_pending() else {
            return Err(self.violation("pending queue emptied during drain"));
        };
        let Some(tag) = entry.tag.take() else {
            return Err(self.violation(format!("tag of entry {} already taken", entry.id.get())));
        };
        debug!(
            stream = %self.id,
            entry = entry.id.get(),
            bytes = output.len(),
            pinned = pin.is_some(),
            "segment drained"
        );
        if pin.is_some() {
            self.ledger.retain(entry);
        }
        Ok(Drain::Segment { data: output, tag })
    }

    /// 立即执行回收扫描，返回释放的块数。`drain` 在每次排出前也会执行一次。
    pub fn reclaim(&mut self) -> Result<usize, StreamError> {
        self.sweep()
    }

    /// 标记流结束。幂等且不可撤销。
    pub fn finish(&mut self) {
        let tail = self.data.tail_index();
        let flags = &mut self.data.chunk_mut(tail).flags;
        if !flags.eof {
            flags.eof = true;
            debug!(stream = %self.id, "stream finished");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.data.chunk(self.data.tail_index()).flags().eof
    }

    /// 在游标位置放置标记。位置落在数据块中间时该块被拆分（字节存储共享）。
    pub fn place_mark(&mut self, at: Cursor, mode: MarkMode) -> Result<Mark, StreamError> {
        let id = self.data.insert_control_at(at, ChunkKind::Mark(mode))?;
        trace!(stream = %self.id, mark = %id, ?mode, "mark placed");
        Ok(Mark { id, mode })
    }

    /// 移除标记，解除其钉住效果。
    pub fn remove_mark(&mut self, mark: Mark) -> Result<(), StreamError> {
        let index = self.data.resolve(mark.id)?;
        if !matches!(self.data.chunk(index).kind(), ChunkKind::Mark(_)) {
            return Err(StreamError::position(format!("{} is not a mark", mark.id)));
        }
        self.data.remove(index);
        trace!(stream = %self.id, mark = %mark.id, "mark removed");
        Ok(())
    }

    /// 代表外部流 `owner` 放置选择边界：在其移除前，排出不会越过该位置。
    pub fn place_select(&mut self, at: Cursor, owner: StreamId) -> Result<Selection, StreamError> {
        let id = self
            .data
            .insert_control_at(at, ChunkKind::SelectBoundary(owner))?;
        Ok(Selection { id, owner })
    }

    pub fn remove_select(&mut self, selection: Selection) -> Result<(), StreamError> {
        let index = self.data.resolve(selection.id)?;
        if !matches!(self.data.chunk(index).kind(), ChunkKind::SelectBoundary(_)) {
            return Err(StreamError::position(format!(
                "{} is not a select boundary",
                selection.id
            )));
        }
        self.data.remove(index);
        Ok(())
    }

    fn reserve_append(&mut self, data_chunks: usize) -> Result<(), StreamError> {
        self.data.reserve(data_chunks + 1)?;
        self.ledger
            .try_reserve_pending()
            .map_err(|_| StreamError::OutOfMemory {
                requested: 1,
                live: self.data.live_chunks(),
                budget: None,
            })
    }

    /// 回收扫描：从序列首与保留队列首同步推进，遇到任意标记即停止。
    fn sweep(&mut self) -> Result<usize, StreamError> {
        let mut freed = 0usize;
        while let Some((expected, boundary)) = self
            .ledger
            .oldest_retained()
            .map(|entry| (entry.id, entry.boundary))
        {
            let index = self.data.head_index();
            if index == self.data.tail_index() {
                break;
            }
            match Scan::of(self.data.chunk(index)) {
                Scan::Mark(_) => break,
                Scan::Boundary {
                    owner,
                    entry: Some(entry),
                } if owner == self.id => {
                    if entry != expected || self.data.id_of(index) != boundary {
                        return Err(self.violation(format!(
                            "boundary of entry {} reached while entry {} is the oldest retained",
                            entry.get(),
                            expected.get()
                        )));
                    }
                    self.ledger.pop_retained();
                }
                _ => {}
            }
            self.data.remove(index);
            freed += 1;
        }
        if freed > 0 {
            trace!(stream = %self.id, freed, "retained chunks reclaimed");
        }
        Ok(freed)
    }

    fn next_or_violation(&self, index: u32) -> Result<u32, StreamError> {
        self.data
            .next(index)
            .ok_or_else(|| self.violation("walked past the tail anchor"))
    }

    fn violation(&self, detail: impl Into<String>) -> StreamError {
        let detail = detail.into();
        error!(stream = %self.id, %detail, "stream invariant violated");
        StreamError::logic(detail)
    }
}

fn transfer(output: &mut VBuffer, chunks: Vec<Chunk>) {
    for chunk in chunks {
        let writable = chunk.flags.writable;
        if let ChunkKind::Data(bytes) = chunk.kind {
            output.push_range(bytes, writable);
        }
    }
}

impl<T> Drop for VBufferStream<T> {
    fn drop(&mut self) {
        let tags = self.ledger.take_tags();
        if let Some(disposer) = self.disposer.as_mut() {
            for tag in tags {
                disposer(tag);
            }
        }
    }
}
