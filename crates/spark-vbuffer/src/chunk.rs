//! 主序列中的块（chunk）及其标识。
//!
//! # 教案式说明
//! - **意图（Why）**：主序列既承载数据，也承载“推送边界”“标记”“选择边界”“尾锚点”
//!   等不含字节的控制块；排出与回收逻辑按块种类分派策略；
//! - **结构（How）**：[`ChunkKind`] 以枚举表达块种类，数据块持有引用计数的 [`Bytes`]，
//!   克隆时共享底层存储；[`ChunkFlags`] 记录尾部、流结束与可写三个标志，
//!   “是否控制块”由种类推导，不单独存储；
//! - **契约（What）**：[`ChunkId`] 由槽位下标与代数组成，槽位被释放后代数递增，
//!   旧标识随之失效。

use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ledger::EntryId;

/// 主序列中块的稳定标识：槽位下标 + 代数。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ChunkId {
    index: u32,
    generation: u32,
}

impl ChunkId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// 槽位下标。
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// 槽位代数，槽位每被复用一次递增。
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.generation)
    }
}

/// 流实例的进程内唯一标识，用于判定推送边界与选择边界的归属。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StreamId(u64);

impl StreamId {
    /// 分配一个新的流标识。
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        StreamId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// 原始数值。
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// 标记模式。
///
/// - `ReadOnly`：允许排出越过该位置，但其后的数据需保留以供重读；
/// - `ReadWrite`：消费者持有可变位置，排出在此处整体阻塞。
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkMode {
    ReadOnly,
    ReadWrite,
}

/// 块标志。
///
/// - `end`：该块是主序列的尾锚点；
/// - `eof`：流已结束，仅在尾锚点上有意义；
/// - `writable`：是否允许通过该块修改底层字节。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChunkFlags {
    pub end: bool,
    pub eof: bool,
    pub writable: bool,
}

/// 块种类及其携带的元数据。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChunkKind {
    /// 普通数据块，字节区间可能与克隆体共享。
    Data(Bytes),
    /// 一次追加的结束位置。`entry` 为空表示仅用于锚定尾部的遗留边界。
    PushBoundary {
        owner: StreamId,
        entry: Option<EntryId>,
    },
    /// 消费者放置的钉住点。
    Mark(MarkMode),
    /// 外部流仍在协调的区间起点。
    SelectBoundary(StreamId),
    /// 尚未物化的尾锚点占位。
    Anchor,
}

impl ChunkKind {
    /// 是否为不含字节的控制块。
    pub fn is_control(&self) -> bool {
        !matches!(self, ChunkKind::Data(_))
    }
}

/// 主序列中的一个块。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Chunk {
    pub(crate) kind: ChunkKind,
    pub(crate) flags: ChunkFlags,
}

impl Chunk {
    pub(crate) fn data(bytes: Bytes, writable: bool) -> Self {
        Self {
            kind: ChunkKind::Data(bytes),
            flags: ChunkFlags {
                writable,
                ..ChunkFlags::default()
            },
        }
    }

    pub(crate) fn control(kind: ChunkKind) -> Self {
        debug_assert!(kind.is_control());
        Self {
            kind,
            flags: ChunkFlags::default(),
        }
    }

    pub fn kind(&self) -> &ChunkKind {
        &self.kind
    }

    pub fn flags(&self) -> ChunkFlags {
        self.flags
    }

    pub fn is_control(&self) -> bool {
        self.kind.is_control()
    }

    /// 数据块的字节视图；控制块返回 `None`。
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.kind {
            ChunkKind::Data(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// 数据字节数；控制块为 0。
    pub fn len(&self) -> usize {
        self.bytes().map_or(0, Bytes::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
