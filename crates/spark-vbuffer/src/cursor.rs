//! 位置游标：`(块, 偏移)` 二元组。
//!
//! 游标只在其目标块仍位于主序列时有效；块被回收后，基于代数的 [`ChunkId`]
//! 会让解析返回 [`crate::StreamError::DanglingCursor`]，而不会误指复用槽位上的新块。
//! 跨越一次可能回收目标块的 `drain` 保留游标时，调用方需要先用标记钉住该位置。

use crate::chunk::ChunkId;

/// 主序列中的稳定位置。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Cursor {
    chunk: ChunkId,
    offset: usize,
}

impl Cursor {
    pub fn new(chunk: ChunkId, offset: usize) -> Self {
        Self { chunk, offset }
    }

    pub fn chunk(&self) -> ChunkId {
        self.chunk
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 重新绑定到新的块与偏移。
    pub fn update(&mut self, chunk: ChunkId, offset: usize) {
        self.chunk = chunk;
        self.offset = offset;
    }

    /// 同一块内向后移动 `len` 字节；跨块的归一化在解析时完成。
    pub fn advanced(self, len: usize) -> Self {
        Self {
            offset: self.offset + len,
            ..self
        }
    }
}
