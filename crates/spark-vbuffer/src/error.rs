//! 流缓冲的错误域。
//!
//! # 教案式说明
//! - **意图（Why）**：集中定义追加、排出与标记放置过程中可能出现的失败，
//!   让调用方能区分“可重试的资源不足”“调用顺序错误”与“集成方破坏了内部不变量”；
//! - **契约（What）**：所有变体均可 `Clone`/`Eq`，便于在测试中直接断言；
//!   [`StreamError::code`] 返回稳定的点分错误码，供日志与告警使用；
//! - **注意（Gotchas）**：`drain` 的“暂无可排出数据”不是错误，见 [`crate::Blocked`]。

use core::fmt;

use thiserror::Error;

use crate::chunk::ChunkId;

/// 稳定错误码常量。
pub mod codes {
    /// 追加时分配失败或超出块预算。
    pub const OUT_OF_MEMORY: &str = "vbuffer.out_of_memory";
    /// 流已 `finish`，拒绝继续追加。
    pub const STREAM_FINISHED: &str = "vbuffer.stream_finished";
    /// 内部不变量被破坏，属于集成缺陷。
    pub const LOGIC_VIOLATION: &str = "vbuffer.logic_violation";
    /// 游标指向的块已被回收。
    pub const DANGLING_CURSOR: &str = "vbuffer.dangling_cursor";
    /// 对只读字节区间执行写入。
    pub const READ_ONLY: &str = "vbuffer.read_only";
    /// 游标或偏移不指向合法位置。
    pub const INVALID_POSITION: &str = "vbuffer.invalid_position";
}

/// `spark-vbuffer` 的统一错误类型。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StreamError {
    /// 分配新块或账本条目失败。
    ///
    /// - **契约（What）**：`requested` 为本次操作需要的新块数量，`live` 为当前存活块数，
    ///   `budget` 为配置的上限（`None` 表示由分配器本身报告失败）；
    /// - 流在返回该错误时保持调用前的状态，调用方可在释放资源后重试。
    #[error("allocation of {requested} chunk(s) failed ({live} live, budget {budget:?})")]
    OutOfMemory {
        requested: usize,
        live: usize,
        budget: Option<usize>,
    },

    /// 流已结束，不再接受追加。
    #[error("stream marked as finished")]
    StreamFinished,

    /// 扫描或回收过程中发现外部边界、乱序边界等不应出现的结构。
    ///
    /// 该错误意味着集成方破坏了调用约束，而非数据问题；流的状态可能已部分推进，
    /// 调用方应当终止对该流的使用。
    #[error("stream invariant violated: {detail}")]
    LogicViolation { detail: String },

    /// 游标所指的块已经被回收或转移出主序列。
    #[error("cursor refers to reclaimed chunk {chunk}")]
    DanglingCursor { chunk: ChunkId },

    /// 目标字节区间已被标记为只读（存在共享别名）。
    #[error("byte range is not writable")]
    ReadOnly,

    /// 偏移越界或位置不适用于当前操作。
    #[error("invalid position: {detail}")]
    InvalidPosition { detail: String },
}

impl StreamError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::OutOfMemory { .. } => codes::OUT_OF_MEMORY,
            StreamError::StreamFinished => codes::STREAM_FINISHED,
            StreamError::LogicViolation { .. } => codes::LOGIC_VIOLATION,
            StreamError::DanglingCursor { .. } => codes::DANGLING_CURSOR,
            StreamError::ReadOnly => codes::READ_ONLY,
            StreamError::InvalidPosition { .. } => codes::INVALID_POSITION,
        }
    }

    /// 是否可通过重试恢复（仅资源不足一类）。
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StreamError::OutOfMemory { .. })
    }

    pub(crate) fn logic(detail: impl Into<String>) -> Self {
        StreamError::LogicViolation {
            detail: detail.into(),
        }
    }

    pub(crate) fn position(detail: impl Into<String>) -> Self {
        StreamError::InvalidPosition {
            detail: detail.into(),
        }
    }
}

/// 追加失败时的返回值：携带错误与调用方原本传入的标签。
///
/// # 教案式说明
/// - **意图（Why）**：追加失败时流保持不变，标签的所有权需要交还调用方，
///   以便其原样重试而不丢失上下文；
/// - **契约（What）**：`tag` 为 `append` 传入的值，未经任何处理；输入的 [`crate::VBuffer`]
///   同样保持原样；
/// - **用法（How）**：不关心标签时可直接 `?`，借助 `From<Rejected<T>> for StreamError` 转换。
#[derive(Debug)]
pub struct Rejected<T> {
    pub error: StreamError,
    pub tag: T,
}

impl<T> Rejected<T> {
    /// 拆分为错误与标签。
    pub fn into_parts(self) -> (StreamError, T) {
        (self.error, self.tag)
    }
}

impl<T> fmt::Display for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<T: fmt::Debug> std::error::Error for Rejected<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<T> From<Rejected<T>> for StreamError {
    fn from(rejected: Rejected<T>) -> Self {
        rejected.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(StreamError::StreamFinished.code(), "vbuffer.stream_finished");
        assert_eq!(StreamError::ReadOnly.code(), codes::READ_ONLY);
        let oom = StreamError::OutOfMemory {
            requested: 2,
            live: 8,
            budget: Some(8),
        };
        assert_eq!(oom.code(), codes::OUT_OF_MEMORY);
        assert!(oom.is_recoverable());
        assert!(!StreamError::logic("x").is_recoverable());
    }

    #[test]
    fn rejected_converts_into_error() {
        fn forward() -> Result<(), StreamError> {
            Err(Rejected {
                error: StreamError::StreamFinished,
                tag: 7u32,
            })?;
            Ok(())
        }
        assert_eq!(forward(), Err(StreamError::StreamFinished));
    }
}
