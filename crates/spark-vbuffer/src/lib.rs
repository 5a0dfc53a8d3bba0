//! `spark-vbuffer` 提供支持标记保留的增量字节流缓冲。
//!
//! # 模块定位（Why）
//! - 协议分析器按突发追加字节、按追加顺序整段消费，同时需要在“已交付”之后重读部分区间
//!   （例如负载到齐后重新解析头部）。本 crate 以单一主块序列协调追加、边界记账、
//!   多策略排出与钉住区间保留，并在安全前提下尽早释放内存；
//! - 不负责报文重组、重传或持久化。
//!
//! # 设计概要（How）
//! - [`VBufferStream`]：追加 / 排出 / 结束 / 回收扫描；
//! - [`ChunkSequence`]：代数槽位寻址的主块序列，对外只读；
//! - [`Cursor`]：`(块, 偏移)` 位置，块被回收后解析得到 [`StreamError::DanglingCursor`]；
//! - [`VBuffer`]：共享 `Bytes` 区间列表，作为追加输入与排出输出；
//! - [`Mark`] / [`Selection`]：消费者标记与外部流选择边界的句柄。
//!
//! # 并发（What）
//! - 单一所有者、无内部同步；跨线程共享时需由集成方对完整的追加 / 排出 / 标记序列加锁。
//!
//! ```
//! use spark_vbuffer::{VBuffer, VBufferStream};
//!
//! let mut stream = VBufferStream::new();
//! let mut input = VBuffer::from_static(b"GET / HTTP/1.0\r\n");
//! stream.append(&mut input, "request-line").expect("追加");
//! let (data, tag) = stream.drain().expect("排出").into_segment().expect("数据段");
//! assert_eq!(data, b"GET / HTTP/1.0\r\n");
//! assert_eq!(tag, "request-line");
//! assert!(!stream.drain().expect("排出").is_ready());
//! ```

mod chunk;
mod config;
mod cursor;
mod error;
mod ledger;
mod sequence;
mod stream;
mod vbuffer;

pub use chunk::{Chunk, ChunkFlags, ChunkId, ChunkKind, MarkMode, StreamId};
pub use config::StreamConfig;
pub use cursor::Cursor;
pub use error::{Rejected, StreamError, codes};
pub use ledger::EntryId;
pub use sequence::{ChunkSequence, Iter};
pub use stream::{Blocked, Drain, Mark, Selection, StreamBuilder, StreamStats, VBufferStream};
pub use vbuffer::VBuffer;
