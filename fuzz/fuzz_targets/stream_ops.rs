#![no_main]

use std::collections::VecDeque;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use spark_vbuffer::{Blocked, Mark, MarkMode, StreamConfig, StreamError, VBuffer, VBufferStream};

/// Fuzz 指令：描述一次流操作序列。
///
/// - **Why**：追加、排出、标记放置与移除的交错顺序决定了保留区与回收扫描的路径，
///   本结构枚举这些动作，让 Fuzzer 穷举组合；
/// - **What**：在任意指令流下，`drain` 必须按追加顺序交付原样字节，且不得返回
///   `LogicViolation` 或 panic。
#[derive(Debug, Arbitrary)]
struct StreamCase {
    budget: Option<u8>,
    ops: Vec<StreamOp>,
}

#[derive(Debug, Arbitrary)]
enum StreamOp {
    /// 追加若干区间。
    Append { ranges: Vec<Vec<u8>> },
    /// 排出一段。
    Drain,
    /// 在最近一次追加返回的游标后 `offset` 字节处放置标记。
    Mark { offset: u8, read_write: bool },
    /// 移除第 `index` 个仍存在的标记。
    Unmark { index: u8 },
    /// 显式回收。
    Reclaim,
    /// 结束流。
    Finish,
}

fuzz_target!(|case: StreamCase| {
    let config = match case.budget {
        Some(budget) => StreamConfig::default().with_chunk_budget(usize::from(budget) + 1),
        None => StreamConfig::default(),
    };
    let mut stream = VBufferStream::with_config(config);
    let mut model: VecDeque<(Vec<u8>, usize)> = VecDeque::new();
    let mut marks: Vec<Mark> = Vec::new();
    let mut last_cursor = None;
    let mut next_tag = 0usize;

    for op in case.ops {
        match op {
            StreamOp::Append { ranges } => {
                let mut input = VBuffer::new();
                let mut flat = Vec::new();
                for range in ranges {
                    flat.extend_from_slice(&range);
                    input.push_bytes(range);
                }
                match stream.append(&mut input, next_tag) {
                    Ok(cursor) => {
                        last_cursor = Some(cursor);
                        model.push_back((flat, next_tag));
                        next_tag += 1;
                    }
                    Err(rejected) => {
                        assert!(matches!(
                            rejected.error,
                            StreamError::StreamFinished | StreamError::OutOfMemory { .. }
                        ));
                        assert_eq!(rejected.tag, next_tag);
                        assert_eq!(input.to_vec(), flat);
                    }
                }
            }
            StreamOp::Drain => match stream.drain() {
                Ok(drained) => match drained.blocked() {
                    Some(Blocked::Empty) => assert!(model.is_empty()),
                    Some(Blocked::ReadWriteMark(_)) => assert!(!model.is_empty()),
                    Some(Blocked::SelectBoundary(_)) => unreachable!("未放置选择边界"),
                    None => {
                        let (data, tag) = drained.into_segment().expect("就绪结果携带数据段");
                        let (flat, expected) = model.pop_front().expect("模型中存在待排出段");
                        assert_eq!(tag, expected);
                        assert_eq!(data.to_vec(), flat);
                    }
                },
                Err(err) => panic!("drain failed: {err}"),
            },
            StreamOp::Mark { offset, read_write } => {
                if let Some(cursor) = last_cursor {
                    let mode = if read_write {
                        MarkMode::ReadWrite
                    } else {
                        MarkMode::ReadOnly
                    };
                    if let Ok(mark) = stream.place_mark(cursor.advanced(usize::from(offset)), mode) {
                        marks.push(mark);
                    }
                }
            }
            StreamOp::Unmark { index } => {
                if !marks.is_empty() {
                    let mark = marks.remove(usize::from(index) % marks.len());
                    stream.remove_mark(mark).expect("标记从不被回收");
                }
            }
            StreamOp::Reclaim => {
                stream.reclaim().expect("回收扫描不应失败");
            }
            StreamOp::Finish => stream.finish(),
        }
    }
});
