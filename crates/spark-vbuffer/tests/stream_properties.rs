//! 流缓冲性质验证。
//!
//! # 教案式说明
//! - **目标（Why）**：对任意分块方式的输入与任意位置的只读标记，验证“按追加顺序原样交付”
//!   与“标记全部移除后保留区被完整回收”两条性质；
//! - **手法（How）**：使用 Proptest 生成追加序列，以 `VecDeque` 作为影子模型对照
//!   交错的追加 / 排出操作；
//! - **边界（What）**：只读标记不阻塞排出，因此所有 `drain` 都必须就绪。

use std::collections::VecDeque;

use proptest::{collection::vec, option, prelude::*};
use spark_vbuffer::{MarkMode, VBuffer, VBufferStream};

fn build_input(ranges: &[Vec<u8>]) -> (VBuffer, Vec<u8>) {
    let mut input = VBuffer::new();
    let mut flat = Vec::new();
    for range in ranges {
        flat.extend_from_slice(range);
        input.push_bytes(range.clone());
    }
    (input, flat)
}

#[derive(Clone, Debug)]
enum Op {
    Append(Vec<Vec<u8>>),
    Drain,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        vec(vec(any::<u8>(), 0..6), 0..4).prop_map(Op::Append),
        Just(Op::Drain),
    ]
}

proptest! {
    #[test]
    fn prop_fifo_round_trip_with_read_only_marks(
        segments in vec((vec(vec(any::<u8>(), 0..8), 0..4), option::of(0usize..32)), 1..12)
    ) {
        let mut stream = VBufferStream::new();
        let mut expected = Vec::new();
        let mut marks = Vec::new();
        for (tag, (ranges, mark_at)) in segments.iter().enumerate() {
            let (mut input, flat) = build_input(ranges);
            let cursor = stream.append(&mut input, tag).expect("追加");
            if let Some(offset) = mark_at {
                let offset = offset % (flat.len() + 1);
                marks.push(
                    stream
                        .place_mark(cursor.advanced(offset), MarkMode::ReadOnly)
                        .expect("放置只读标记"),
                );
            }
            expected.push(flat);
        }

        for (tag, flat) in expected.iter().enumerate() {
            let (data, got) = stream
                .drain()
                .expect("drain 不应失败")
                .into_segment()
                .expect("只读标记不应阻塞");
            prop_assert_eq!(got, tag);
            prop_assert_eq!(data.to_vec(), flat.clone());
        }
        prop_assert!(!stream.drain().expect("drain 不应失败").is_ready());

        for mark in marks {
            stream.remove_mark(mark).expect("移除标记");
        }
        stream.append(&mut VBuffer::new(), usize::MAX).expect("追加空段");
        stream.drain().expect("drain 不应失败");
        let stats = stream.statistics();
        prop_assert_eq!(stats.retained_entries, 0);
        prop_assert_eq!(stats.pending_entries, 0);
        prop_assert_eq!(stats.resident_bytes, 0);
        prop_assert_eq!(stats.live_chunks, 1);
    }

    #[test]
    fn prop_interleaved_operations_match_queue_model(ops in vec(op(), 0..40)) {
        let mut stream = VBufferStream::new();
        let mut model: VecDeque<(Vec<u8>, u32)> = VecDeque::new();
        let mut next_tag = 0u32;
        for op in ops {
            match op {
                Op::Append(ranges) => {
                    let (mut input, flat) = build_input(&ranges);
                    stream.append(&mut input, next_tag).expect("追加");
                    prop_assert!(input.is_empty());
                    model.push_back((flat, next_tag));
                    next_tag += 1;
                }
                Op::Drain => {
                    let drained = stream.drain().expect("drain 不应失败");
                    match model.pop_front() {
                        Some((flat, tag)) => {
                            let (data, got) = drained.into_segment().expect("应有数据段");
                            prop_assert_eq!(got, tag);
                            prop_assert_eq!(data.to_vec(), flat);
                        }
                        None => prop_assert!(!drained.is_ready()),
                    }
                }
            }
            let pending_bytes: usize = model.iter().map(|(flat, _)| flat.len()).sum();
            prop_assert_eq!(stream.statistics().resident_bytes, pending_bytes);
            prop_assert_eq!(stream.statistics().pending_entries, model.len());
        }
    }
}
