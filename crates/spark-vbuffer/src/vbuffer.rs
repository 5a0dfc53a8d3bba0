//! `VBuffer`：由若干共享字节区间组成的有序缓冲，作为追加输入与排出输出。
//!
//! # 教案式说明
//! - **意图（Why）**：追加时整段转移、排出时零拷贝转出或克隆，都需要一个
//!   “字节区间列表”形态的载体，而非连续内存；
//! - **结构（How）**：每个区间是一个 [`Bytes`]，克隆只增加引用计数；区间与整体各自带
//!   可写标志，写入经 [`VBuffer::overwrite`] 做写时复制，遇到只读区间直接拒绝；
//! - **契约（What）**：空区间不会被保存，`len()` 等于全部区间长度之和。

use core::mem;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::StreamError;

#[derive(Clone, Debug)]
pub(crate) struct DataRange {
    pub(crate) bytes: Bytes,
    pub(crate) writable: bool,
}

/// 共享字节区间组成的缓冲。
#[derive(Clone, Debug)]
pub struct VBuffer {
    ranges: Vec<DataRange>,
    writable: bool,
}

impl Default for VBuffer {
    fn default() -> Self {
        Self {
            ranges: Vec::new(),
            writable: true,
        }
    }
}

impl VBuffer {
    /// 创建空的可写缓冲。
    pub fn new() -> Self {
        Self::default()
    }

    /// 以单个区间构造缓冲。
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let mut buffer = Self::new();
        buffer.push_bytes(bytes);
        buffer
    }

    pub fn from_static(bytes: &'static [u8]) -> Self {
        Self::from_bytes(Bytes::from_static(bytes))
    }

    /// 在末尾追加一个区间；空区间被忽略。
    pub fn push_bytes(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if !bytes.is_empty() {
            self.ranges.push(DataRange {
                bytes,
                writable: true,
            });
        }
    }

    pub(crate) fn push_range(&mut self, bytes: Bytes, writable: bool) {
        if !bytes.is_empty() {
            self.ranges.push(DataRange { bytes, writable });
        }
    }

    pub(crate) fn take_ranges(&mut self) -> Vec<DataRange> {
        mem::take(&mut self.ranges)
    }

    pub fn len(&self) -> usize {
        self.ranges.iter().map(|range| range.bytes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// 区间数量。
    pub fn chunk_count(&self) -> usize {
        self.ranges.len()
    }

    /// 依次遍历各区间。
    pub fn chunks(&self) -> impl Iterator<Item = &Bytes> + '_ {
        self.ranges.iter().map(|range| &range.bytes)
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn set_writable(&mut self, writable: bool) {
        self.writable = writable;
    }

    /// 合并为连续字节；只有一个区间时不复制。
    pub fn to_bytes(&self) -> Bytes {
        match self.ranges.as_slice() {
            [] => Bytes::new(),
            [single] => single.bytes.clone(),
            ranges => {
                let mut out = BytesMut::with_capacity(self.len());
                for range in ranges {
                    out.put_slice(&range.bytes);
                }
                out.freeze()
            }
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }

    /// 从 `offset` 起覆写 `src`。
    ///
    /// - **前置条件**：缓冲整体可写，且被覆盖到的每个区间都可写；
    /// - **后置条件**：被覆盖的区间换成新分配的存储，其它共享该存储的别名不受影响；
    /// - **错误**：越界返回 `InvalidPosition`，只读返回 `ReadOnly`，两者都不修改缓冲。
    pub fn overwrite(&mut self, offset: usize, src: &[u8]) -> Result<(), StreamError> {
        let end = offset
            .checked_add(src.len())
            .filter(|end| *end <= self.len())
            .ok_or_else(|| {
                StreamError::position(format!(
                    "overwrite of {} byte(s) at {offset} exceeds buffer of {}",
                    src.len(),
                    self.len()
                ))
            })?;
        if !self.writable {
            return Err(StreamError::ReadOnly);
        }

        let mut start = 0usize;
        for range in &self.ranges {
            let stop = start + range.bytes.len();
            if stop > offset && start < end && !range.writable {
                return Err(StreamError::ReadOnly);
            }
            start = stop;
        }

        let mut start = 0usize;
        for range in &mut self.ranges {
            let stop = start + range.bytes.len();
            if stop > offset && start < end {
                let from = offset.max(start);
                let to = end.min(stop);
                let mut copy = BytesMut::from(&range.bytes[..]);
                copy[from - start..to - start].copy_from_slice(&src[from - offset..to - offset]);
                range.bytes = copy.freeze();
            }
            start = stop;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

impl From<Bytes> for VBuffer {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for VBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<&'static [u8]> for VBuffer {
    fn from(bytes: &'static [u8]) -> Self {
        Self::from_static(bytes)
    }
}

impl PartialEq<[u8]> for VBuffer {
    fn eq(&self, other: &[u8]) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mut rest = other;
        self.chunks().all(|chunk| {
            let (head, tail) = rest.split_at(chunk.len());
            rest = tail;
            head == &chunk[..]
        })
    }
}

impl PartialEq<&[u8]> for VBuffer {
    fn eq(&self, other: &&[u8]) -> bool {
        *self == **other
    }
}

impl<const N: usize> PartialEq<&[u8; N]> for VBuffer {
    fn eq(&self, other: &&[u8; N]) -> bool {
        *self == other[..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_ranges() -> VBuffer {
        let mut buffer = VBuffer::from_static(b"hello ");
        buffer.push_bytes(Bytes::from_static(b"world"));
        buffer
    }

    #[test]
    fn empty_ranges_are_skipped() {
        let mut buffer = VBuffer::new();
        buffer.push_bytes(Bytes::new());
        assert!(buffer.is_empty());
        assert_eq!(buffer.chunk_count(), 0);
        assert_eq!(buffer.to_bytes(), Bytes::new());
    }

    #[test]
    fn single_range_is_returned_without_copy() {
        let source = Bytes::from_static(b"payload");
        let buffer = VBuffer::from_bytes(source.clone());
        assert_eq!(buffer.to_bytes().as_ptr(), source.as_ptr());
    }

    #[test]
    fn multi_range_content_compares_with_slices() {
        let buffer = two_ranges();
        assert_eq!(buffer.len(), 11);
        assert_eq!(buffer, b"hello world");
        assert_ne!(buffer, b"hello_world");
        assert_eq!(buffer.to_vec(), b"hello world".to_vec());
    }

    #[test]
    fn overwrite_spans_ranges_with_copy_on_write() {
        let mut buffer = two_ranges();
        let alias = buffer.clone();
        buffer.overwrite(4, b"O_W").expect("覆写应成功");
        assert_eq!(buffer, b"hellO_World");
        assert_eq!(alias, b"hello world");
    }

    #[test]
    fn overwrite_refuses_read_only_ranges() {
        let mut buffer = two_ranges();
        let second = buffer.take_ranges().pop().expect("第二个区间");
        buffer.push_range(Bytes::from_static(b"hello "), true);
        buffer.push_range(second.bytes, false);
        assert_eq!(buffer.overwrite(0, b"J"), Ok(()));
        assert_eq!(buffer.overwrite(5, b"__"), Err(StreamError::ReadOnly));
        assert_eq!(buffer, b"Jello world");

        buffer.set_writable(false);
        assert_eq!(buffer.overwrite(0, b"H"), Err(StreamError::ReadOnly));
    }

    #[test]
    fn overwrite_out_of_bounds_is_rejected() {
        let mut buffer = two_ranges();
        let err = buffer.overwrite(10, b"xx").expect_err("越界写入");
        assert_eq!(err.code(), crate::error::codes::INVALID_POSITION);
    }
}
