//! 流配置。
//!
//! # 教案式说明
//! - **意图（Why）**：块预算与预分配容量因部署而异（单连接分析器 vs. 大量并发流），
//!   需要以声明式配置注入，而不是写死在代码中；
//! - **契约（What）**：所有字段均有默认值，反序列化时缺省字段回落到默认；
//!   `chunk_budget` 计入尾锚点与控制块，`None` 表示仅受分配器约束。

use serde::{Deserialize, Serialize};

const DEFAULT_INITIAL_CHUNKS: usize = 16;
const DEFAULT_INITIAL_ENTRIES: usize = 4;

/// [`crate::VBufferStream`] 的构造参数。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// 主序列允许同时存活的最大块数。
    pub chunk_budget: Option<usize>,
    /// 主序列槽位的预分配数量。
    pub initial_chunks: usize,
    /// 待排出账本的预分配数量。
    pub initial_entries: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_budget: None,
            initial_chunks: DEFAULT_INITIAL_CHUNKS,
            initial_entries: DEFAULT_INITIAL_ENTRIES,
        }
    }
}

impl StreamConfig {
    /// 设置块预算。
    pub fn with_chunk_budget(mut self, budget: usize) -> Self {
        self.chunk_budget = Some(budget);
        self
    }
}
