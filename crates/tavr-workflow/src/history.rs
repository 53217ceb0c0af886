//! 有界撤销/重做历史
//!
//! 快照按时间顺序保存，游标指向当前状态。写入新快照时丢弃游标之后的
//! 重做分支；超出容量时淘汰最旧的快照。

use std::collections::VecDeque;
use tavr_core::{Result, TavrError};

/// 默认历史容量
pub const DEFAULT_CAPACITY: usize = 20;

#[derive(Debug, Clone)]
pub struct SnapshotHistory<T> {
    snapshots: VecDeque<T>,
    cursor: usize,
    capacity: usize,
}

impl<T> SnapshotHistory<T> {
    /// 以初始状态创建历史，容量至少为1
    pub fn new(initial: T, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(TavrError::validation("历史容量必须大于0"));
        }
        let mut snapshots = VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY));
        snapshots.push_back(initial);
        Ok(Self {
            snapshots,
            cursor: 0,
            capacity,
        })
    }

    pub fn with_default_capacity(initial: T) -> Self {
        Self {
            snapshots: VecDeque::from([initial]),
            cursor: 0,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// 记录新状态
    pub fn push(&mut self, snapshot: T) {
        self.snapshots.truncate(self.cursor + 1);
        self.snapshots.push_back(snapshot);
        if self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
        self.cursor = self.snapshots.len() - 1;
    }

    pub fn undo(&mut self) -> Option<&T> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.snapshots.get(self.cursor)
    }

    pub fn redo(&mut self) -> Option<&T> {
        if self.cursor + 1 >= self.snapshots.len() {
            return None;
        }
        self.cursor += 1;
        self.snapshots.get(self.cursor)
    }

    pub fn current(&self) -> Option<&T> {
        self.snapshots.get(self.cursor)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.snapshots.len()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}
