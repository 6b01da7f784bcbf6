//! 就绪队列
//!
//! 两个有序结构加一个索引：
//! - `ready`：按 (优先级降序, 创建时间升序, 入队序号) 排序的可出队任务
//! - `delayed`：`scheduled_at` 未到的任务，按到期时间排序
//!
//! 出队前先把已到期的延迟任务提升到 `ready`，因此未来任务无论优先级多高
//! 都不会被提前取出。

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use orchestrator_core::models::{Task, TaskPriority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    priority: Reverse<TaskPriority>,
    created_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct DelayedKey {
    due_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Ready(ReadyKey),
    Delayed(DelayedKey),
}

#[derive(Debug, Default)]
pub struct ReadyQueue {
    ready: BTreeMap<ReadyKey, Task>,
    delayed: BTreeMap<DelayedKey, Task>,
    index: HashMap<String, Slot>,
    next_seq: u64,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: Task, now: DateTime<Utc>) {
        // 同一id重复入队时以新内容为准
        self.remove(&task.id);

        let seq = self.next_seq;
        self.next_seq += 1;

        match task.scheduled_at {
            Some(due_at) if due_at > now => {
                let key = DelayedKey { due_at, seq };
                self.index.insert(task.id.clone(), Slot::Delayed(key));
                self.delayed.insert(key, task);
            }
            _ => self.insert_ready(task, seq),
        }
    }

    fn insert_ready(&mut self, task: Task, seq: u64) {
        let key = ReadyKey {
            priority: Reverse(task.priority),
            created_at: task.created_at,
            seq,
        };
        self.index.insert(task.id.clone(), Slot::Ready(key));
        self.ready.insert(key, task);
    }

    /// 把到期的延迟任务移入就绪结构，返回提升的数量
    pub fn promote_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut promoted = 0;
        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().due_at > now {
                break;
            }
            let (key, task) = entry.remove_entry();
            self.insert_ready(task, key.seq);
            promoted += 1;
        }
        promoted
    }

    pub fn pop_ready(&mut self, now: DateTime<Utc>) -> Option<Task> {
        self.promote_due(now);
        let (_, task) = self.ready.pop_first()?;
        self.index.remove(&task.id);
        Some(task)
    }

    pub fn peek(&mut self, now: DateTime<Utc>) -> Option<&Task> {
        self.promote_due(now);
        self.ready.values().next()
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        match self.index.get(task_id)? {
            Slot::Ready(key) => self.ready.get(key),
            Slot::Delayed(key) => self.delayed.get(key),
        }
    }

    /// 就绪任务按出队顺序在前，延迟任务按到期时间在后
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.ready.values().chain(self.delayed.values())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.index.contains_key(task_id)
    }

    /// 任务是否处于延迟（`scheduled_at` 未到）状态
    pub fn is_delayed(&self, task_id: &str) -> bool {
        matches!(self.index.get(task_id), Some(Slot::Delayed(_)))
    }

    pub fn remove(&mut self, task_id: &str) -> Option<Task> {
        match self.index.remove(task_id)? {
            Slot::Ready(key) => self.ready.remove(&key),
            Slot::Delayed(key) => self.delayed.remove(&key),
        }
    }

    /// 就绪任务中按出队顺序的位置（从0开始）
    pub fn position(&mut self, task_id: &str, now: DateTime<Utc>) -> Option<usize> {
        self.promote_due(now);
        match self.index.get(task_id)? {
            Slot::Ready(key) => Some(self.ready.range(..*key).count()),
            Slot::Delayed(_) => None,
        }
    }

    /// 清空队列，`Some(priority)` 时只清空该档位
    pub fn clear(&mut self, priority: Option<TaskPriority>) -> Vec<Task> {
        let matches = |task: &Task| priority.map_or(true, |p| task.priority == p);

        let ready_keys: Vec<ReadyKey> = self
            .ready
            .iter()
            .filter(|entry| matches(entry.1))
            .map(|(k, _)| *k)
            .collect();
        let delayed_keys: Vec<DelayedKey> = self
            .delayed
            .iter()
            .filter(|entry| matches(entry.1))
            .map(|(k, _)| *k)
            .collect();

        let mut removed = Vec::with_capacity(ready_keys.len() + delayed_keys.len());
        for key in ready_keys {
            if let Some(task) = self.ready.remove(&key) {
                removed.push(task);
            }
        }
        for key in delayed_keys {
            if let Some(task) = self.delayed.remove(&key) {
                removed.push(task);
            }
        }
        for task in &removed {
            self.index.remove(&task.id);
        }
        removed
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn delayed_len(&self) -> usize {
        self.delayed.len()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// 每个档位的任务数（含延迟任务）
    pub fn breakdown(&self) -> BTreeMap<TaskPriority, usize> {
        let mut counts: BTreeMap<TaskPriority, usize> =
            TaskPriority::ALL.iter().map(|p| (*p, 0)).collect();
        for task in self.ready.values().chain(self.delayed.values()) {
            *counts.entry(task.priority).or_default() += 1;
        }
        counts
    }
}
