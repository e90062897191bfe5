//! Priority task queue for cache warming
//!
//! Tasks are unique by key; re-adding an existing key keeps the higher
//! of the two priorities. Ordering is descending priority with ties
//! broken by insertion order (stable).

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use crate::config::CacheClassId;
use crate::error::Result;

/// Produces the value for a warming task. Any callable returning a
/// serializable result; the cache has no knowledge of its semantics.
pub type Producer = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A single cache population task.
#[derive(Clone)]
pub struct WarmingTask {
    pub key: String,
    pub priority: i32,
    pub class: CacheClassId,
    pub producer: Producer,
}

impl WarmingTask {
    pub fn new(
        key: impl Into<String>,
        priority: i32,
        class: CacheClassId,
        producer: Producer,
    ) -> Self {
        Self {
            key: key.into(),
            priority,
            class,
            producer,
        }
    }
}

impl std::fmt::Debug for WarmingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmingTask")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("class", &self.class)
            .finish()
    }
}

/// Queue entry with dispatch bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct QueuedTask {
    pub task: WarmingTask,
    seq: u64,
    /// Times this task was returned to the front on a non-idle poll.
    pub requeues: u32,
}

/// Sorted task list: descending priority, stable by insertion sequence.
#[derive(Default)]
pub(crate) struct TaskQueue {
    items: Vec<QueuedTask>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, merging with any queued task of the same key by
    /// keeping the higher priority. Returns true when the task was new.
    pub fn add(&mut self, task: WarmingTask) -> bool {
        if let Some(existing) = self.items.iter_mut().find(|q| q.task.key == task.key) {
            if task.priority > existing.task.priority {
                existing.task.priority = task.priority;
                self.resort();
            }
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push(QueuedTask {
            task,
            seq,
            requeues: 0,
        });
        self.resort();
        true
    }

    fn resort(&mut self) {
        self.items
            .sort_by(|a, b| b.task.priority.cmp(&a.task.priority).then(a.seq.cmp(&b.seq)));
    }

    /// Remove and return the highest-priority task.
    pub fn pop(&mut self) -> Option<QueuedTask> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }

    /// Return a popped task to the front of the queue. Its original
    /// sequence keeps it ahead of equal-priority later arrivals.
    pub fn requeue_front(&mut self, mut queued: QueuedTask) {
        queued.requeues += 1;
        self.items.push(queued);
        self.resort();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    #[cfg(test)]
    pub fn priorities(&self) -> Vec<(String, i32)> {
        self.items
            .iter()
            .map(|q| (q.task.key.clone(), q.task.priority))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_producer() -> Producer {
        Arc::new(|| Box::pin(async { Ok(Value::Null) }))
    }

    fn task(key: &str, priority: i32) -> WarmingTask {
        WarmingTask::new(key, priority, CacheClassId::SearchResults, noop_producer())
    }

    #[test]
    fn re_adding_a_key_keeps_the_higher_priority() {
        let mut queue = TaskQueue::new();

        assert!(queue.add(task("a", 3)));
        assert!(!queue.add(task("a", 7)));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.priorities(), vec![("a".to_string(), 7)]);
    }

    #[test]
    fn lower_priority_duplicate_is_discarded() {
        let mut queue = TaskQueue::new();

        queue.add(task("a", 7));
        queue.add(task("a", 3));

        assert_eq!(queue.priorities(), vec![("a".to_string(), 7)]);
    }

    #[test]
    fn pop_order_is_priority_then_insertion() {
        let mut queue = TaskQueue::new();

        queue.add(task("low", 1));
        queue.add(task("first-high", 5));
        queue.add(task("second-high", 5));
        queue.add(task("mid", 3));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|q| q.task.key)
            .collect();
        assert_eq!(order, vec!["first-high", "second-high", "mid", "low"]);
    }

    #[test]
    fn requeue_front_preserves_head_position() {
        let mut queue = TaskQueue::new();

        queue.add(task("head", 5));
        queue.add(task("tail", 5));

        let popped = queue.pop().unwrap();
        assert_eq!(popped.task.key, "head");
        queue.requeue_front(popped);

        let next = queue.pop().unwrap();
        assert_eq!(next.task.key, "head");
        assert_eq!(next.requeues, 1);
    }

    #[test]
    fn clear_empties_the_queue() {
        let mut queue = TaskQueue::new();
        queue.add(task("a", 1));
        queue.add(task("b", 2));

        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}
