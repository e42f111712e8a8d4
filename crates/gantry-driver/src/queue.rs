//! 同步命令队列
//!
//! 主机侧的副作用（变量赋值、消息、计时、程序结束）不能在指令发出时立即执行，
//! 必须等 MCU 确认执行到对应的同步 ID 之后才生效。
//!
//! - `enqueue(id, action)`：追加一个待执行条目；`action` 为 `None` 时只用于
//!   跟踪指令是否仍在执行（[`CommandQueue::is_active`]）
//! - `release(id)`：按入队顺序取出所有 `id ≤ 确认 ID` 的条目，每个只取出一次；
//!   过期或重复的确认是安全的空操作
//! - `clear()`：丢弃所有条目，不执行

use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug)]
struct Entry<T> {
    id: u32,
    action: Option<T>,
}

/// 按同步 ID 排序的延迟动作队列
#[derive(Debug)]
pub struct CommandQueue<T> {
    pending: VecDeque<Entry<T>>,
    last_id: Option<u32>,
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CommandQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            last_id: None,
        }
    }

    pub fn enqueue(&mut self, id: u32, action: Option<T>) {
        if let Some(last) = self.last_id
            && id < last
        {
            warn!("Command id {} enqueued after {}", id, last);
        }
        self.last_id = Some(id);
        self.pending.push_back(Entry { id, action });
    }

    /// 取出所有已确认的动作（按入队顺序）
    pub fn release(&mut self, id: u32) -> Vec<T> {
        let mut released = Vec::new();
        while let Some(front) = self.pending.front() {
            if front.id > id {
                break;
            }
            if let Some(entry) = self.pending.pop_front()
                && let Some(action) = entry.action
            {
                released.push(action);
            }
        }
        released
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// 是否还有未确认的指令
    pub fn is_active(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_release_fires_in_order_once() {
        let mut q = CommandQueue::new();
        q.enqueue(1, Some("a"));
        q.enqueue(2, Some("b"));
        q.enqueue(3, Some("c"));

        assert_eq!(q.release(2), vec!["a", "b"]);
        assert_eq!(q.release(1), Vec::<&str>::new());
        assert_eq!(q.release(2), Vec::<&str>::new());
        assert_eq!(q.release(5), vec!["c"]);
        assert!(!q.is_active());
    }

    #[test]
    fn test_tracking_entries_keep_queue_active() {
        let mut q: CommandQueue<&str> = CommandQueue::new();
        q.enqueue(7, None);
        q.enqueue(7, Some("end"));
        assert!(q.is_active());
        assert_eq!(q.len(), 2);

        assert_eq!(q.release(6), Vec::<&str>::new());
        assert!(q.is_active());
        assert_eq!(q.release(7), vec!["end"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_clear_discards_without_firing() {
        let mut q = CommandQueue::new();
        q.enqueue(1, Some(1));
        q.enqueue(2, Some(2));
        q.clear();
        assert!(q.release(10).is_empty());
    }

    #[test]
    fn test_same_id_entries_release_together() {
        let mut q = CommandQueue::new();
        q.enqueue(4, Some("set line"));
        q.enqueue(4, Some("update time"));
        q.enqueue(4, None);
        q.enqueue(5, Some("next"));
        assert_eq!(q.release(4), vec!["set line", "update time"]);
        assert_eq!(q.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_release_is_ordered_and_exactly_once(
            steps in prop::collection::vec((1u32..4, any::<bool>()), 1..60),
            acks in prop::collection::vec(0u32..200, 1..20),
        ) {
            let mut q = CommandQueue::new();
            let mut id = 0u32;
            let mut expected = Vec::new();
            for (gap, with_action) in steps {
                id += gap;
                if with_action {
                    q.enqueue(id, Some(id));
                    expected.push(id);
                } else {
                    q.enqueue(id, None);
                }
            }

            let mut fired = Vec::new();
            let mut high = 0u32;
            for ack in acks {
                let released = q.release(ack);
                for v in &released {
                    prop_assert!(*v <= ack);
                    prop_assert!(*v > high || fired.is_empty());
                }
                fired.extend(released);
                high = high.max(ack);
            }

            let want: Vec<u32> = expected.into_iter().filter(|v| *v <= high).collect();
            prop_assert_eq!(fired, want);
        }
    }
}
