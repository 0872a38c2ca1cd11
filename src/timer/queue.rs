//! 虚拟时间事件队列实现
//! Virtual-time event queue implementation

use super::entry::{TimerEntry, TimerEntryId};
use super::{Scheduler, SimTime};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;
use tracing::trace;

/// 按虚拟时间排序的事件队列
/// Event queue ordered by virtual time
///
/// The heap holds `(expiry, id)` keys only. Cancelled entries are removed from
/// the entry map right away and their stale heap keys are skipped on pop.
///
/// 堆中只保存 `(到期时间, ID)` 键。被取消的条目立即从映射中删除，
/// 其过期的堆键在弹出时跳过。
#[derive(Debug)]
pub struct EventQueue<E> {
    /// 当前虚拟时间（最后一个弹出事件的时间）
    /// Current virtual time (time of the last popped event)
    now: SimTime,
    /// 到期键的最小堆
    /// Min-heap of expiry keys
    heap: BinaryHeap<Reverse<(SimTime, TimerEntryId)>>,
    /// 待处理的定时器条目
    /// Pending timer entries
    entries: HashMap<TimerEntryId, TimerEntry<E>>,
    /// 下一个分配的定时器条目ID
    /// Next timer entry ID to allocate
    next_entry_id: TimerEntryId,
}

impl<E> EventQueue<E> {
    /// 创建一个从时间零开始的空队列
    /// Create an empty queue starting at time zero
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
            next_entry_id: 1,
        }
    }

    /// 在绝对时间调度事件。早于当前时间的请求被钳制到当前时间。
    /// Schedule an event at an absolute time. Requests in the past are clamped
    /// to the current time.
    pub fn schedule_at(&mut self, time: SimTime, event: E) -> TimerEntryId {
        let expiry_time = time.max(self.now);
        let id = self.next_entry_id;
        self.next_entry_id += 1;

        self.heap.push(Reverse((expiry_time, id)));
        self.entries
            .insert(id, TimerEntry::new(id, expiry_time, event));

        trace!(timer_id = id, expiry = ?expiry_time, "Timer scheduled");
        id
    }

    /// 弹出下一个到期事件并将当前时间推进到其到期时间
    /// Pop the next due event and advance the current time to its expiry
    pub fn pop_next(&mut self) -> Option<TimerEntry<E>> {
        while let Some(Reverse((expiry_time, id))) = self.heap.pop() {
            // Keys of cancelled timers have no entry anymore.
            if let Some(entry) = self.entries.remove(&id) {
                self.now = expiry_time;
                return Some(entry);
            }
        }
        None
    }

    /// 下一个待处理事件的到期时间
    /// Expiry time of the next pending event
    pub fn next_expiry_time(&mut self) -> Option<SimTime> {
        while let Some(Reverse((expiry_time, id))) = self.heap.peek().copied() {
            if self.entries.contains_key(&id) {
                return Some(expiry_time);
            }
            self.heap.pop();
        }
        None
    }

    /// 定时器是否仍在等待触发
    /// Whether a timer is still waiting to fire
    pub fn is_pending(&self, id: TimerEntryId) -> bool {
        self.entries.contains_key(&id)
    }

    /// 待处理定时器数量
    /// Number of pending timers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scheduler for EventQueue<E> {
    type Event = E;

    fn now(&self) -> SimTime {
        self.now
    }

    fn schedule(&mut self, delay: Duration, event: E) -> TimerEntryId {
        self.schedule_at(self.now + delay, event)
    }

    fn cancel(&mut self, id: TimerEntryId) -> bool {
        let cancelled = self.entries.remove(&id).is_some();
        if cancelled {
            trace!(timer_id = id, "Timer cancelled");
        }
        cancelled
    }
}
