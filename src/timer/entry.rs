//! 事件队列定时器条目实现
//! Timer entry implementation for the event queue

use super::SimTime;

/// 定时器条目ID，用于在事件队列中唯一标识定时器条目
/// Timer entry ID, used to uniquely identify timer entries in the event queue
///
/// IDs are allocated in increasing order, so they also encode insertion order
/// for events due at the same instant.
pub type TimerEntryId = u64;

/// 事件队列中的定时器条目
/// Timer entry in the event queue
#[derive(Debug, Clone)]
pub struct TimerEntry<E> {
    /// 条目ID
    /// Entry ID
    pub id: TimerEntryId,
    /// 到期时间
    /// Expiration time
    pub expiry_time: SimTime,
    /// 到期时交付的事件
    /// Event delivered on expiry
    pub event: E,
}

impl<E> TimerEntry<E> {
    /// 创建新的定时器条目
    /// Create new timer entry
    pub fn new(id: TimerEntryId, expiry_time: SimTime, event: E) -> Self {
        Self {
            id,
            expiry_time,
            event,
        }
    }
}
