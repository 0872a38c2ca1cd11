//! 虚拟时间定时器模块
//! Virtual-time timer module
//!
//! 该模块提供了离散事件仿真所需的最小调度器：按虚拟时间排序的事件队列，
//! 同一时刻的事件按插入顺序（FIFO）处理，取消操作是幂等的。
//!
//! This module provides the minimal scheduler a discrete-event simulation
//! needs: an event queue ordered by virtual time, where events due at the same
//! instant are processed in insertion (FIFO) order and cancellation is
//! idempotent.

mod entry;
mod queue;

#[cfg(test)]
mod tests;

pub use entry::{TimerEntry, TimerEntryId};
pub use queue::EventQueue;

use std::time::Duration;

/// 虚拟时间，从仿真开始计算
/// Virtual time, measured from the start of the simulation
pub type SimTime = Duration;

/// 调度器契约，由仿真宿主实现
/// Scheduler contract, implemented by the simulation host
///
/// Components never block: "waiting" is always the scheduling of a future
/// event through this trait.
///
/// 组件从不阻塞：“等待”总是通过此 trait 调度一个未来事件。
pub trait Scheduler {
    /// 调度器携带的事件类型
    /// Event type carried by the scheduler
    type Event;

    /// 当前虚拟时间
    /// Current virtual time
    fn now(&self) -> SimTime;

    /// 在 `now + delay` 调度一个事件
    /// Schedule an event at `now + delay`
    fn schedule(&mut self, delay: Duration, event: Self::Event) -> TimerEntryId;

    /// 取消一个定时器。对已触发或已取消的定时器调用是无操作，返回 `false`。
    /// Cancel a timer. Cancelling an already fired or cancelled timer is a
    /// no-op returning `false`.
    fn cancel(&mut self, id: TimerEntryId) -> bool;
}
