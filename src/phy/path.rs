//! 网关解调器接收路径
//! Gateway demodulator reception path

use super::interference::InterferenceEvent;
use crate::timer::TimerEntryId;
use std::sync::Arc;

/// 一个解调器槽位。要么空闲，要么锁定在一个事件上并持有一个结束接收定时器。
/// One demodulator slot. Either free, or locked on one event holding one
/// end-of-reception timer.
#[derive(Debug, Default)]
pub enum ReceptionPath {
    #[default]
    Free,
    Locked {
        event: Arc<InterferenceEvent>,
        end_receive: TimerEntryId,
    },
}

impl ReceptionPath {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Free)
    }

    pub fn lock_on_event(&mut self, event: Arc<InterferenceEvent>, end_receive: TimerEntryId) {
        *self = Self::Locked { event, end_receive };
    }

    pub fn event(&self) -> Option<&Arc<InterferenceEvent>> {
        match self {
            Self::Locked { event, .. } => Some(event),
            Self::Free => None,
        }
    }

    /// 路径是否锁定在这个事件上（按身份比较）
    /// Whether the path is locked on this very event (identity comparison)
    pub fn is_locked_on(&self, event: &Arc<InterferenceEvent>) -> bool {
        self.event().is_some_and(|locked| Arc::ptr_eq(locked, event))
    }

    /// 释放路径，返回它持有的事件和定时器
    /// Free the path, returning the event and timer it held
    pub fn free(&mut self) -> Option<(Arc<InterferenceEvent>, TimerEntryId)> {
        match std::mem::take(self) {
            Self::Locked { event, end_receive } => Some((event, end_receive)),
            Self::Free => None,
        }
    }
}
