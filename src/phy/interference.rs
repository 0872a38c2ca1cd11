//! 基于能量的干扰计算
//! Energy-based interference accounting
//!
//! Every signal that reaches a gateway is registered here, captured or not.
//! At the end of a reception, the energy every same-channel interferer put on
//! the channel during the overlap is summed per interferer SF and compared
//! with the isolation the matrix requires.
//!
//! 到达网关的每个信号都在此登记，无论是否被捕获。

use super::SpreadingFactor;
use crate::packet::Packet;
use crate::timer::SimTime;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// 信道上的一个信号
/// A signal occupying the channel
#[derive(Debug)]
pub struct InterferenceEvent {
    pub start: SimTime,
    pub duration: Duration,
    pub rx_power_dbm: f64,
    pub spreading_factor: SpreadingFactor,
    pub frequency_hz: f64,
    pub packet: Packet,
}

impl InterferenceEvent {
    pub fn end(&self) -> SimTime {
        self.start + self.duration
    }

    /// 两个事件的重叠时长
    /// Overlap duration of two events
    pub fn overlap(&self, other: &InterferenceEvent) -> Duration {
        let (s1, e1) = (self.start, self.end());
        let (s2, e2) = (other.start, other.end());
        if e1 <= s2 || e2 <= s1 {
            Duration::ZERO
        } else if s1 < s2 {
            if e2 < e1 { e2 - s2 } else { e1 - s2 }
        } else if e1 < e2 {
            e1 - s1
        } else {
            e2 - s1
        }
    }
}

/// 碰撞时使用的信干比隔离矩阵
/// Signal-to-interference isolation matrix used on collisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationMatrix {
    /// Croce et al., measured on SX1272.
    #[default]
    Croce,
    /// Goursaud et al.
    Goursaud,
    /// Any overlap on the same SF destroys both packets, different SFs never
    /// interfere.
    Aloha,
}

const CROCE: [[f64; 6]; 6] = [
    [1.0, -8.0, -9.0, -9.0, -9.0, -9.0],
    [-11.0, 1.0, -11.0, -12.0, -13.0, -13.0],
    [-15.0, -13.0, 1.0, -13.0, -14.0, -15.0],
    [-19.0, -18.0, -17.0, 1.0, -17.0, -18.0],
    [-22.0, -22.0, -21.0, -20.0, 1.0, -20.0],
    [-25.0, -25.0, -25.0, -24.0, -23.0, 1.0],
];

const GOURSAUD: [[f64; 6]; 6] = [
    [6.0, -16.0, -18.0, -19.0, -19.0, -20.0],
    [-24.0, 6.0, -20.0, -22.0, -22.0, -22.0],
    [-27.0, -27.0, 6.0, -23.0, -25.0, -25.0],
    [-30.0, -30.0, -30.0, 6.0, -26.0, -28.0],
    [-33.0, -33.0, -33.0, -33.0, 6.0, -29.0],
    [-36.0, -36.0, -36.0, -36.0, -36.0, 6.0],
];

impl IsolationMatrix {
    /// 信号在给定干扰 SF 下存活所需的最小信干比（dB）
    /// Minimum SIR, in dB, a signal needs to survive an interferer SF
    pub fn isolation_db(self, signal: SpreadingFactor, interferer: SpreadingFactor) -> f64 {
        let (row, col) = (signal.index(), interferer.index());
        match self {
            Self::Croce => CROCE[row][col],
            Self::Goursaud => GOURSAUD[row][col],
            Self::Aloha if row == col => f64::MAX,
            Self::Aloha => f64::NEG_INFINITY,
        }
    }
}

fn dbm_to_watt(power_dbm: f64) -> f64 {
    10f64.powf(power_dbm / 10.0) / 1000.0
}

/// 干扰计算器，每个网关一个
/// Interference accountant, one per gateway
#[derive(Debug)]
pub struct InterferenceHelper {
    events: Vec<Arc<InterferenceEvent>>,
    matrix: IsolationMatrix,
    old_event_threshold: Duration,
    cleanup_threshold: usize,
}

impl InterferenceHelper {
    pub fn new(matrix: IsolationMatrix, old_event_threshold: Duration, cleanup_threshold: usize) -> Self {
        Self {
            events: Vec::new(),
            matrix,
            old_event_threshold,
            cleanup_threshold,
        }
    }

    /// 登记一个从 `now` 开始的信号
    /// Register a signal starting at `now`
    pub fn add(
        &mut self,
        now: SimTime,
        duration: Duration,
        rx_power_dbm: f64,
        spreading_factor: SpreadingFactor,
        packet: Packet,
        frequency_hz: f64,
    ) -> Arc<InterferenceEvent> {
        let event = Arc::new(InterferenceEvent {
            start: now,
            duration,
            rx_power_dbm,
            spreading_factor,
            frequency_hz,
            packet,
        });
        self.events.push(Arc::clone(&event));
        if self.events.len() > self.cleanup_threshold {
            self.clean_old_events(now);
        }
        event
    }

    /// 删除结束时间早于 `now - threshold` 的事件
    /// Drop events that ended before `now - threshold`
    pub fn clean_old_events(&mut self, now: SimTime) {
        let threshold = self.old_event_threshold;
        let before = self.events.len();
        self.events.retain(|e| e.end() + threshold >= now);
        trace!(removed = before - self.events.len(), "Cleaned old interference events");
    }

    /// 判断事件是否被干扰破坏，返回破坏它的 SF
    /// Decide whether the event was destroyed by interference, returning the
    /// destroying SF
    pub fn destroyed_by(&self, event: &Arc<InterferenceEvent>) -> Option<SpreadingFactor> {
        let mut energy = [0.0f64; 6];
        for interferer in &self.events {
            if interferer.frequency_hz != event.frequency_hz || Arc::ptr_eq(interferer, event) {
                continue;
            }
            let overlap = event.overlap(interferer);
            energy[interferer.spreading_factor.index()] +=
                overlap.as_secs_f64() * dbm_to_watt(interferer.rx_power_dbm);
        }

        let signal_energy = event.duration.as_secs_f64() * dbm_to_watt(event.rx_power_dbm);
        for sf in SpreadingFactor::ALL {
            let sir = 10.0 * (signal_energy / energy[sf.index()]).log10();
            let isolation = self.matrix.isolation_db(event.spreading_factor, sf);
            if sir < isolation {
                debug!(
                    signal = %event.spreading_factor,
                    interferer = %sf,
                    sir,
                    isolation,
                    "Packet destroyed by interference"
                );
                return Some(sf);
            }
        }
        None
    }

    pub fn events(&self) -> &[Arc<InterferenceEvent>] {
        &self.events
    }

    pub fn clear_all_events(&mut self) {
        self.events.clear();
    }
}
