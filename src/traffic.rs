//! 周期性上行应用
//! Periodic uplink application
//!
//! Every device runs one sender: a packet of `packet_size` bytes every
//! `interval`, starting at a random offset inside the first interval. The
//! aggregated duty cycle of the device is enforced after every transmission:
//! the radio stays silent for `toa · (1/dc − 1)` and transmissions falling in
//! that off-time are skipped. A DutyCycleReq delivered to the device is
//! answered with a DutyCycleAns piggybacked on the next uplink.
//!
//! 每个设备运行一个发送器：每隔 `interval` 发送一个数据包，起始偏移随机。
//! 每次发送后强制执行设备的聚合占空比。

use crate::network::status::DeviceAddress;
use crate::packet::{Packet, PacketUid};
use crate::phy::{LoraTxParameters, time_on_air};
use crate::timer::SimTime;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tracing::trace;

/// 由基础种子和运行标识符构造随机数生成器
/// Build the random number generator of a run from the base seed and the run
/// identifier
pub fn seeded_rng(seed: u64, run: u64) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ run)
}

/// 一次发送尝试的结果
/// Outcome of a transmission attempt
#[derive(Debug, Clone)]
pub enum SendDecision {
    Send { packet: Packet, time_on_air: Duration },
    /// Still in the off-time of the previous transmission.
    OffTime { until: SimTime },
    /// The aggregated duty cycle is zero.
    Disabled,
}

/// 周期性发送器
/// Periodic sender
#[derive(Debug, Clone)]
pub struct PeriodicSender {
    address: DeviceAddress,
    interval: Duration,
    packet_size: usize,
    next_frame_counter: u16,
    ready_at: SimTime,
    sent: u64,
    skipped: u64,
    answer_pending: bool,
}

impl PeriodicSender {
    pub fn new(address: DeviceAddress, interval: Duration, packet_size: usize) -> Self {
        Self {
            address,
            interval,
            packet_size,
            next_frame_counter: 0,
            ready_at: Duration::ZERO,
            sent: 0,
            skipped: 0,
            answer_pending: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// 记录一个已应用的 DutyCycleReq，下一次上行携带应答
    /// Note an applied DutyCycleReq, answered by the next uplink
    pub fn acknowledge_duty_cycle(&mut self) {
        self.answer_pending = true;
    }

    pub fn has_pending_answer(&self) -> bool {
        self.answer_pending
    }

    /// 第一次发送的随机偏移，位于 `[0, interval)`
    /// Random offset of the first transmission, in `[0, interval)`
    pub fn initial_offset<R: Rng>(&self, rng: &mut R) -> Duration {
        self.interval.mul_f64(rng.random::<f64>())
    }

    /// 尝试发送下一个数据包
    /// Attempt to send the next packet
    pub fn next_packet(
        &mut self,
        uid: PacketUid,
        now: SimTime,
        aggregated_duty_cycle: f64,
        params: &LoraTxParameters,
    ) -> SendDecision {
        if aggregated_duty_cycle <= 0.0 {
            self.skipped += 1;
            return SendDecision::Disabled;
        }
        if now < self.ready_at {
            self.skipped += 1;
            trace!(device = %self.address, until = ?self.ready_at, "Transmission skipped, duty cycle off-time");
            return SendDecision::OffTime { until: self.ready_at };
        }

        let frame_counter = self.next_frame_counter;
        let payload = Bytes::from(vec![0u8; self.packet_size]);
        let mut packet = Packet::uplink(uid, self.address, frame_counter, payload);
        if std::mem::take(&mut self.answer_pending) {
            packet.frame_header.add_duty_cycle_ans();
        }

        let toa = time_on_air(packet.size(), params);
        let off_time = toa.mul_f64(1.0 / aggregated_duty_cycle.min(1.0) - 1.0);
        self.ready_at = now + toa + off_time;
        self.next_frame_counter = self.next_frame_counter.wrapping_add(1);
        self.sent += 1;

        SendDecision::Send {
            packet,
            time_on_air: toa,
        }
    }
}
