//! 物理层通知通道与数据包结果统计
//! Physical-layer notification channel and packet outcome tracking
//!
//! The arbiter writes one [`TraceRecord`] per notification into an unbounded
//! channel. Sending never blocks. A sink without a receiver drops records, and
//! a receiver closed mid-run is logged once per dropped record at debug level.
//!
//! 仲裁器将每个通知写入无界通道。发送从不阻塞。

use super::SpreadingFactor;
use crate::network::status::GatewayId;
use crate::packet::{Packet, PacketUid};
use crate::timer::SimTime;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// 物理层通知
/// Physical-layer notification
#[derive(Debug, Clone)]
pub enum PhyTrace {
    /// A reception path locked onto the packet.
    ReceptionBegan { packet: Packet },
    /// The end-of-reception timer of the packet fired, whatever the outcome.
    ReceptionEnded { packet: Packet },
    /// The packet survived interference and was forwarded to the upper layer.
    Received { packet: Packet },
    Interfered {
        packet: Packet,
        destroyed_by: SpreadingFactor,
    },
    DroppedUnderSensitivity { packet: Packet },
    DroppedNoPath { packet: Packet },
    DroppedTransmitting { packet: Packet },
    /// A locked reception was aborted because the gateway started transmitting.
    ReceptionInterrupted { packet: Packet },
    OccupiedPaths { count: usize },
    StartSending { packet: Packet, tx_power_dbm: f64 },
    TxFinished { packet: Packet },
    SnifferRx { packet: Packet },
    SnifferTx { packet: Packet },
}

/// 带时间和来源的通知记录
/// Notification record with time and origin
#[derive(Debug, Clone)]
pub struct TraceRecord {
    pub time: SimTime,
    pub gateway: GatewayId,
    pub node_id: u32,
    pub trace: PhyTrace,
}

/// 通知发送端。没有接收者时丢弃通知。
/// Notification sender. Drops notifications when nobody listens.
#[derive(Debug, Clone, Default)]
pub struct TraceSink {
    sender: Option<mpsc::UnboundedSender<TraceRecord>>,
}

impl TraceSink {
    pub fn new(sender: mpsc::UnboundedSender<TraceRecord>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// 创建一个连接到新通道的发送端
    /// Create a sink connected to a fresh channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TraceRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn fire(&self, record: TraceRecord) {
        if let Some(sender) = &self.sender {
            if let Err(mpsc::error::SendError(record)) = sender.send(record) {
                debug!(
                    gateway = %record.gateway,
                    time = ?record.time,
                    "Trace receiver closed, dropping notification"
                );
            }
        }
    }
}

/// 单个网关的接收结果计数
/// Reception outcome counters of one gateway
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayCounters {
    pub received: u64,
    pub interfered: u64,
    pub under_sensitivity: u64,
    pub no_more_receivers: u64,
    pub while_transmitting: u64,
    pub interrupted: u64,
    pub sent: u64,
}

/// 一个仍有网关未给出结果的上行数据包
/// An uplink some gateways have not resolved yet
#[derive(Debug, Clone, Copy)]
struct InFlight {
    pending_outcomes: usize,
    delivered: bool,
}

/// 统计物理层结果的通知消费者
/// Notification consumer counting physical-layer outcomes
///
/// Outcomes are counted per gateway. A packet counts as delivered if at least
/// one gateway received it. Every gateway resolves an uplink with exactly one
/// terminal outcome, so a packet is forgotten once all of them reported and
/// memory stays bounded by the packets still on air.
#[derive(Debug, Default)]
pub struct PacketTracker {
    per_gateway: HashMap<GatewayId, GatewayCounters>,
    in_flight: HashMap<PacketUid, InFlight>,
    sent: usize,
    delivered: usize,
}

impl PacketTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个设备发出的上行数据包，`receivers` 为将给出结果的网关数
    /// Record an uplink transmitted by a device, heard by `receivers` gateways
    pub fn packet_sent(&mut self, uid: PacketUid, receivers: usize) {
        self.sent += 1;
        if receivers > 0 {
            self.in_flight.insert(
                uid,
                InFlight {
                    pending_outcomes: receivers,
                    delivered: false,
                },
            );
        }
    }

    pub fn record(&mut self, record: &TraceRecord) {
        let counters = self.per_gateway.entry(record.gateway).or_default();
        let (uid, received) = match &record.trace {
            PhyTrace::Received { packet } => {
                counters.received += 1;
                (packet.uid, true)
            }
            PhyTrace::Interfered { packet, .. } => {
                counters.interfered += 1;
                (packet.uid, false)
            }
            PhyTrace::DroppedUnderSensitivity { packet } => {
                counters.under_sensitivity += 1;
                (packet.uid, false)
            }
            PhyTrace::DroppedNoPath { packet } => {
                counters.no_more_receivers += 1;
                (packet.uid, false)
            }
            PhyTrace::DroppedTransmitting { packet } => {
                counters.while_transmitting += 1;
                (packet.uid, false)
            }
            PhyTrace::ReceptionInterrupted { packet } => {
                counters.interrupted += 1;
                (packet.uid, false)
            }
            PhyTrace::StartSending { .. } => {
                counters.sent += 1;
                return;
            }
            PhyTrace::ReceptionBegan { .. }
            | PhyTrace::ReceptionEnded { .. }
            | PhyTrace::OccupiedPaths { .. }
            | PhyTrace::TxFinished { .. }
            | PhyTrace::SnifferRx { .. }
            | PhyTrace::SnifferTx { .. } => return,
        };
        self.resolve(uid, received);
    }

    fn resolve(&mut self, uid: PacketUid, received: bool) {
        let Some(entry) = self.in_flight.get_mut(&uid) else {
            return;
        };
        if received && !entry.delivered {
            entry.delivered = true;
            self.delivered += 1;
        }
        entry.pending_outcomes = entry.pending_outcomes.saturating_sub(1);
        if entry.pending_outcomes == 0 {
            self.in_flight.remove(&uid);
        }
    }

    /// 消费通道中所有待处理的通知
    /// Consume every pending notification of a channel
    pub fn drain(&mut self, receiver: &mut mpsc::UnboundedReceiver<TraceRecord>) {
        while let Ok(record) = receiver.try_recv() {
            self.record(&record);
        }
    }

    pub fn gateway(&self, id: GatewayId) -> GatewayCounters {
        self.per_gateway.get(&id).copied().unwrap_or_default()
    }

    pub fn packets_sent(&self) -> usize {
        self.sent
    }

    pub fn packets_delivered(&self) -> usize {
        self.delivered
    }

    /// Uplinks still waiting for an outcome from at least one gateway.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// 网络层面的包投递率，没有发送时为 `None`
    /// Network-wide packet delivery ratio, `None` before any transmission
    pub fn delivery_ratio(&self) -> Option<f64> {
        match self.packets_sent() {
            0 => None,
            sent => Some(self.packets_delivered() as f64 / sent as f64),
        }
    }
}
