//! 网关物理层：接收路径仲裁器
//! Gateway physical layer: the reception-path arbiter
//!
//! The gateway owns a fixed pool of reception paths. A new signal takes the
//! first free path in pool order, regardless of its quality. Sensitivity is
//! only checked against that first free path. Starting a transmission aborts
//! every reception in progress.
//!
//! 网关拥有固定数量的接收路径。新信号按池顺序占用第一个空闲路径，
//! 与信号质量无关。开始发送会中止所有正在进行的接收。

use super::interference::{InterferenceEvent, InterferenceHelper};
use super::path::ReceptionPath;
use super::trace::{PhyTrace, TraceRecord, TraceSink};
use super::{LoraTxParameters, SpreadingFactor, rx_power_to_snr, time_on_air};
use crate::config::PhyConfig;
use crate::network::status::GatewayId;
use crate::packet::Packet;
use crate::timer::{Scheduler, SimTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// 接收带宽，用于计算信噪比
/// Receive bandwidth used for SNR computation
const RX_BANDWIDTH_HZ: f64 = 125_000.0;

/// 网关物理层调度的事件
/// Events scheduled by the gateway physical layer
#[derive(Debug, Clone)]
pub enum GatewayPhyEvent {
    EndReceive(Arc<InterferenceEvent>),
    TxFinished(Packet),
}

/// 带目标网关的物理层定时器事件
/// Physical-layer timer event with its target gateway
#[derive(Debug, Clone)]
pub struct PhyTimer {
    pub gateway: GatewayId,
    pub event: GatewayPhyEvent,
}

/// 网关物理层
/// Gateway physical layer
#[derive(Debug)]
pub struct GatewayPhy {
    id: GatewayId,
    node_id: u32,
    paths: Vec<ReceptionPath>,
    occupied_paths: usize,
    transmitting: bool,
    interference: InterferenceHelper,
    traces: TraceSink,
    /// Upper layer receiving correctly demodulated packets.
    receive_ok: Option<mpsc::UnboundedSender<Packet>>,
    tx_finished: Option<mpsc::UnboundedSender<Packet>>,
}

impl GatewayPhy {
    pub fn new(id: GatewayId, node_id: u32, config: &PhyConfig, traces: TraceSink) -> Self {
        let paths = (0..config.reception_paths)
            .map(|_| ReceptionPath::Free)
            .collect();
        Self {
            id,
            node_id,
            paths,
            occupied_paths: 0,
            transmitting: false,
            interference: InterferenceHelper::new(
                config.isolation_matrix,
                config.old_event_threshold,
                config.event_cleanup_threshold,
            ),
            traces,
            receive_ok: None,
            tx_finished: None,
        }
    }

    pub fn set_receive_ok_callback(&mut self, sender: mpsc::UnboundedSender<Packet>) {
        self.receive_ok = Some(sender);
    }

    pub fn set_tx_finished_callback(&mut self, sender: mpsc::UnboundedSender<Packet>) {
        self.tx_finished = Some(sender);
    }

    pub fn id(&self) -> GatewayId {
        self.id
    }

    pub fn is_transmitting(&self) -> bool {
        self.transmitting
    }

    pub fn occupied_paths(&self) -> usize {
        self.occupied_paths
    }

    pub fn reception_paths(&self) -> &[ReceptionPath] {
        &self.paths
    }

    pub fn interference(&self) -> &InterferenceHelper {
        &self.interference
    }

    fn fire(&self, time: SimTime, trace: PhyTrace) {
        self.traces.fire(TraceRecord {
            time,
            gateway: self.id,
            node_id: self.node_id,
            trace,
        });
    }

    /// 开始下行发送，返回空中时间
    /// Begin a downlink transmission, returning its time on air
    pub fn send<S>(
        &mut self,
        scheduler: &mut S,
        mut packet: Packet,
        params: LoraTxParameters,
        frequency_hz: f64,
        tx_power_dbm: f64,
    ) -> Duration
    where
        S: Scheduler,
        S::Event: From<PhyTimer>,
    {
        let now = scheduler.now();

        // Interrupt all receive operations.
        for index in 0..self.paths.len() {
            if let Some((event, end_receive)) = self.paths[index].free() {
                self.fire(
                    now,
                    PhyTrace::ReceptionInterrupted {
                        packet: event.packet.clone(),
                    },
                );
                scheduler.cancel(end_receive);
                self.occupied_paths -= 1;
                self.fire(
                    now,
                    PhyTrace::OccupiedPaths {
                        count: self.occupied_paths,
                    },
                );
            }
        }

        packet.tag.spreading_factor = params.spreading_factor.value();
        packet.tag.data_rate = params.spreading_factor.data_rate();
        packet.tag.frequency_hz = frequency_hz;
        packet.tag.tx_power_dbm = tx_power_dbm;

        let duration = time_on_air(packet.size(), &params);
        debug!(
            gateway = %self.id,
            sf = %params.spreading_factor,
            duration = ?duration,
            "Sending downlink"
        );

        self.transmitting = true;
        self.fire(
            now,
            PhyTrace::StartSending {
                packet: packet.clone(),
                tx_power_dbm,
            },
        );
        scheduler.schedule(
            duration,
            PhyTimer {
                gateway: self.id,
                event: GatewayPhyEvent::TxFinished(packet),
            }
            .into(),
        );
        duration
    }

    /// 发送结束
    /// End of a transmission
    pub fn tx_finished(&mut self, now: SimTime, packet: Packet) {
        self.transmitting = false;
        if let Some(sender) = &self.tx_finished {
            if sender.send(packet.clone()).is_err() {
                debug!(gateway = %self.id, uid = packet.uid, "Tx-finished receiver closed");
            }
        }
        self.fire(now, PhyTrace::TxFinished { packet: packet.clone() });
        self.fire(now, PhyTrace::SnifferTx { packet });
    }

    /// 信号开始到达网关
    /// A signal begins arriving at the gateway
    pub fn start_receive<S>(
        &mut self,
        scheduler: &mut S,
        packet: Packet,
        rx_power_dbm: f64,
        spreading_factor: SpreadingFactor,
        duration: Duration,
        frequency_hz: f64,
    ) where
        S: Scheduler,
        S::Event: From<PhyTimer>,
    {
        let now = scheduler.now();
        if self.transmitting {
            info!(
                gateway = %self.id,
                sf = %spreading_factor,
                "Dropping packet reception because we are in TX mode"
            );
            self.fire(now, PhyTrace::DroppedTransmitting { packet });
            return;
        }

        let event = self.interference.add(
            now,
            duration,
            rx_power_dbm,
            spreading_factor,
            packet.clone(),
            frequency_hz,
        );

        let Some(index) = self.paths.iter().position(ReceptionPath::is_available) else {
            info!(
                gateway = %self.id,
                sf = %spreading_factor,
                frequency_hz,
                "Dropping packet reception because no suitable demodulator was found"
            );
            self.fire(now, PhyTrace::DroppedNoPath { packet });
            return;
        };

        let sensitivity = spreading_factor.gateway_sensitivity_dbm();
        if rx_power_dbm < sensitivity {
            info!(
                gateway = %self.id,
                sf = %spreading_factor,
                rx_power_dbm,
                sensitivity,
                "Dropping packet reception because under the sensitivity"
            );
            self.fire(now, PhyTrace::DroppedUnderSensitivity { packet });
            return;
        }

        let end_receive = scheduler.schedule(
            duration,
            PhyTimer {
                gateway: self.id,
                event: GatewayPhyEvent::EndReceive(Arc::clone(&event)),
            }
            .into(),
        );
        self.paths[index].lock_on_event(event, end_receive);
        self.occupied_paths += 1;
        trace!(
            gateway = %self.id,
            path = index,
            occupied = self.occupied_paths,
            "Scheduling reception of a packet, occupying one demodulator"
        );
        self.fire(
            now,
            PhyTrace::OccupiedPaths {
                count: self.occupied_paths,
            },
        );
        self.fire(now, PhyTrace::ReceptionBegan { packet });
    }

    /// 结束一次接收并判定结果
    /// Finish a reception and resolve its outcome
    pub fn end_receive(&mut self, now: SimTime, event: &Arc<InterferenceEvent>) {
        let mut packet = event.packet.clone();
        self.fire(now, PhyTrace::ReceptionEnded { packet: packet.clone() });

        match self.interference.destroyed_by(event) {
            Some(destroyed_by) => {
                debug!(
                    gateway = %self.id,
                    destroyed_by = %destroyed_by,
                    "Packet destroyed by interference"
                );
                packet.tag.destroyed_by = destroyed_by.value();
                packet.tag.reception_time = Some(now);
                self.fire(
                    now,
                    PhyTrace::Interfered {
                        packet,
                        destroyed_by,
                    },
                );
            }
            None => {
                debug!(
                    gateway = %self.id,
                    sf = %event.spreading_factor,
                    "Packet received correctly"
                );
                packet.tag.reception_time = Some(now);
                packet.tag.receive_power_dbm = event.rx_power_dbm;
                packet.tag.frequency_hz = event.frequency_hz;
                packet.tag.snr_db = rx_power_to_snr(event.rx_power_dbm, RX_BANDWIDTH_HZ);
                if let Some(sender) = &self.receive_ok {
                    if sender.send(packet.clone()).is_err() {
                        debug!(gateway = %self.id, uid = packet.uid, "Receive-ok receiver closed");
                    }
                }
                self.fire(now, PhyTrace::Received { packet: packet.clone() });
                self.fire(now, PhyTrace::SnifferRx { packet });
            }
        }

        if let Some(path) = self.paths.iter_mut().find(|p| p.is_locked_on(event)) {
            path.free();
            self.occupied_paths -= 1;
            self.fire(
                now,
                PhyTrace::OccupiedPaths {
                    count: self.occupied_paths,
                },
            );
        }
    }

    /// 分发一个到期的物理层定时器事件
    /// Dispatch an expired physical-layer timer event
    pub fn handle_event(&mut self, now: SimTime, event: GatewayPhyEvent) {
        match event {
            GatewayPhyEvent::EndReceive(event) => self.end_receive(now, &event),
            GatewayPhyEvent::TxFinished(packet) => self.tx_finished(now, packet),
        }
    }
}
