//! 仿真组合根
//! Simulation composition root
//!
//! Wires end devices, gateway physical layers and the network server around a
//! single virtual-time event queue:
//!
//! ```text
//! PeriodicSender ─▶ GatewayPhy::start_receive ─▶ end_receive ─▶ NetworkServer::receive
//!                                                                  │
//!        device ◀── downlink ◀── GatewayPhy::send ◀── receive window ◀┘
//! ```
//!
//! Everything runs on the caller's thread. The first `Err` returned by any
//! layer stops the run and is handed back to the caller.
//!
//! 所有逻辑在调用者线程上运行。任何层返回的第一个错误都会停止仿真并返回给调用者。

use crate::allocator::duty_cycle_fraction;
use crate::config::{Config, PathLossConfig};
use crate::congestion::CongestionControlComponent;
use crate::error::{Error, Result};
use crate::network::controller::ControllerComponent;
use crate::network::server::{NetworkServer, WindowOutcome};
use crate::network::status::{
    ApplicationStatus, DeviceAddress, EndDeviceMac, EndDeviceStatus, GatewayId, GatewayStatus,
    NetworkStatus, Position,
};
use crate::packet::{Packet, PacketUid};
use crate::phy::gateway::{GatewayPhy, PhyTimer};
use crate::phy::trace::{GatewayCounters, PacketTracker, TraceRecord, TraceSink};
use crate::phy::{LoraTxParameters, SpreadingFactor};
use crate::timer::{EventQueue, Scheduler, SimTime};
use crate::traffic::{PeriodicSender, SendDecision, seeded_rng};
use rand::Rng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// 第二接收窗口的频率
/// Frequency of the second receive window
pub const RX2_FREQUENCY_HZ: f64 = 869.525e6;

/// 第二接收窗口的数据速率（SF12）
/// Data rate of the second receive window (SF12)
pub const RX2_DATA_RATE: u8 = 0;

/// 仿真事件
/// Simulation events
#[derive(Debug, Clone)]
pub enum SimEvent {
    Phy(PhyTimer),
    /// Periodic application tick of a device.
    Uplink(DeviceAddress),
    ReceiveWindow { address: DeviceAddress, window: u8 },
    /// A downlink finished arriving at the device.
    DeliverDownlink { address: DeviceAddress, packet: Packet },
    ApplicationStop(DeviceAddress),
    ApplicationStart(DeviceAddress),
}

impl From<PhyTimer> for SimEvent {
    fn from(timer: PhyTimer) -> Self {
        SimEvent::Phy(timer)
    }
}

/// 终端设备描述
/// End-device description
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    pub address: DeviceAddress,
    pub position: Position,
    pub data_rate: u8,
    pub cluster: u8,
    pub packet_size: usize,
    pub interval: Duration,
}

struct SimDevice {
    sender: PeriodicSender,
    position: Position,
    spreading_factor: SpreadingFactor,
    downlinks: u64,
}

struct SimGateway {
    phy: GatewayPhy,
    position: Position,
    received: mpsc::UnboundedReceiver<Packet>,
}

/// 一次仿真运行的汇总
/// Summary of a simulation run
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub end_time: SimTime,
    pub packets_sent: usize,
    pub packets_delivered: usize,
    pub delivery_ratio: Option<f64>,
    /// Transmissions skipped by the device duty cycle.
    pub transmissions_skipped: u64,
    pub downlinks_delivered: u64,
    pub gateways: BTreeMap<GatewayId, GatewayCounters>,
}

/// 离散事件仿真
/// Discrete-event simulation
pub struct Simulation {
    config: Config,
    queue: EventQueue<SimEvent>,
    status: Arc<NetworkStatus>,
    server: NetworkServer,
    gateways: BTreeMap<GatewayId, SimGateway>,
    devices: BTreeMap<DeviceAddress, SimDevice>,
    rng: StdRng,
    next_uid: PacketUid,
    traces: TraceSink,
    trace_rx: mpsc::UnboundedReceiver<TraceRecord>,
    tracker: PacketTracker,
}

impl Simulation {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_status(config, Arc::new(NetworkStatus::new()))
    }

    /// 使用外部提供的注册表创建仿真（例如带有后端镜像监听者的注册表）
    /// Create a simulation over an externally provided registry, for instance
    /// one with a backend mirror listener
    pub fn with_status(config: Config, status: Arc<NetworkStatus>) -> Result<Self> {
        config.validate()?;
        let (traces, trace_rx) = TraceSink::channel();
        let server = NetworkServer::new(config.network.clone(), Arc::clone(&status));
        let rng = seeded_rng(config.simulation.seed, config.simulation.run);
        info!(
            seed = config.simulation.seed,
            run = config.simulation.run,
            "Simulation created"
        );
        Ok(Self {
            config,
            queue: EventQueue::new(),
            status,
            server,
            gateways: BTreeMap::new(),
            devices: BTreeMap::new(),
            rng,
            next_uid: 1,
            traces,
            trace_rx,
            tracker: PacketTracker::new(),
        })
    }

    pub fn status(&self) -> &Arc<NetworkStatus> {
        &self.status
    }

    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    /// 安装一个网络控制器组件
    /// Install a network controller component
    pub fn install_component(&mut self, component: Box<dyn ControllerComponent>) {
        self.server.controller_mut().install(component);
    }

    /// 使用配置中的参数安装拥塞控制组件
    /// Install the congestion-control component with the configured parameters
    pub fn install_congestion_control(&mut self) {
        let component = CongestionControlComponent::new(self.config.congestion_control.clone());
        self.install_component(Box::new(component));
    }

    pub fn add_gateway(&mut self, id: GatewayId, position: Position) {
        let node_id = u32::try_from(self.gateways.len() + self.devices.len()).unwrap_or(u32::MAX);
        let mut phy = GatewayPhy::new(id, node_id, &self.config.phy, self.traces.clone());
        let (tx, received) = mpsc::unbounded_channel();
        phy.set_receive_ok_callback(tx);
        self.status.add_gateway(GatewayStatus {
            id,
            node_id,
            position,
        });
        self.gateways.insert(
            id,
            SimGateway {
                phy,
                position,
                received,
            },
        );
    }

    /// 注册设备并在随机偏移后调度其第一次发送
    /// Register a device and schedule its first transmission after a random
    /// offset
    pub fn add_device(&mut self, spec: DeviceSpec) -> Result<()> {
        let spreading_factor = SpreadingFactor::from_data_rate(spec.data_rate)?;
        let node_id = u32::try_from(self.gateways.len() + self.devices.len()).unwrap_or(u32::MAX);
        self.status.add_end_device(EndDeviceStatus::new(
            spec.address,
            node_id,
            spec.position,
            EndDeviceMac {
                data_rate: spec.data_rate,
                cluster: spec.cluster,
                aggregated_duty_cycle: 1.0,
            },
            ApplicationStatus {
                packet_size: spec.packet_size,
                interval: spec.interval,
                running: true,
            },
        ));

        let sender = PeriodicSender::new(spec.address, spec.interval, spec.packet_size);
        let offset = sender.initial_offset(&mut self.rng);
        self.queue
            .schedule_at(self.queue.now() + offset, SimEvent::Uplink(spec.address));
        self.devices.insert(
            spec.address,
            SimDevice {
                sender,
                position: spec.position,
                spreading_factor,
                downlinks: 0,
            },
        );
        Ok(())
    }

    /// 在给定时间停止设备应用
    /// Stop the application of a device at the given time
    pub fn schedule_application_stop(&mut self, address: DeviceAddress, at: SimTime) {
        self.queue.schedule_at(at, SimEvent::ApplicationStop(address));
    }

    pub fn schedule_application_start(&mut self, address: DeviceAddress, at: SimTime) {
        self.queue.schedule_at(at, SimEvent::ApplicationStart(address));
    }

    /// 运行到虚拟时间 `end`
    /// Run until virtual time `end`
    pub fn run_until(&mut self, end: SimTime) -> Result<SimulationReport> {
        while let Some(expiry) = self.queue.next_expiry_time() {
            if expiry > end {
                break;
            }
            let Some(entry) = self.queue.pop_next() else {
                break;
            };
            let now = entry.expiry_time;
            if let Err(e) = self.handle_event(now, entry.event) {
                warn!(error = %e, now = ?now, "Simulation stopped");
                return Err(e);
            }
            self.dispatch_received(now)?;
            self.tracker.drain(&mut self.trace_rx);
        }
        Ok(self.report(end))
    }

    /// 当前的汇总
    /// Summary at this point
    pub fn report(&self, end_time: SimTime) -> SimulationReport {
        SimulationReport {
            end_time,
            packets_sent: self.tracker.packets_sent(),
            packets_delivered: self.tracker.packets_delivered(),
            delivery_ratio: self.tracker.delivery_ratio(),
            transmissions_skipped: self.devices.values().map(|d| d.sender.skipped()).sum(),
            downlinks_delivered: self.devices.values().map(|d| d.downlinks).sum(),
            gateways: self
                .gateways
                .keys()
                .map(|id| (*id, self.tracker.gateway(*id)))
                .collect(),
        }
    }

    fn handle_event(&mut self, now: SimTime, event: SimEvent) -> Result<()> {
        match event {
            SimEvent::Phy(timer) => {
                let gateway = self
                    .gateways
                    .get_mut(&timer.gateway)
                    .ok_or(Error::UnknownGateway(timer.gateway))?;
                gateway.phy.handle_event(now, timer.event);
                Ok(())
            }
            SimEvent::Uplink(address) => self.uplink(now, address),
            SimEvent::ReceiveWindow { address, window } => self.receive_window(now, address, window),
            SimEvent::DeliverDownlink { address, packet } => self.deliver_downlink(address, &packet),
            SimEvent::ApplicationStop(address) => {
                debug!(device = %address, "Application stopped");
                self.status.set_application_running(address, false)
            }
            SimEvent::ApplicationStart(address) => {
                debug!(device = %address, "Application started");
                self.status.set_application_running(address, true)
            }
        }
    }

    fn uplink(&mut self, now: SimTime, address: DeviceAddress) -> Result<()> {
        let device = self
            .devices
            .get_mut(&address)
            .ok_or(Error::UnknownDevice(address))?;
        self.queue
            .schedule(device.sender.interval(), SimEvent::Uplink(address));
        if !self.status.is_application_running(address)? {
            return Ok(());
        }

        let duty_cycle = self.status.aggregated_duty_cycle(address)?;
        let params = LoraTxParameters::for_spreading_factor(device.spreading_factor);
        let uid = self.next_uid;
        let (mut packet, duration) = match device.sender.next_packet(uid, now, duty_cycle, &params) {
            SendDecision::Send {
                packet,
                time_on_air,
            } => (packet, time_on_air),
            SendDecision::OffTime { .. } | SendDecision::Disabled => return Ok(()),
        };
        self.next_uid += 1;

        let channels = &self.config.simulation.channels_hz;
        let frequency_hz = channels[self.rng.random_range(0..channels.len())];
        let tx_power_dbm = self.config.simulation.tx_power_dbm;
        packet.tag.spreading_factor = device.spreading_factor.value();
        packet.tag.data_rate = device.spreading_factor.data_rate();
        packet.tag.frequency_hz = frequency_hz;
        packet.tag.tx_power_dbm = tx_power_dbm;
        self.tracker.packet_sent(uid, self.gateways.len());
        trace!(device = %address, uid, fcnt = packet.frame_header.frame_counter, "Uplink transmitted");

        let position = device.position;
        let spreading_factor = device.spreading_factor;
        for gateway in self.gateways.values_mut() {
            let distance = position.distance_to(&gateway.position);
            let rx_power_dbm = tx_power_dbm - path_loss_db(&self.config.simulation.path_loss, distance);
            gateway.phy.start_receive(
                &mut self.queue,
                packet.clone(),
                rx_power_dbm,
                spreading_factor,
                duration,
                frequency_hz,
            );
        }
        Ok(())
    }

    fn dispatch_received(&mut self, now: SimTime) -> Result<()> {
        let mut received = Vec::new();
        for (id, gateway) in &mut self.gateways {
            while let Ok(packet) = gateway.received.try_recv() {
                received.push((*id, packet));
            }
        }
        for (gateway, packet) in received {
            if let Some(request) = self.server.receive(now, &packet, gateway)? {
                self.queue.schedule(
                    request.delay,
                    SimEvent::ReceiveWindow {
                        address: request.address,
                        window: request.window,
                    },
                );
            }
        }
        Ok(())
    }

    fn receive_window(&mut self, now: SimTime, address: DeviceAddress, window: u8) -> Result<()> {
        let gateways = &self.gateways;
        let outcome = self.server.open_receive_window(now, address, window, |id| {
            gateways.get(&id).is_some_and(|g| !g.phy.is_transmitting())
        })?;

        match outcome {
            WindowOutcome::Retry(request) => {
                self.queue.schedule(
                    request.delay,
                    SimEvent::ReceiveWindow {
                        address: request.address,
                        window: request.window,
                    },
                );
            }
            WindowOutcome::Reply(downlink) => {
                let (data_rate, frequency_hz) = if window == 1 {
                    (downlink.data_rate, downlink.frequency_hz)
                } else {
                    (RX2_DATA_RATE, RX2_FREQUENCY_HZ)
                };
                let params = LoraTxParameters::for_spreading_factor(SpreadingFactor::from_data_rate(data_rate)?);
                let gateway = self
                    .gateways
                    .get_mut(&downlink.gateway)
                    .ok_or(Error::UnknownGateway(downlink.gateway))?;
                let duration = gateway.phy.send(
                    &mut self.queue,
                    downlink.packet.clone(),
                    params,
                    frequency_hz,
                    self.config.simulation.tx_power_dbm,
                );
                self.queue.schedule(
                    duration,
                    SimEvent::DeliverDownlink {
                        address,
                        packet: downlink.packet,
                    },
                );
            }
            WindowOutcome::NoReply | WindowOutcome::GaveUp => {}
        }
        Ok(())
    }

    fn deliver_downlink(&mut self, address: DeviceAddress, packet: &Packet) -> Result<()> {
        let device = self
            .devices
            .get_mut(&address)
            .ok_or(Error::UnknownDevice(address))?;
        device.downlinks += 1;
        if let Some(exponent) = packet.frame_header.duty_cycle_req() {
            let duty_cycle = duty_cycle_fraction(exponent);
            debug!(device = %address, exponent, duty_cycle, "DutyCycleReq applied");
            self.status.set_aggregated_duty_cycle(address, duty_cycle)?;
            device.sender.acknowledge_duty_cycle();
        }
        Ok(())
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("now", &self.queue.now())
            .field("gateways", &self.gateways.len())
            .field("devices", &self.devices.len())
            .field("pending_events", &self.queue.len())
            .finish()
    }
}

/// 对数距离传播损耗（dB）
/// Log-distance propagation loss, in dB
pub fn path_loss_db(model: &PathLossConfig, distance_m: f64) -> f64 {
    let distance = distance_m.max(model.reference_distance_m);
    model.reference_loss_db + 10.0 * model.exponent * (distance / model.reference_distance_m).log10()
}
