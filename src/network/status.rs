//! 设备与网关状态注册表
//! Device and gateway status registry
//!
//! The registry is shared (`Arc`) between the network server, the controller
//! components and the backend mirror. Every accessor returns an owned clone so
//! no map guard outlives a single call.
//!
//! 注册表在网络服务器、控制器组件和后端镜像之间共享（`Arc`）。
//! 所有访问器都返回克隆，因此没有映射守卫会跨越单次调用。

use crate::error::{Error, Result};
use crate::timer::SimTime;
use dashmap::DashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// 终端设备的 32 位网络地址
/// 32-bit network address of an end device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(pub u32);

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// 网关标识符
/// Gateway identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GatewayId(pub u32);

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cartesian position in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// 终端设备的 MAC 层状态
/// MAC-layer state of an end device
#[derive(Debug, Clone, PartialEq)]
pub struct EndDeviceMac {
    /// 数据速率索引（`12 - SF`）
    /// Data rate index (`12 - SF`)
    pub data_rate: u8,
    /// 设备所属的流量簇
    /// Traffic cluster of the device
    pub cluster: u8,
    /// 聚合占空比，`1.0` 表示不受限，`0.0` 表示禁用
    /// Aggregated duty cycle, `1.0` unrestricted, `0.0` disabled
    pub aggregated_duty_cycle: f64,
}

/// 设备应用层报告的流量参数
/// Traffic parameters reported by the device application
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationStatus {
    /// Application payload size in bytes.
    pub packet_size: usize,
    /// Time between two transmissions.
    pub interval: Duration,
    pub running: bool,
}

/// 注册表中的终端设备记录
/// End device record of the registry
#[derive(Debug, Clone)]
pub struct EndDeviceStatus {
    pub address: DeviceAddress,
    pub node_id: u32,
    pub position: Position,
    /// `None` for nodes without a LoRaWAN MAC layer.
    pub mac: Option<EndDeviceMac>,
    pub application: ApplicationStatus,
    /// Frame counter of the last uplink seen by the server.
    pub last_frame_counter: Option<u16>,
    /// Time of the last uplink seen by the server.
    pub last_seen: Option<SimTime>,
    /// Gateways that received the last uplink, with their receive power in dBm.
    pub last_gateways: Vec<(GatewayId, f64)>,
}

impl EndDeviceStatus {
    pub fn new(
        address: DeviceAddress,
        node_id: u32,
        position: Position,
        mac: EndDeviceMac,
        application: ApplicationStatus,
    ) -> Self {
        Self {
            address,
            node_id,
            position,
            mac: Some(mac),
            application,
            last_frame_counter: None,
            last_seen: None,
            last_gateways: Vec::new(),
        }
    }

    /// 获取 MAC 层状态，若节点没有 MAC 层则返回错误
    /// Get the MAC-layer state, failing if the node has none
    pub fn mac(&self) -> Result<&EndDeviceMac> {
        self.mac.as_ref().ok_or(Error::MissingMac(self.address))
    }
}

/// 注册表中的网关记录
/// Gateway record of the registry
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayStatus {
    pub id: GatewayId,
    pub node_id: u32,
    pub position: Position,
}

/// 注册事件，发送给在组合时注册的监听者
/// Registration event, sent to the listener registered at composition time
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    GatewayAdded(GatewayStatus),
    DeviceAdded(EndDeviceStatus),
}

/// 网络状态注册表
/// Network status registry
#[derive(Debug, Default)]
pub struct NetworkStatus {
    devices: DashMap<DeviceAddress, EndDeviceStatus>,
    gateways: DashMap<GatewayId, GatewayStatus>,
    listener: Option<mpsc::UnboundedSender<RegistryEvent>>,
}

impl NetworkStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建一个注册表，并将每次注册通知给 `listener`
    /// Create a registry that reports every registration to `listener`
    pub fn with_listener(listener: mpsc::UnboundedSender<RegistryEvent>) -> Self {
        Self {
            listener: Some(listener),
            ..Self::default()
        }
    }

    pub fn add_gateway(&self, status: GatewayStatus) {
        debug!(gateway = %status.id, node = status.node_id, "Gateway registered");
        self.notify(RegistryEvent::GatewayAdded(status.clone()));
        self.gateways.insert(status.id, status);
    }

    pub fn add_end_device(&self, status: EndDeviceStatus) {
        debug!(device = %status.address, node = status.node_id, "End device registered");
        self.notify(RegistryEvent::DeviceAdded(status.clone()));
        self.devices.insert(status.address, status);
    }

    fn notify(&self, event: RegistryEvent) {
        if let Some(listener) = &self.listener {
            // A closed listener only stops mirroring; registration still succeeds.
            if listener.send(event).is_err() {
                trace!("Registry listener is gone");
            }
        }
    }

    pub fn end_device(&self, address: DeviceAddress) -> Result<EndDeviceStatus> {
        self.devices
            .get(&address)
            .map(|entry| entry.value().clone())
            .ok_or(Error::UnknownDevice(address))
    }

    pub fn gateway(&self, id: GatewayId) -> Result<GatewayStatus> {
        self.gateways
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::UnknownGateway(id))
    }

    pub fn contains_device(&self, address: DeviceAddress) -> bool {
        self.devices.contains_key(&address)
    }

    /// 所有已注册设备的地址（升序）
    /// Addresses of all registered devices, in ascending order
    pub fn device_addresses(&self) -> Vec<DeviceAddress> {
        let mut addresses: Vec<_> = self.devices.iter().map(|entry| *entry.key()).collect();
        addresses.sort_unstable();
        addresses
    }

    /// 所有已注册网关的标识符（升序）
    /// Identifiers of all registered gateways, in ascending order
    pub fn gateway_ids(&self) -> Vec<GatewayId> {
        let mut ids: Vec<_> = self.gateways.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn gateway_count(&self) -> usize {
        self.gateways.len()
    }

    /// 距离设备最近的网关。距离相等时保留标识符较小的网关。
    /// Gateway nearest to the device. On equal distance the lower id is kept.
    pub fn nearest_gateway(&self, address: DeviceAddress) -> Result<Option<GatewayId>> {
        let position = self.end_device(address)?.position;
        let mut best = None;
        let mut best_distance = f64::MAX;
        for id in self.gateway_ids() {
            let gateway = self.gateway(id)?;
            let distance = position.distance_to(&gateway.position);
            if distance < best_distance {
                best_distance = distance;
                best = Some(id);
            }
        }
        Ok(best)
    }

    pub fn aggregated_duty_cycle(&self, address: DeviceAddress) -> Result<f64> {
        Ok(self.end_device(address)?.mac()?.aggregated_duty_cycle)
    }

    /// 设置设备 MAC 层的聚合占空比
    /// Set the aggregated duty cycle of the device MAC layer
    pub fn set_aggregated_duty_cycle(&self, address: DeviceAddress, duty_cycle: f64) -> Result<()> {
        let mut entry = self
            .devices
            .get_mut(&address)
            .ok_or(Error::UnknownDevice(address))?;
        let mac = entry.mac.as_mut().ok_or(Error::MissingMac(address))?;
        mac.aggregated_duty_cycle = duty_cycle;
        trace!(device = %address, duty_cycle, "Aggregated duty cycle updated");
        Ok(())
    }

    pub fn is_application_running(&self, address: DeviceAddress) -> Result<bool> {
        Ok(self.end_device(address)?.application.running)
    }

    pub fn set_application_running(&self, address: DeviceAddress, running: bool) -> Result<()> {
        let mut entry = self
            .devices
            .get_mut(&address)
            .ok_or(Error::UnknownDevice(address))?;
        entry.application.running = running;
        debug!(device = %address, running, "Application state changed");
        Ok(())
    }

    /// 记录一次上行链路的接收
    /// Record the reception of an uplink
    ///
    /// Several gateways may deliver the same frame. The gateway list is reset
    /// when a new frame counter shows up.
    pub fn record_uplink(
        &self,
        address: DeviceAddress,
        frame_counter: u16,
        now: SimTime,
        gateway: GatewayId,
        rx_power_dbm: f64,
    ) -> Result<()> {
        let mut entry = self
            .devices
            .get_mut(&address)
            .ok_or(Error::UnknownDevice(address))?;
        if entry.last_frame_counter != Some(frame_counter) {
            entry.last_gateways.clear();
            entry.last_frame_counter = Some(frame_counter);
        }
        entry.last_seen = Some(now);
        entry.last_gateways.push((gateway, rx_power_dbm));
        Ok(())
    }
}
