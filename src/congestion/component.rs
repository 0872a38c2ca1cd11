//! 拥塞控制组件
//! Congestion-control component
//!
//! The component samples the delivery ratio of every (gateway, cluster, data
//! rate) group for `sampling_duration`. It then runs one bisection step on the
//! offered-traffic ceiling of each group and turns the new ceiling into
//! per-device duty-cycle exponents. The exponents are piggybacked on the replies
//! to the next uplinks. A new sampling period starts once every instruction of
//! the cluster has been delivered.
//!
//! 组件对每个（网关、簇、数据速率）分组采样投递率，然后对提供流量上限执行一步二分搜索，
//! 并将结果转化为每个设备的占空比指数，随下一次回复下发。

use super::bisection::{BisectionParams, bisection_logic, capacity_for_pdr_model};
use super::group::{ConfigAssignments, DataRateStatus, GroupTable, N_SF};
use super::persistence::{load_config_from_file, save_config_to_file};
use crate::allocator::{
    self, AllocationPolicy, DISABLED, UNRESTRICTED, duty_cycle_fraction, is_legal_duty_cycle,
};
use crate::config::CongestionControlConfig;
use crate::error::{Error, Result};
use crate::network::controller::{ControllerComponent, Reply};
use crate::network::status::{DeviceAddress, GatewayId, NetworkStatus};
use crate::packet::{HEADER_OVERHEAD_BYTES, MessageType, Packet};
use crate::phy::{LoraTxParameters, SpreadingFactor, time_on_air};
use crate::timer::SimTime;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Counters further ahead than this are taken as a 16-bit wraparound.
const FRAME_COUNTER_WRAP_TOLERANCE: i32 = 10_000;

/// 组件记录的设备信息
/// Per-device information kept by the component
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Gateway the device is attributed to, the nearest one.
    pub best_gateway: GatewayId,
    pub cluster: u8,
    pub data_rate: u8,
    /// Duty-cycle exponent last delivered to the device.
    pub duty_cycle: u8,
    /// Offered-traffic ceiling: `min(toa / interval, max_offered_traffic)`.
    pub max_offered_traffic: f64,
    pub time_on_air: Duration,
    /// Whether the device currently belongs to its group.
    pub active: bool,
}

/// 拥塞控制组件
/// Congestion-control component
#[derive(Debug)]
pub struct CongestionControlComponent {
    config: CongestionControlConfig,
    /// Fast convergence is still in effect.
    fast: bool,
    devices: HashMap<DeviceAddress, DeviceInfo>,
    frame_counters: HashMap<DeviceAddress, i32>,
    groups: GroupTable,
}

impl CongestionControlComponent {
    pub fn new(config: CongestionControlConfig) -> Self {
        let fast = config.fast_converge;
        Self {
            config,
            fast,
            devices: HashMap::new(),
            frame_counters: HashMap::new(),
            groups: GroupTable::new(),
        }
    }

    pub fn config(&self) -> &CongestionControlConfig {
        &self.config
    }

    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }

    pub fn device_info(&self, address: DeviceAddress) -> Option<&DeviceInfo> {
        self.devices.get(&address)
    }

    /// 快速收敛模式是否仍然有效
    /// Whether fast convergence is still in effect
    pub fn is_fast_converging(&self) -> bool {
        self.fast
    }

    /// 单信道模型容量乘以信道数和缩放因子
    /// Single-channel model capacity times the channel count and the scaling factor
    pub fn capacity_estimate(&self, target: f64) -> f64 {
        capacity_for_pdr_model(target) * f64::from(self.config.channels) * self.config.capacity_scale
    }

    fn target(&self, cluster: u8) -> Result<f64> {
        self.config
            .targets
            .get(usize::from(cluster))
            .copied()
            .ok_or_else(|| Error::InvalidConfig(format!("no PDR target for cluster {cluster}")))
    }

    fn device_mut(&mut self, address: DeviceAddress) -> Result<&mut DeviceInfo> {
        self.devices
            .get_mut(&address)
            .ok_or(Error::UnknownDevice(address))
    }

    /// 为每个网关和簇创建分组，并将所有设备归入其最近网关的分组
    /// Create the groups of every gateway and cluster, and attribute every
    /// device to its nearest gateway
    pub fn initialize_data(&mut self, status: &NetworkStatus) -> Result<()> {
        let clusters = u8::try_from(self.config.targets.len())
            .map_err(|_| Error::InvalidConfig("too many clusters".into()))?;
        for gateway in status.gateway_ids() {
            for cluster in 0..clusters {
                self.groups.create(gateway, cluster, self.config.start_time);
            }
        }

        let mut active = 0usize;
        for address in status.device_addresses() {
            if self.devices.contains_key(&address) {
                continue;
            }
            let info = self.describe_device(address, status)?;
            let running = status.is_application_running(address)?;
            let (gateway, cluster, data_rate, traffic) =
                (info.best_gateway, info.cluster, info.data_rate, info.max_offered_traffic);
            self.devices.insert(address, info);

            if !running {
                self.groups.cluster_mut(gateway, cluster)?.unactive.insert(address);
                continue;
            }
            self.device_mut(address)?.active = true;
            let group = self.groups.group_mut(gateway, cluster, data_rate)?;
            group.devices.push((address, traffic));
            group.offered_traffic.high += traffic;
            active += 1;
        }
        info!(
            gateways = status.gateway_count(),
            devices = self.devices.len(),
            active,
            "Congestion control initialized"
        );

        if let Some(path) = self.config.input_config_file.clone() {
            self.load_config(&path, status)?;
        }
        Ok(())
    }

    /// Builds the inactive record of a device from the registry.
    fn describe_device(&self, address: DeviceAddress, status: &NetworkStatus) -> Result<DeviceInfo> {
        let record = status.end_device(address)?;
        let mac = record.mac()?;
        let spreading_factor = SpreadingFactor::from_data_rate(mac.data_rate)?;
        let params = LoraTxParameters::for_spreading_factor(spreading_factor);
        let toa = time_on_air(record.application.packet_size + HEADER_OVERHEAD_BYTES, &params);
        let traffic = (toa.as_secs_f64() / record.application.interval.as_secs_f64())
            .min(self.config.max_offered_traffic);
        let best_gateway = status
            .nearest_gateway(address)?
            .ok_or_else(|| Error::InvalidConfig("no gateway registered".into()))?;
        trace!(
            device = %address,
            gateway = %best_gateway,
            data_rate = mac.data_rate,
            max_offered_traffic = traffic,
            "Device attributed to gateway"
        );
        Ok(DeviceInfo {
            best_gateway,
            cluster: mac.cluster,
            data_rate: mac.data_rate,
            duty_cycle: UNRESTRICTED,
            max_offered_traffic: traffic,
            time_on_air: toa,
            active: false,
        })
    }

    /// 将设备加入其分组
    /// Add a device to its group
    ///
    /// Once the search of the group has started, the bounds are kept and the
    /// group is only flagged as changed.
    pub fn add_new_device(&mut self, address: DeviceAddress) -> Result<()> {
        let info = self.device_mut(address)?;
        if info.active {
            return Ok(());
        }
        info.active = true;
        let (gateway, cluster, data_rate, traffic) =
            (info.best_gateway, info.cluster, info.data_rate, info.max_offered_traffic);
        info!(device = %address, gateway = %gateway, data_rate, "New device detected");

        let state = self.groups.cluster_mut(gateway, cluster)?;
        state.unactive.remove(&address);
        let group = self.groups.group_mut(gateway, cluster, data_rate)?;
        group.devices.push((address, traffic));
        if group.offered_traffic.started {
            group.offered_traffic.changed = true;
        } else {
            group.offered_traffic.high += traffic;
        }
        Ok(())
    }

    /// 将停止的设备移出其分组
    /// Move a stopped device out of its group
    pub fn remove_disconnected(&mut self, address: DeviceAddress) -> Result<()> {
        let info = self.device_mut(address)?;
        info.active = false;
        let (gateway, cluster, data_rate, traffic) =
            (info.best_gateway, info.cluster, info.data_rate, info.max_offered_traffic);
        info!(device = %address, gateway = %gateway, "Device disconnected");

        let state = self.groups.cluster_mut(gateway, cluster)?;
        state.todo.remove(&address);
        state.disabled.remove(&address);
        state.unactive.insert(address);
        let group = self.groups.group_mut(gateway, cluster, data_rate)?;
        group.devices.retain(|(a, _)| *a != address);
        if group.offered_traffic.started {
            group.offered_traffic.changed = true;
        } else {
            group.offered_traffic.high -= traffic;
        }
        Ok(())
    }

    /// 检测簇中应用启动或停止的设备
    /// Detect devices of the cluster whose application started or stopped
    pub fn look_for_changes(&mut self, gateway: GatewayId, cluster: u8, status: &NetworkStatus) -> Result<()> {
        let state = self.groups.cluster_mut(gateway, cluster)?;
        for group in &mut state.groups {
            group.offered_traffic.changed = false;
        }
        let unactive: Vec<DeviceAddress> = state.unactive.iter().copied().collect();
        let members: Vec<DeviceAddress> = state
            .groups
            .iter()
            .flat_map(|group| group.devices.iter().map(|(address, _)| *address))
            .collect();

        let mut connected = 0usize;
        for address in unactive {
            if status.is_application_running(address)? {
                self.add_new_device(address)?;
                connected += 1;
            }
        }
        let mut disconnected = 0usize;
        for address in members {
            if !status.is_application_running(address)? {
                self.remove_disconnected(address)?;
                disconnected += 1;
            }
        }
        if connected + disconnected > 0 {
            debug!(gateway = %gateway, cluster, connected, disconnected, "Device set changed");
        }
        Ok(())
    }

    /// 对簇中每个数据速率分组执行一步搜索，并生成待下发的占空比
    /// Run one search step on every data-rate group of the cluster and produce
    /// the duty cycles to deliver
    pub fn start_reconfig(&mut self, now: SimTime, gateway: GatewayId, cluster: u8, status: &NetworkStatus) -> Result<()> {
        let target = self.target(cluster)?;
        let params = BisectionParams {
            epsilon: self.config.accepted_pdr_variance,
            tolerance: self.config.value_stagnation_tolerance,
            capacity_estimate: self.capacity_estimate(target),
        };
        let policy = self.config.allocation_policy;

        let state = self.groups.cluster_mut(gateway, cluster)?;
        debug!(gateway = %gateway, cluster, report = %state.congestion_report(), "Starting reconfiguration");
        for data_rate in 0..N_SF {
            let group = &mut state.groups[data_rate];
            if produce_config_scheme(group, &mut state.todo, target, &params, policy) {
                trim_configs(
                    &state.groups[data_rate],
                    &mut state.todo,
                    &mut state.disabled,
                    &mut self.devices,
                    status,
                )?;
            }
        }

        if let Some(path) = &self.config.output_config_file {
            save_config_to_file(&self.groups, path)?;
        }
        self.start_sampling(now, gateway, cluster)
    }

    /// 重置簇的采样计数器
    /// Reset the sampling counters of the cluster
    pub fn start_sampling(&mut self, now: SimTime, gateway: GatewayId, cluster: u8) -> Result<()> {
        self.groups.cluster_mut(gateway, cluster)?.restart_sampling(now);
        debug!(gateway = %gateway, cluster, now = ?now, "Starting sampling");
        Ok(())
    }

    /// 立即应用占空比分配，不经过回复下发
    /// Apply duty-cycle assignments right away, without going through replies
    pub fn fast_forward_config(&mut self, configs: &mut ConfigAssignments, status: &NetworkStatus) -> Result<()> {
        let mut assignments: Vec<(DeviceAddress, u8)> = configs.drain().collect();
        assignments.sort_unstable();
        for (address, duty_cycle) in assignments {
            if !is_legal_duty_cycle(duty_cycle) {
                return Err(Error::IllegalDutyCycle(duty_cycle));
            }
            let info = self.device_mut(address)?;
            info.duty_cycle = duty_cycle;
            let (gateway, cluster) = (info.best_gateway, info.cluster);
            if duty_cycle == DISABLED {
                self.groups.cluster_mut(gateway, cluster)?.disabled.insert(address);
            }
            status.set_aggregated_duty_cycle(address, duty_cycle_fraction(duty_cycle))?;
            trace!(device = %address, duty_cycle, "Fast-forwarded duty cycle");
        }
        Ok(())
    }

    /// 保存所有分组的搜索状态
    /// Save the search state of every group
    pub fn save_config(&self, path: &Path) -> Result<()> {
        save_config_to_file(&self.groups, path)
    }

    /// 从文件恢复搜索状态，并立即应用恢复后的上限
    /// Restore the search state from a file and apply the restored ceilings
    /// right away
    pub fn load_config(&mut self, path: &Path, status: &NetworkStatus) -> Result<()> {
        for saved in load_config_from_file(path)? {
            if !saved.started {
                continue;
            }
            let group = self.groups.group_mut(saved.gateway, saved.cluster, saved.data_rate)?;
            let ot = &mut group.offered_traffic;
            ot.started = true;
            ot.currbest = saved.currbest;
            ot.high = saved.high;
            ot.low = saved.low;
        }

        let policy = self.config.allocation_policy;
        let mut configs = ConfigAssignments::new();
        for (_, state) in self.groups.iter() {
            for group in state.groups.iter().filter(|g| g.offered_traffic.started) {
                allocator::optimize_duty_cycle(
                    policy,
                    &group.devices,
                    group.offered_traffic.currbest,
                    &mut configs,
                );
            }
        }
        info!(path = %path.display(), devices = configs.len(), "Applying saved configuration");
        self.fast_forward_config(&mut configs, status)
    }
}

/// 对一个分组执行一步搜索；产生新上限时把分配写入 `todo`
/// Run one search step on a group; when a new ceiling is produced the
/// allocation is written into `todo`
fn produce_config_scheme(
    group: &mut DataRateStatus,
    todo: &mut ConfigAssignments,
    target: f64,
    params: &BisectionParams,
    policy: AllocationPolicy,
) -> bool {
    if group.devices.is_empty() {
        return false;
    }
    let pdr = group.pdr();
    if !bisection_logic(&mut group.offered_traffic, pdr, target, params) {
        return false;
    }
    let ot = &group.offered_traffic;
    debug!(
        pdr,
        currbest = ot.currbest,
        low = ot.low,
        high = ot.high,
        changed = ot.changed,
        "New offered-traffic ceiling"
    );
    allocator::optimize_duty_cycle(policy, &group.devices, ot.currbest, todo);
    true
}

/// 删除与设备当前占空比相同的指令，并唤醒被完全禁用的设备
/// Drop instructions equal to the current duty cycle of the device, and wake
/// up fully disabled devices
///
/// A woken device is reset to unrestricted locally, its new instruction stays
/// pending.
fn trim_configs(
    group: &DataRateStatus,
    todo: &mut ConfigAssignments,
    disabled: &mut BTreeSet<DeviceAddress>,
    devices: &mut HashMap<DeviceAddress, DeviceInfo>,
    status: &NetworkStatus,
) -> Result<()> {
    for (address, _) in &group.devices {
        let Some(duty_cycle) = todo.get(address).copied() else {
            continue;
        };
        let info = devices.get_mut(address).ok_or(Error::UnknownDevice(*address))?;
        if duty_cycle == info.duty_cycle {
            todo.remove(address);
        } else if disabled.remove(address) {
            status.set_aggregated_duty_cycle(*address, 1.0)?;
            info.duty_cycle = UNRESTRICTED;
            debug!(device = %address, "Waking up disabled device");
        }
    }
    Ok(())
}

impl ControllerComponent for CongestionControlComponent {
    fn on_received_packet(&mut self, now: SimTime, packet: &Packet, status: &NetworkStatus) -> Result<()> {
        let address = packet.frame_header.address;
        let current = packet.frame_header.frame_counter;

        let mut previous = self.frame_counters.get(&address).copied().unwrap_or(0);
        if previous > i32::from(current) + FRAME_COUNTER_WRAP_TOLERANCE {
            previous -= 65_536;
        }
        if previous > i32::from(current) {
            warn!(device = %address, previous, current, "Frame counter decreased");
            return Err(Error::FrameCounterDecreased {
                device: address,
                previous,
                current,
            });
        }
        if previous == i32::from(current) {
            // Copy of an already counted frame.
            return Ok(());
        }
        self.frame_counters.insert(address, i32::from(current));

        if now < self.config.start_time {
            return Ok(());
        }
        if self.groups.is_empty() {
            self.initialize_data(status)?;
        }
        if !self.devices.contains_key(&address) {
            let info = self.describe_device(address, status)?;
            self.groups.create(info.best_gateway, info.cluster, now);
            self.devices.insert(address, info);
        }
        let (gateway, cluster, data_rate, active) = {
            let info = self.device_mut(address)?;
            (info.best_gateway, info.cluster, info.data_rate, info.active)
        };
        if !active {
            self.add_new_device(address)?;
        }

        let group = self.groups.group_mut(gateway, cluster, data_rate)?;
        group.received += 1;
        group.sent += u64::try_from(i32::from(current) - previous).unwrap_or(0);

        let state = self.groups.cluster(gateway, cluster)?;
        if !state.todo.is_empty() {
            return Ok(());
        }
        if now > state.sampling_start + self.config.sampling_duration {
            self.look_for_changes(gateway, cluster, status)?;
            self.start_reconfig(now, gateway, cluster, status)?;

            if self.fast {
                let state = self.groups.cluster_mut(gateway, cluster)?;
                if state.groups.iter().any(|g| g.offered_traffic.changed) {
                    info!(gateway = %gateway, cluster, "Device set changed, leaving fast convergence");
                    self.fast = false;
                    return Ok(());
                }
                let mut todo = std::mem::take(&mut state.todo);
                self.fast_forward_config(&mut todo, status)?;
            }
        }
        Ok(())
    }

    fn before_sending_reply(
        &mut self,
        now: SimTime,
        address: DeviceAddress,
        reply: &mut Reply,
        _status: &NetworkStatus,
    ) -> Result<()> {
        if self.groups.is_empty() {
            return Ok(());
        }
        let Some(info) = self.devices.get_mut(&address) else {
            return Ok(());
        };
        let (gateway, cluster) = (info.best_gateway, info.cluster);
        let state = self.groups.cluster_mut(gateway, cluster)?;
        let Some(duty_cycle) = state.todo.remove(&address) else {
            return Ok(());
        };
        if !is_legal_duty_cycle(duty_cycle) {
            return Err(Error::IllegalDutyCycle(duty_cycle));
        }

        info.duty_cycle = duty_cycle;
        if duty_cycle == DISABLED {
            state.disabled.insert(address);
        }
        let remaining = state.todo.len();
        debug!(device = %address, duty_cycle, remaining, "Sending DutyCycleReq");
        if remaining == 0 {
            self.start_sampling(now, gateway, cluster)?;
        }

        reply.frame_header.add_duty_cycle_req(duty_cycle);
        reply.set_message_type(MessageType::UnconfirmedDataDown);
        reply.needs_reply = true;
        Ok(())
    }

    fn on_failed_reply(&mut self, _now: SimTime, address: DeviceAddress, _status: &NetworkStatus) -> Result<()> {
        trace!(device = %address, "Reply could not be delivered");
        Ok(())
    }
}
