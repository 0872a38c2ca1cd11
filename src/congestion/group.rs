//! 拥塞控制分组状态
//! Congestion-control group state
//!
//! State is organized as gateway × cluster × data rate. A (gateway, cluster)
//! entry is created once, at controller initialization, with one slot per
//! data rate. Looking up anything that was never created is an error.
//!
//! 状态按 网关 × 簇 × 数据速率 组织。

use crate::error::{Error, Result};
use crate::network::status::{DeviceAddress, GatewayId};
use crate::timer::SimTime;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;

/// 支持的扩频因子数量（每个簇的数据速率槽位数）
/// Number of supported spreading factors (data-rate slots per cluster)
pub const N_SF: usize = 6;

/// 待下发的占空比指令，按设备地址索引
/// Pending duty-cycle instructions, keyed by device address
pub type ConfigAssignments = HashMap<DeviceAddress, u8>;

/// 提供流量上的二分搜索状态
/// Bisection search state over offered traffic
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OffTraffic {
    pub started: bool,
    /// The device set of the group changed since the search started.
    pub changed: bool,
    pub currbest: f64,
    pub low: f64,
    pub high: f64,
}

/// 一个（网关、簇、数据速率）分组的拥塞状态
/// Congestion state of one (gateway, cluster, data rate) group
#[derive(Debug, Clone, Default)]
pub struct DataRateStatus {
    /// Active devices with their offered-traffic ceiling.
    pub devices: Vec<(DeviceAddress, f64)>,
    pub sent: u64,
    pub received: u64,
    pub offered_traffic: OffTraffic,
}

impl DataRateStatus {
    /// 重置采样计数器
    /// Reset the sampling counters
    pub fn reset(&mut self) {
        self.sent = 0;
        self.received = 0;
    }

    /// 采样窗口的包投递率，没有流量时为 `1.0`
    /// Delivery ratio of the sampling window, `1.0` without traffic
    pub fn pdr(&self) -> f64 {
        if self.sent > 0 {
            self.received as f64 / self.sent as f64
        } else {
            1.0
        }
    }

    /// 分组中设备提供流量上限之和
    /// Sum of the offered-traffic ceilings of the group devices
    pub fn max_total(&self) -> f64 {
        self.devices.iter().map(|(_, traffic)| traffic).sum()
    }
}

/// 一个（网关、簇）的状态
/// State of one (gateway, cluster)
#[derive(Debug, Clone)]
pub struct ClusterState {
    /// One group per data rate, indexed by data rate.
    pub groups: [DataRateStatus; N_SF],
    pub todo: ConfigAssignments,
    /// Devices currently fully disabled.
    pub disabled: BTreeSet<DeviceAddress>,
    /// Devices whose application is not running.
    pub unactive: BTreeSet<DeviceAddress>,
    pub sampling_start: SimTime,
}

impl ClusterState {
    fn new(sampling_start: SimTime) -> Self {
        Self {
            groups: Default::default(),
            todo: ConfigAssignments::new(),
            disabled: BTreeSet::new(),
            unactive: BTreeSet::new(),
            sampling_start,
        }
    }

    /// 重置所有分组的计数器并重新开始采样
    /// Reset the counters of every group and restart sampling
    pub fn restart_sampling(&mut self, now: SimTime) {
        for group in &mut self.groups {
            group.reset();
        }
        self.sampling_start = now;
    }

    /// 报告每个 SF 的 PDR（无流量为 `-1`），从 SF7 开始
    /// Report the PDR of every SF (`-1` without traffic), SF7 first
    pub fn congestion_report(&self) -> String {
        let mut report = String::new();
        let (mut total_sent, mut total_received) = (0u64, 0u64);
        for (data_rate, group) in self.groups.iter().enumerate().rev() {
            total_sent += group.sent;
            total_received += group.received;
            let pdr = if group.sent > 0 { group.pdr() } else { -1.0 };
            let _ = write!(report, "SF{} {:.4}, ", 12 - data_rate, pdr);
        }
        let all = if total_sent > 0 {
            total_received as f64 / total_sent as f64
        } else {
            -1.0
        };
        let _ = write!(report, "All {all:.4}");
        report
    }
}

/// 显式创建的三级分组表
/// Explicitly created three-level group table
#[derive(Debug, Clone, Default)]
pub struct GroupTable {
    clusters: BTreeMap<(GatewayId, u8), ClusterState>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建一个（网关、簇）条目。已存在的条目保持不变。
    /// Create a (gateway, cluster) entry. An existing entry is left untouched.
    pub fn create(&mut self, gateway: GatewayId, cluster: u8, sampling_start: SimTime) {
        self.clusters
            .entry((gateway, cluster))
            .or_insert_with(|| ClusterState::new(sampling_start));
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn cluster(&self, gateway: GatewayId, cluster: u8) -> Result<&ClusterState> {
        self.clusters
            .get(&(gateway, cluster))
            .ok_or(Error::UnknownGroup {
                gateway,
                cluster,
                data_rate: 0,
            })
    }

    pub fn cluster_mut(&mut self, gateway: GatewayId, cluster: u8) -> Result<&mut ClusterState> {
        self.clusters
            .get_mut(&(gateway, cluster))
            .ok_or(Error::UnknownGroup {
                gateway,
                cluster,
                data_rate: 0,
            })
    }

    pub fn group(&self, gateway: GatewayId, cluster: u8, data_rate: u8) -> Result<&DataRateStatus> {
        self.cluster(gateway, cluster)?
            .groups
            .get(usize::from(data_rate))
            .ok_or(Error::UnknownGroup {
                gateway,
                cluster,
                data_rate,
            })
    }

    pub fn group_mut(
        &mut self,
        gateway: GatewayId,
        cluster: u8,
        data_rate: u8,
    ) -> Result<&mut DataRateStatus> {
        self.cluster_mut(gateway, cluster)?
            .groups
            .get_mut(usize::from(data_rate))
            .ok_or(Error::UnknownGroup {
                gateway,
                cluster,
                data_rate,
            })
    }

    /// 按（网关、簇）顺序遍历
    /// Iterate in (gateway, cluster) order
    pub fn iter(&self) -> impl Iterator<Item = (&(GatewayId, u8), &ClusterState)> {
        self.clusters.iter()
    }
}
