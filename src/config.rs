//! 定义了仿真各层的可配置参数。
//! Defines configurable parameters for every layer of the simulation.

use crate::allocator::AllocationPolicy;
use crate::error::{Error, Result};
use crate::phy::interference::IsolationMatrix;
use std::path::PathBuf;
use std::time::Duration;

/// A structure containing all configurable parameters of a simulation run.
///
/// 包含一次仿真运行所有可配置参数的结构体。
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Gateway physical-layer parameters.
    /// 网关物理层参数。
    pub phy: PhyConfig,

    /// Congestion control-related parameters.
    /// 拥塞控制相关参数。
    pub congestion_control: CongestionControlConfig,

    /// Network server parameters.
    /// 网络服务器参数。
    pub network: NetworkServerConfig,

    /// Parameters of the composed simulation (radio environment, RNG).
    /// 组合仿真的参数（无线环境、随机数）。
    pub simulation: SimulationConfig,
}

/// Gateway physical-layer parameters.
///
/// 网关物理层参数。
#[derive(Debug, Clone)]
pub struct PhyConfig {
    /// Number of parallel reception paths (demodulators) of a gateway.
    /// 网关并行接收路径（解调器）的数量。
    pub reception_paths: usize,
    /// Signal-to-interference isolation matrix used on collisions.
    /// 碰撞时使用的信干比隔离矩阵。
    pub isolation_matrix: IsolationMatrix,
    /// Events that ended more than this long ago are purged from the
    /// interference accounting.
    pub old_event_threshold: Duration,
    /// Purging only runs once more than this many events are stored.
    pub event_cleanup_threshold: usize,
}

/// Congestion control-related parameters.
///
/// 拥塞控制相关参数。
#[derive(Debug, Clone)]
pub struct CongestionControlConfig {
    /// Virtual time at which the controller starts acting on uplinks.
    /// 控制器开始处理上行链路的虚拟时间。
    pub start_time: Duration,
    /// Duration of the post-configuration PDR sampling period.
    /// 配置后PDR采样周期的持续时间。
    pub sampling_duration: Duration,
    /// Acceptable distance from the target PDR value (epsilon).
    /// 与目标PDR值的可接受距离。
    pub accepted_pdr_variance: f64,
    /// Minimum half-width of the offered-traffic search interval below which
    /// the search is declared stagnant.
    /// 判定搜索停滞的最小区间半宽。
    pub value_stagnation_tolerance: f64,
    /// Target PDR of each cluster. The number of clusters is the length of this list.
    /// 每个簇的目标PDR。簇的数量等于该列表长度。
    pub targets: Vec<f64>,
    /// Saved search state to warm-start from.
    pub input_config_file: Option<PathBuf>,
    /// Where to save the search state after each reconfiguration.
    pub output_config_file: Option<PathBuf>,
    /// Apply computed configurations immediately instead of waiting for
    /// downlink delivery, until the first device-set change is seen.
    /// 立即应用计算出的配置，直到首次检测到设备集合变化。
    pub fast_converge: bool,
    /// Number of channels the capacity model is scaled by.
    pub channels: u32,
    /// Scaling factor applied to the analytical capacity estimate.
    pub capacity_scale: f64,
    /// Upper bound of a single device's offered traffic.
    /// 单个设备提供流量的上限。
    pub max_offered_traffic: f64,
    /// How the aggregate ceiling is shared between devices.
    pub allocation_policy: AllocationPolicy,
}

/// Network server parameters.
///
/// 网络服务器参数。
#[derive(Debug, Clone)]
pub struct NetworkServerConfig {
    /// Delay between the end of an uplink and the first receive window.
    /// 上行结束到第一个接收窗口的延迟。
    pub rx1_delay: Duration,
}

/// Parameters of the composed simulation.
///
/// 组合仿真的参数。
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Base seed of the random number generator.
    /// 随机数生成器的基础种子。
    pub seed: u64,
    /// Run identifier, combined with `seed` so independent runs differ.
    /// 运行标识符，与 `seed` 组合使各次运行相互独立。
    pub run: u64,
    /// Uplink channel center frequencies, in Hz.
    pub channels_hz: Vec<f64>,
    /// Transmission power of end devices and gateways, in dBm.
    pub tx_power_dbm: f64,
    /// Radio propagation model.
    pub path_loss: PathLossConfig,
}

/// Log-distance propagation loss parameters.
#[derive(Debug, Clone)]
pub struct PathLossConfig {
    pub exponent: f64,
    pub reference_loss_db: f64,
    pub reference_distance_m: f64,
}

impl Config {
    /// Checks that every value is inside its accepted range.
    ///
    /// 检查每个值是否在允许范围内。
    pub fn validate(&self) -> Result<()> {
        if self.phy.reception_paths == 0 {
            return Err(Error::InvalidConfig(
                "a gateway needs at least one reception path".into(),
            ));
        }
        let cc = &self.congestion_control;
        if cc.sampling_duration < Duration::from_secs(5) {
            return Err(Error::InvalidConfig(format!(
                "sampling duration {:?} is shorter than 5s",
                cc.sampling_duration
            )));
        }
        if cc.accepted_pdr_variance < 0.0 || cc.value_stagnation_tolerance < 0.0 {
            return Err(Error::InvalidConfig(
                "PDR variance and stagnation tolerance must be non-negative".into(),
            ));
        }
        if cc.targets.is_empty() || cc.targets.len() > usize::from(u8::MAX) {
            return Err(Error::InvalidConfig(format!(
                "{} cluster targets configured",
                cc.targets.len()
            )));
        }
        if let Some(t) = cc.targets.iter().find(|t| !(0.0..=1.0).contains(*t)) {
            return Err(Error::InvalidConfig(format!("target PDR {t} outside [0, 1]")));
        }
        if cc.channels == 0 || cc.capacity_scale <= 0.0 || cc.max_offered_traffic <= 0.0 {
            return Err(Error::InvalidConfig(
                "capacity model parameters must be positive".into(),
            ));
        }
        if self.simulation.channels_hz.is_empty() {
            return Err(Error::InvalidConfig("no uplink channel configured".into()));
        }
        Ok(())
    }
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self {
            reception_paths: 8,
            isolation_matrix: IsolationMatrix::Croce,
            old_event_threshold: Duration::from_secs(2),
            event_cleanup_threshold: 100,
        }
    }
}

impl Default for CongestionControlConfig {
    fn default() -> Self {
        Self {
            start_time: Duration::ZERO,
            sampling_duration: Duration::from_secs(2 * 3600),
            accepted_pdr_variance: 0.01,
            value_stagnation_tolerance: 0.001,
            targets: vec![0.95],
            input_config_file: None,
            output_config_file: None,
            fast_converge: false,
            channels: 1,
            capacity_scale: 16.0,
            max_offered_traffic: 0.01,
            allocation_policy: AllocationPolicy::MaxMin,
        }
    }
}

impl Default for NetworkServerConfig {
    fn default() -> Self {
        Self {
            rx1_delay: Duration::from_secs(1),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            run: 1,
            channels_hz: vec![868_100_000.0, 868_300_000.0, 868_500_000.0],
            tx_power_dbm: 14.0,
            path_loss: PathLossConfig::default(),
        }
    }
}

impl Default for PathLossConfig {
    fn default() -> Self {
        Self {
            exponent: 3.76,
            reference_loss_db: 7.7,
            reference_distance_m: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.phy.reception_paths, 8);
        assert_eq!(config.congestion_control.targets, vec![0.95]);
        assert_eq!(
            config.congestion_control.sampling_duration,
            Duration::from_secs(7200)
        );
    }

    #[test]
    fn test_short_sampling_rejected() {
        let mut config = Config::default();
        config.congestion_control.sampling_duration = Duration::from_secs(4);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_target_out_of_range_rejected() {
        let mut config = Config::default();
        config.congestion_control.targets = vec![0.9, 1.2];
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
