//! LoRa 物理层：扩频因子、空中时间、信噪比与网关接收路径仲裁
//! LoRa physical layer: spreading factors, airtime, SNR and the gateway
//! reception-path arbiter

pub mod gateway;
pub mod interference;
pub mod path;
pub mod trace;


pub use gateway::{GatewayPhy, GatewayPhyEvent, PhyTimer};
pub use interference::{InterferenceEvent, InterferenceHelper, IsolationMatrix};
pub use path::ReceptionPath;
pub use trace::{PacketTracker, PhyTrace, TraceRecord, TraceSink};

use crate::error::{Error, Result};
use std::fmt;
use std::time::Duration;

/// 网关接收机噪声系数（dB）
/// Noise figure of the gateway receiver, in dB
pub const NOISE_FIGURE_DB: f64 = 6.0;

/// LoRa 扩频因子
/// LoRa spreading factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpreadingFactor {
    Sf7 = 7,
    Sf8 = 8,
    Sf9 = 9,
    Sf10 = 10,
    Sf11 = 11,
    Sf12 = 12,
}

impl SpreadingFactor {
    pub const ALL: [SpreadingFactor; 6] = [
        Self::Sf7,
        Self::Sf8,
        Self::Sf9,
        Self::Sf10,
        Self::Sf11,
        Self::Sf12,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }

    /// 从 0 开始的索引（SF7 为 0）
    /// Zero-based index, SF7 being 0
    pub fn index(self) -> usize {
        usize::from(self.value() - 7)
    }

    /// 数据速率索引（`12 - SF`）
    /// Data rate index (`12 - SF`)
    pub fn data_rate(self) -> u8 {
        12 - self.value()
    }

    pub fn from_data_rate(data_rate: u8) -> Result<Self> {
        if data_rate > 5 {
            return Err(Error::InvalidSpreadingFactor(12u8.saturating_sub(data_rate)));
        }
        Self::try_from(12 - data_rate)
    }

    /// 网关在此扩频因子下的接收灵敏度（dBm）
    /// Gateway sensitivity at this spreading factor, in dBm
    pub fn gateway_sensitivity_dbm(self) -> f64 {
        const SENSITIVITY: [f64; 6] = [-126.5, -129.0, -131.5, -134.0, -136.5, -139.5];
        SENSITIVITY[self.index()]
    }
}

impl TryFrom<u8> for SpreadingFactor {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            7 => Ok(Self::Sf7),
            8 => Ok(Self::Sf8),
            9 => Ok(Self::Sf9),
            10 => Ok(Self::Sf10),
            11 => Ok(Self::Sf11),
            12 => Ok(Self::Sf12),
            other => Err(Error::InvalidSpreadingFactor(other)),
        }
    }
}

impl fmt::Display for SpreadingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SF{}", self.value())
    }
}

/// LoRa 传输参数
/// LoRa transmission parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoraTxParameters {
    pub spreading_factor: SpreadingFactor,
    /// Implicit header mode.
    pub header_disabled: bool,
    /// Coding rate `4/(4 + coding_rate)`, 1..=4.
    pub coding_rate: u8,
    pub bandwidth_hz: f64,
    pub preamble_symbols: u32,
    pub crc_enabled: bool,
    pub low_data_rate_optimization: bool,
}

impl Default for LoraTxParameters {
    fn default() -> Self {
        Self {
            spreading_factor: SpreadingFactor::Sf7,
            header_disabled: false,
            coding_rate: 1,
            bandwidth_hz: 125_000.0,
            preamble_symbols: 8,
            crc_enabled: true,
            low_data_rate_optimization: false,
        }
    }
}

impl LoraTxParameters {
    /// 使用指定扩频因子的默认参数，符号时间超过 16 ms 时启用低速率优化
    /// Default parameters at the given spreading factor, with low data rate
    /// optimization when the symbol time exceeds 16 ms
    pub fn for_spreading_factor(spreading_factor: SpreadingFactor) -> Self {
        let mut params = Self {
            spreading_factor,
            ..Self::default()
        };
        params.low_data_rate_optimization = symbol_time(&params) > Duration::from_millis(16);
        params
    }
}

/// 符号时间 `2^SF / BW`
/// Symbol time `2^SF / BW`
pub fn symbol_time(params: &LoraTxParameters) -> Duration {
    let sf = i32::from(params.spreading_factor.value());
    Duration::from_secs_f64(2f64.powi(sf) / params.bandwidth_hz)
}

/// 计算给定长度负载的空中时间
/// Compute the time on air of a payload of the given length
pub fn time_on_air(payload_bytes: usize, params: &LoraTxParameters) -> Duration {
    let sf = f64::from(params.spreading_factor.value());
    let tsym = 2f64.powf(sf) / params.bandwidth_hz;
    let preamble = (f64::from(params.preamble_symbols) + 4.25) * tsym;

    let crc = if params.crc_enabled { 1.0 } else { 0.0 };
    let header = if params.header_disabled { 1.0 } else { 0.0 };
    let de = if params.low_data_rate_optimization { 1.0 } else { 0.0 };

    let numerator = 8.0 * payload_bytes as f64 - 4.0 * sf + 28.0 + 16.0 * crc - 20.0 * header;
    let denominator = 4.0 * (sf - 2.0 * de);
    let payload_symbols = 8.0
        + ((numerator / denominator).ceil() * (f64::from(params.coding_rate) + 4.0)).max(0.0);

    Duration::from_secs_f64(preamble + payload_symbols * tsym)
}

/// 将接收功率转换为信噪比
/// Convert a receive power into a signal-to-noise ratio
pub fn rx_power_to_snr(rx_power_dbm: f64, bandwidth_hz: f64) -> f64 {
    rx_power_dbm + 174.0 - 10.0 * bandwidth_hz.log10() - NOISE_FIGURE_DB
}
