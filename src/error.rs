//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.
//!
//! Physical-layer drops (under sensitivity, no demodulator, interference,
//! reception while transmitting) are modeled outcomes, not errors, and never
//! show up here. Everything below terminates a simulation run.

use crate::network::status::{DeviceAddress, GatewayId};
use std::path::PathBuf;
use thiserror::Error;

/// The primary error type for the simulation library.
/// 仿真库的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// A device reported a frame counter lower than the last one seen, beyond
    /// the 16-bit wraparound tolerance. Rejoins are not modeled.
    /// 设备的帧计数器减小（超出16位回绕容差）。
    #[error("frame counter of device {device} decreased from {previous} to {current}")]
    FrameCounterDecreased {
        device: DeviceAddress,
        previous: i32,
        current: u16,
    },

    /// The congestion configuration file could not be opened, read or written.
    /// 无法打开、读取或写入拥塞配置文件。
    #[error("configuration file {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line of the congestion configuration file could not be parsed.
    /// 拥塞配置文件中的某一行无法解析。
    #[error("malformed line {line} in configuration file {path}: {reason}")]
    MalformedConfigLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A (gateway, cluster, data rate) group was addressed before being created.
    /// 在创建之前访问了某个（网关、簇、数据速率）组。
    #[error("no congestion group for gateway {gateway}, cluster {cluster}, data rate {data_rate}")]
    UnknownGroup {
        gateway: GatewayId,
        cluster: u8,
        data_rate: u8,
    },

    /// The device is not registered in the network status.
    /// 设备未在网络状态中注册。
    #[error("unknown end device {0}")]
    UnknownDevice(DeviceAddress),

    /// The gateway is not registered in the network status.
    #[error("unknown gateway {0}")]
    UnknownGateway(GatewayId),

    /// A node expected to carry a LoRaWAN MAC layer has none.
    /// 预期具有LoRaWAN MAC层的节点没有MAC层。
    #[error("node of device {0} has no LoRaWAN MAC layer")]
    MissingMac(DeviceAddress),

    /// Spreading factors outside 7..=12 are not supported.
    #[error("invalid spreading factor {0}")]
    InvalidSpreadingFactor(u8),

    /// A duty-cycle exponent outside `{0} ∪ [7, 15] ∪ {255}` was produced or requested.
    /// 产生或请求了非法的占空比指数。
    #[error("illegal duty-cycle exponent {0}")]
    IllegalDutyCycle(u8),

    /// A configuration value is out of its accepted range.
    /// 配置值超出允许范围。
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A call to a network-server backend failed.
    /// 对网络服务器后端的调用失败。
    #[error("backend error: {0}")]
    Backend(String),

    /// An internal channel for communication between tasks was closed unexpectedly.
    /// 用于任务间通信的内部通道意外关闭。
    #[error("Internal channel is broken")]
    ChannelClosed,
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;
