//! 仿真中流转的 LoRaWAN 数据包
//! LoRaWAN packets flowing through the simulation
//!
//! Frames are never serialized: the headers the network server reads are kept
//! as typed fields next to the opaque application payload.
//!
//! 帧从不序列化：网络服务器读取的头部以类型化字段保存在应用负载旁边。

use crate::network::status::DeviceAddress;
use crate::timer::SimTime;
use bytes::Bytes;

/// MAC 头、帧头、FPort 和 MIC 的总长度（不含 MAC 命令）
/// Length of MAC header, frame header, FPort and MIC (no MAC commands)
pub const HEADER_OVERHEAD_BYTES: usize = 13;

/// 数据包唯一标识符
/// Unique packet identifier
pub type PacketUid = u64;

/// LoRaWAN 消息类型
/// LoRaWAN message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    UnconfirmedDataUp,
    ConfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataDown,
}

impl MessageType {
    pub fn is_uplink(self) -> bool {
        matches!(self, Self::UnconfirmedDataUp | Self::ConfirmedDataUp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacHeader {
    pub message_type: MessageType,
}

/// MAC 命令。只建模拥塞控制使用的命令。
/// MAC command. Only the commands used by congestion control are modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacCommand {
    /// Limits the aggregated duty cycle of the device to `1/2^max_duty_cycle`.
    /// `255` disables the device.
    DutyCycleReq { max_duty_cycle: u8 },
    DutyCycleAns,
}

impl MacCommand {
    /// 命令在帧中占用的字节数（含 CID）
    /// Bytes taken by the command in a frame, CID included
    pub fn serialized_size(&self) -> usize {
        match self {
            Self::DutyCycleReq { .. } => 2,
            Self::DutyCycleAns => 1,
        }
    }
}

/// 帧头中控制器读取的字段
/// Frame header fields read by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub address: DeviceAddress,
    pub frame_counter: u16,
    pub commands: Vec<MacCommand>,
}

impl FrameHeader {
    pub fn new(address: DeviceAddress, frame_counter: u16) -> Self {
        Self {
            address,
            frame_counter,
            commands: Vec::new(),
        }
    }

    pub fn add_duty_cycle_req(&mut self, max_duty_cycle: u8) {
        self.commands.push(MacCommand::DutyCycleReq { max_duty_cycle });
    }

    /// Acknowledge a DutyCycleReq received in a downlink.
    pub fn add_duty_cycle_ans(&mut self) {
        self.commands.push(MacCommand::DutyCycleAns);
    }

    pub fn has_duty_cycle_ans(&self) -> bool {
        self.commands.contains(&MacCommand::DutyCycleAns)
    }

    /// 帧头携带的最后一个 DutyCycleReq
    /// Last DutyCycleReq carried by the header
    pub fn duty_cycle_req(&self) -> Option<u8> {
        self.commands.iter().rev().find_map(|command| match command {
            MacCommand::DutyCycleReq { max_duty_cycle } => Some(*max_duty_cycle),
            _ => None,
        })
    }
}

/// 物理层附加在数据包上的标签
/// Tag attached to packets by the physical layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoraTag {
    pub spreading_factor: u8,
    /// SF of the signal that destroyed the packet, `0` if it survived.
    pub destroyed_by: u8,
    pub receive_power_dbm: f64,
    pub tx_power_dbm: f64,
    pub frequency_hz: f64,
    pub snr_db: f64,
    pub data_rate: u8,
    pub reception_time: Option<SimTime>,
}

/// 数据包引用。克隆开销很小（负载为 `Bytes`）。
/// Packet reference. Cloning is cheap (the payload is `Bytes`).
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub uid: PacketUid,
    pub payload: Bytes,
    pub mac_header: MacHeader,
    pub frame_header: FrameHeader,
    pub tag: LoraTag,
}

impl Packet {
    /// 构造一个未确认上行数据包
    /// Build an unconfirmed uplink data packet
    pub fn uplink(uid: PacketUid, address: DeviceAddress, frame_counter: u16, payload: Bytes) -> Self {
        Self {
            uid,
            payload,
            mac_header: MacHeader {
                message_type: MessageType::UnconfirmedDataUp,
            },
            frame_header: FrameHeader::new(address, frame_counter),
            tag: LoraTag::default(),
        }
    }

    pub fn is_uplink(&self) -> bool {
        self.mac_header.message_type.is_uplink()
    }

    /// 在空中传输的总字节数
    /// Total number of bytes sent over the air
    pub fn size(&self) -> usize {
        let commands: usize = self
            .frame_header
            .commands
            .iter()
            .map(MacCommand::serialized_size)
            .sum();
        HEADER_OVERHEAD_BYTES + self.payload.len() + commands
    }
}
