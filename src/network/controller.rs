//! 定义了可插拔的网络控制器组件接口。
//! Defines the pluggable network controller component interface.

use super::status::{DeviceAddress, NetworkStatus};
use crate::error::Result;
use crate::packet::{FrameHeader, MacHeader, MessageType, Packet};
use crate::timer::SimTime;
use bytes::Bytes;
use tracing::trace;

/// 为设备准备的下行回复
/// Downlink reply prepared for a device
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub mac_header: MacHeader,
    pub frame_header: FrameHeader,
    pub payload: Bytes,
    /// Whether a downlink must actually be sent in the next receive window.
    pub needs_reply: bool,
}

impl Reply {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            mac_header: MacHeader {
                message_type: MessageType::UnconfirmedDataDown,
            },
            frame_header: FrameHeader::new(address, 0),
            payload: Bytes::new(),
            needs_reply: false,
        }
    }

    pub fn set_message_type(&mut self, message_type: MessageType) {
        self.mac_header.message_type = message_type;
    }
}

/// A trait for network controller components.
///
/// 网络控制器组件的 trait。
///
/// Components see every copy of an uplink, one per receiving gateway, and are
/// asked to amend the reply right before it goes out. An `Err` stops the
/// simulation run.
pub trait ControllerComponent: Send + 'static {
    /// Called when a packet reaches the network server.
    ///
    /// 当数据包到达网络服务器时调用。
    fn on_received_packet(&mut self, now: SimTime, packet: &Packet, status: &NetworkStatus) -> Result<()>;

    /// Called when a receive window of the device opens, before the reply is sent.
    ///
    /// 当设备的接收窗口打开、回复发送之前调用。
    fn before_sending_reply(
        &mut self,
        now: SimTime,
        address: DeviceAddress,
        reply: &mut Reply,
        status: &NetworkStatus,
    ) -> Result<()>;

    /// Called when no reply could be delivered to the device.
    ///
    /// 当无法向设备发送回复时调用。
    fn on_failed_reply(&mut self, _now: SimTime, _address: DeviceAddress, _status: &NetworkStatus) -> Result<()> {
        Ok(())
    }
}

/// 按安装顺序调用组件的流水线
/// Pipeline calling components in installation order
#[derive(Default)]
pub struct NetworkController {
    components: Vec<Box<dyn ControllerComponent>>,
}

impl NetworkController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, component: Box<dyn ControllerComponent>) {
        self.components.push(component);
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn on_new_packet(&mut self, now: SimTime, packet: &Packet, status: &NetworkStatus) -> Result<()> {
        trace!(uid = packet.uid, "Controller received packet");
        for component in &mut self.components {
            component.on_received_packet(now, packet, status)?;
        }
        Ok(())
    }

    pub fn before_sending_reply(
        &mut self,
        now: SimTime,
        address: DeviceAddress,
        reply: &mut Reply,
        status: &NetworkStatus,
    ) -> Result<()> {
        for component in &mut self.components {
            component.before_sending_reply(now, address, reply, status)?;
        }
        Ok(())
    }

    pub fn failed_reply(&mut self, now: SimTime, address: DeviceAddress, status: &NetworkStatus) -> Result<()> {
        for component in &mut self.components {
            component.on_failed_reply(now, address, status)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for NetworkController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkController")
            .field("components", &self.components.len())
            .finish()
    }
}
