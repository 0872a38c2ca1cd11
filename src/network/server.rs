//! 网络服务器外壳
//! Network server shell
//!
//! Every uplink copy updates the registry and goes through the controller
//! pipeline. The first copy of a frame also asks the host to open the first
//! receive window `rx1_delay` later. When the window opens the reply is handed
//! to the controller components and, if one of them asked for it, sent through
//! the best available gateway.
//!
//! 每个上行副本都会更新注册表并经过控制器流水线。

use super::controller::{NetworkController, Reply};
use super::status::{DeviceAddress, GatewayId, NetworkStatus};
use crate::config::NetworkServerConfig;
use crate::error::{Error, Result};
use crate::packet::{Packet, PacketUid};
use crate::timer::SimTime;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Downlink uids live above uplink uids.
const DOWNLINK_UID_BASE: PacketUid = 1 << 48;

/// 请求宿主在 `delay` 之后打开接收窗口
/// Request to the host to open a receive window after `delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveWindowRequest {
    pub address: DeviceAddress,
    pub window: u8,
    pub delay: Duration,
}

/// 通过网关发送的下行数据包
/// Downlink packet sent through a gateway
#[derive(Debug, Clone)]
pub struct Downlink {
    pub address: DeviceAddress,
    pub gateway: GatewayId,
    pub packet: Packet,
    /// Data rate of the uplink the reply answers (RX1 offset 0).
    pub data_rate: u8,
    pub frequency_hz: f64,
}

/// 接收窗口打开后的结果
/// Outcome of an opened receive window
#[derive(Debug, Clone)]
pub enum WindowOutcome {
    /// A reply must be sent now.
    Reply(Downlink),
    /// No gateway was available, try again in the next window.
    Retry(ReceiveWindowRequest),
    /// Nothing to send.
    NoReply,
    /// No gateway in either window, the reply was dropped.
    GaveUp,
}

#[derive(Debug)]
struct PendingReply {
    reply: Reply,
    data_rate: u8,
    frequency_hz: f64,
}

/// 网络服务器
/// Network server
#[derive(Debug)]
pub struct NetworkServer {
    config: NetworkServerConfig,
    status: Arc<NetworkStatus>,
    controller: NetworkController,
    pending: HashMap<DeviceAddress, PendingReply>,
    next_downlink_uid: PacketUid,
}

impl NetworkServer {
    pub fn new(config: NetworkServerConfig, status: Arc<NetworkStatus>) -> Self {
        Self {
            config,
            status,
            controller: NetworkController::new(),
            pending: HashMap::new(),
            next_downlink_uid: DOWNLINK_UID_BASE,
        }
    }

    pub fn status(&self) -> &Arc<NetworkStatus> {
        &self.status
    }

    pub fn controller_mut(&mut self) -> &mut NetworkController {
        &mut self.controller
    }

    /// 处理网关转发的上行数据包
    /// Handle an uplink forwarded by a gateway
    pub fn receive(
        &mut self,
        now: SimTime,
        packet: &Packet,
        gateway: GatewayId,
    ) -> Result<Option<ReceiveWindowRequest>> {
        let address = packet.frame_header.address;
        if !self.status.contains_device(address) {
            return Err(Error::UnknownDevice(address));
        }
        trace!(
            device = %address,
            gateway = %gateway,
            fcnt = packet.frame_header.frame_counter,
            "Uplink received"
        );

        let request = if self.pending.contains_key(&address) {
            None
        } else {
            self.pending.insert(
                address,
                PendingReply {
                    reply: Reply::new(address),
                    data_rate: packet.tag.data_rate,
                    frequency_hz: packet.tag.frequency_hz,
                },
            );
            Some(ReceiveWindowRequest {
                address,
                window: 1,
                delay: self.config.rx1_delay,
            })
        };

        self.status.record_uplink(
            address,
            packet.frame_header.frame_counter,
            now,
            gateway,
            packet.tag.receive_power_dbm,
        )?;
        self.controller.on_new_packet(now, packet, &self.status)?;
        Ok(request)
    }

    /// 打开设备的接收窗口
    /// Open a receive window of the device
    ///
    /// `is_available` tells whether a gateway can transmit right now.
    pub fn open_receive_window(
        &mut self,
        now: SimTime,
        address: DeviceAddress,
        window: u8,
        is_available: impl Fn(GatewayId) -> bool,
    ) -> Result<WindowOutcome> {
        let record = self.status.end_device(address)?;
        let best = record
            .last_gateways
            .iter()
            .filter(|(id, _)| is_available(*id))
            .fold(None, |best: Option<(GatewayId, f64)>, (id, power)| match best {
                Some((_, p)) if p >= *power => best,
                _ => Some((*id, *power)),
            });

        let Some((gateway, _)) = best else {
            if window == 1 {
                debug!(device = %address, "No suitable gateway found for first window");
                return Ok(WindowOutcome::Retry(ReceiveWindowRequest {
                    address,
                    window: 2,
                    delay: Duration::from_secs(1),
                }));
            }
            debug!(device = %address, "Giving up on reply: no suitable gateway in the second window");
            self.pending.remove(&address);
            self.controller.failed_reply(now, address, &self.status)?;
            return Ok(WindowOutcome::GaveUp);
        };

        let Some(mut pending) = self.pending.remove(&address) else {
            return Ok(WindowOutcome::NoReply);
        };
        self.controller
            .before_sending_reply(now, address, &mut pending.reply, &self.status)?;
        if !pending.reply.needs_reply {
            return Ok(WindowOutcome::NoReply);
        }

        let uid = self.next_downlink_uid;
        self.next_downlink_uid += 1;
        let reply = pending.reply;
        let packet = Packet {
            uid,
            payload: reply.payload,
            mac_header: reply.mac_header,
            frame_header: reply.frame_header,
            tag: Default::default(),
        };
        info!(device = %address, gateway = %gateway, window, "A reply is needed");
        Ok(WindowOutcome::Reply(Downlink {
            address,
            gateway,
            packet,
            data_rate: pending.data_rate,
            frequency_hz: pending.frequency_hz,
        }))
    }
}
