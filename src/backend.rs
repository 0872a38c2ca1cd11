//! 外部网络服务器后端镜像
//! External network-server backend mirror
//!
//! An external LoRaWAN network server (ChirpStack, The Things Stack) can mirror
//! the simulated network. Every registration in [`NetworkStatus`] is forwarded
//! to a [`NetworkServerBackend`] by a dedicated actor task, so the synchronous
//! simulation core never waits on the backend.
//!
//! 注册表中的每一次注册都由专门的 actor 任务转发给后端，仿真核心不会等待后端。
//!
//! [`NetworkStatus`]: crate::network::status::NetworkStatus

use crate::error::{Error, Result};
use crate::network::status::{DeviceAddress, EndDeviceStatus, GatewayId, GatewayStatus, RegistryEvent};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// An external network server the simulated network is mirrored to.
///
/// 仿真网络所镜像到的外部网络服务器。
#[async_trait]
pub trait NetworkServerBackend: Send + Sync + 'static {
    /// Opens the session and creates the tenant, device profile and application.
    /// 打开会话并创建租户、设备配置和应用。
    async fn connect(&self) -> Result<()>;

    /// Registers a gateway.
    async fn create_gateway(&self, gateway: &GatewayStatus) -> Result<()>;

    /// Registers an end device with its session keys.
    async fn create_device(&self, device: &EndDeviceStatus) -> Result<()>;

    /// Removes everything created by this session.
    /// 删除本次会话创建的所有内容。
    async fn close(&self) -> Result<()>;
}

/// 记录所有调用的内存后端
/// In-memory backend recording every call
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    connected: AtomicBool,
    gateways: DashMap<GatewayId, GatewayStatus>,
    devices: DashMap<DeviceAddress, EndDeviceStatus>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn gateway_count(&self) -> usize {
        self.gateways.len()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn has_device(&self, address: DeviceAddress) -> bool {
        self.devices.contains_key(&address)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::Backend("not connected".into()))
        }
    }
}

#[async_trait]
impl NetworkServerBackend for InMemoryBackend {
    async fn connect(&self) -> Result<()> {
        if self.connected.swap(true, Ordering::AcqRel) {
            return Err(Error::Backend("already connected".into()));
        }
        Ok(())
    }

    async fn create_gateway(&self, gateway: &GatewayStatus) -> Result<()> {
        self.ensure_connected()?;
        if self.gateways.contains_key(&gateway.id) {
            return Err(Error::Backend(format!("gateway {} already exists", gateway.id)));
        }
        self.gateways.insert(gateway.id, gateway.clone());
        Ok(())
    }

    async fn create_device(&self, device: &EndDeviceStatus) -> Result<()> {
        self.ensure_connected()?;
        if self.devices.contains_key(&device.address) {
            return Err(Error::Backend(format!("device {} already exists", device.address)));
        }
        self.devices.insert(device.address, device.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.ensure_connected()?;
        self.gateways.clear();
        self.devices.clear();
        self.connected.store(false, Ordering::Release);
        Ok(())
    }
}

/// 镜像统计信息
/// Mirror statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub gateways: usize,
    pub devices: usize,
    /// Registrations the backend rejected.
    pub failures: usize,
}

/// 镜像 actor 命令
/// Mirror actor commands
#[derive(Debug)]
pub enum MirrorCommand {
    /// 获取统计信息（在已排队的注册之后）
    /// Get statistics, after the already queued registrations
    GetStats {
        response_tx: oneshot::Sender<MirrorStats>,
    },
    /// 关闭后端会话并停止 actor
    /// Close the backend session and stop the actor
    Shutdown {
        response_tx: oneshot::Sender<Result<MirrorStats>>,
    },
}

struct RegistryMirror<B: NetworkServerBackend> {
    backend: Arc<B>,
    stats: MirrorStats,
}

impl<B: NetworkServerBackend> RegistryMirror<B> {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<RegistryEvent>,
        mut command_rx: mpsc::Receiver<MirrorCommand>,
    ) {
        let connected = match self.backend.connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Backend connection failed, registrations will not be mirrored");
                false
            }
        };
        let mut events_open = true;

        loop {
            tokio::select! {
                biased;

                event = events.recv(), if events_open => match event {
                    Some(event) if connected => self.register(event).await,
                    Some(_) => self.stats.failures += 1,
                    None => events_open = false,
                },
                command = command_rx.recv() => match command {
                    Some(MirrorCommand::GetStats { response_tx }) => {
                        let _ = response_tx.send(self.stats);
                    }
                    Some(MirrorCommand::Shutdown { response_tx }) => {
                        let result = if connected {
                            self.backend.close().await.map(|()| self.stats)
                        } else {
                            Ok(self.stats)
                        };
                        let _ = response_tx.send(result);
                        break;
                    }
                    None => break,
                },
            }
        }
        debug!(stats = ?self.stats, "Registry mirror stopped");
    }

    async fn register(&mut self, event: RegistryEvent) {
        let result = match &event {
            RegistryEvent::GatewayAdded(gateway) => self.backend.create_gateway(gateway).await,
            RegistryEvent::DeviceAdded(device) => self.backend.create_device(device).await,
        };
        match (result, event) {
            (Ok(()), RegistryEvent::GatewayAdded(_)) => self.stats.gateways += 1,
            (Ok(()), RegistryEvent::DeviceAdded(_)) => self.stats.devices += 1,
            (Err(e), _) => {
                warn!(error = %e, "Backend registration failed");
                self.stats.failures += 1;
            }
        }
    }
}

/// 镜像 actor 的句柄
/// Handle of the mirror actor
#[derive(Debug, Clone)]
pub struct RegistryMirrorHandle {
    command_tx: mpsc::Sender<MirrorCommand>,
}

impl RegistryMirrorHandle {
    /// 获取统计信息
    /// Get statistics
    pub async fn stats(&self) -> Result<MirrorStats> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(MirrorCommand::GetStats { response_tx })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        response_rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// 关闭后端会话并停止 actor
    /// Close the backend session and stop the actor
    pub async fn shutdown(&self) -> Result<MirrorStats> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(MirrorCommand::Shutdown { response_tx })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        response_rx.await.map_err(|_| Error::ChannelClosed)?
    }
}

/// 启动镜像 actor，消费注册表事件
/// Start the mirror actor, consuming registry events
pub fn start_registry_mirror<B: NetworkServerBackend>(
    backend: Arc<B>,
    events: mpsc::UnboundedReceiver<RegistryEvent>,
) -> RegistryMirrorHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let mirror = RegistryMirror {
        backend,
        stats: MirrorStats::default(),
    };
    tokio::spawn(async move {
        mirror.run(events, command_rx).await;
    });
    info!("Registry mirror started");
    RegistryMirrorHandle { command_tx }
}
