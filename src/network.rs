//! 网络服务器：状态注册表、控制器组件流水线和上行分发
//! Network server: status registry, controller component pipeline and uplink
//! dispatch

pub mod controller;
pub mod server;
pub mod status;


pub use controller::{ControllerComponent, NetworkController, Reply};
pub use server::{Downlink, NetworkServer, ReceiveWindowRequest, WindowOutcome};
pub use status::{DeviceAddress, EndDeviceStatus, GatewayId, GatewayStatus, NetworkStatus};
