//! Network-side congestion control for LoRaWAN.
//! LoRaWAN 的网络侧拥塞控制。
//!
//! Devices are grouped per (gateway, cluster, data rate). Each group searches
//! the largest aggregate offered traffic that keeps its delivery ratio at the
//! cluster target, and the allocator turns that ceiling into per-device
//! duty-cycle exponents sent through `DutyCycleReq` MAC commands.

pub mod bisection;
pub mod component;
pub mod group;
pub mod persistence;

#[cfg(test)]
mod tests;

pub use bisection::{BisectionParams, bisection_logic, capacity_for_pdr_model, lambert_w0};
pub use component::{CongestionControlComponent, DeviceInfo};
pub use group::{ClusterState, ConfigAssignments, DataRateStatus, GroupTable, N_SF, OffTraffic};
