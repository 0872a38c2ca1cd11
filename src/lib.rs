#![deny(clippy::expect_used, clippy::unwrap_used)]

//! The root of the LoRaWAN network simulation library.
//! LoRaWAN 网络仿真库的根。
//!
//! The gateway physical layer arbitrates its reception paths between
//! overlapping uplinks, the network server feeds received frames through a
//! pipeline of controller components, and the congestion-control component
//! tunes per-device duty cycles until every cluster meets its delivery target.

pub mod allocator;
pub mod backend;
pub mod config;
pub mod congestion;
pub mod error;
pub mod network;
pub mod packet;
pub mod phy;
pub mod simulation;
pub mod timer;
pub mod traffic;
