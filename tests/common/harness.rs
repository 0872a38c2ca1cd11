//! tests/common/harness.rs
use lorawan_sim::config::Config;
use lorawan_sim::network::status::{DeviceAddress, GatewayId, Position};
use lorawan_sim::simulation::{DeviceSpec, Simulation, SimulationReport};
use std::sync::Once;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter =
            std::env::var("RUST_LOG").unwrap_or_else(|_| "lorawan_sim=warn".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::FULL)
            .with_test_writer()
            .init();
    });
}

/// Devices spread evenly on a circle around the origin.
pub fn ring(
    count: u32,
    radius: f64,
    data_rate: impl Fn(u32) -> u8,
    interval: Duration,
) -> Vec<DeviceSpec> {
    (0..count)
        .map(|i| {
            let angle = 2.0 * std::f64::consts::PI * f64::from(i) / f64::from(count);
            DeviceSpec {
                address: DeviceAddress(0x2600_0000 + i),
                position: Position::new(radius * angle.cos(), radius * angle.sin(), 1.2),
                data_rate: data_rate(i),
                cluster: 0,
                packet_size: 10,
                interval,
            }
        })
        .collect()
}

/// A simulation with one gateway at the origin and the given devices.
pub fn single_gateway(config: Config, devices: Vec<DeviceSpec>) -> Simulation {
    init_tracing();
    let mut simulation = Simulation::new(config).unwrap();
    simulation.add_gateway(GatewayId(1), Position::new(0.0, 0.0, 15.0));
    for device in devices {
        simulation.add_device(device).unwrap();
    }
    simulation
}

/// Delivery ratio of the packets sent between two reports.
pub fn window_delivery_ratio(early: &SimulationReport, late: &SimulationReport) -> f64 {
    let sent = late.packets_sent - early.packets_sent;
    let delivered = late.packets_delivered - early.packets_delivered;
    assert!(sent > 0, "no packet sent in the window");
    delivered as f64 / sent as f64
}
