//! 拥塞控制端到端测试
//! End-to-end congestion control tests

pub mod common;

use common::harness::{ring, single_gateway, window_delivery_ratio};
use lorawan_sim::config::Config;
use lorawan_sim::simulation::Simulation;
use std::time::Duration;

const DEVICES: u32 = 200;

fn congested_config(fast_converge: bool) -> Config {
    let mut config = Config::default();
    config.congestion_control.sampling_duration = Duration::from_secs(300);
    config.congestion_control.fast_converge = fast_converge;
    config
}

fn congested_network(fast_converge: bool) -> Simulation {
    let devices = ring(DEVICES, 800.0, |_| 5, Duration::from_secs(10));
    let mut simulation = single_gateway(congested_config(fast_converge), devices);
    simulation.install_congestion_control();
    simulation
}

fn restricted_devices(simulation: &Simulation) -> usize {
    let status = simulation.status();
    status
        .device_addresses()
        .into_iter()
        .filter(|address| status.aggregated_duty_cycle(*address).unwrap() < 1.0)
        .count()
}

#[test]
fn test_duty_cycles_relieve_congestion() {
    let mut simulation = congested_network(false);

    let start = simulation.run_until(Duration::ZERO).unwrap();
    let unmanaged = simulation.run_until(Duration::from_secs(300)).unwrap();
    assert_eq!(restricted_devices(&simulation), 0);
    assert_eq!(unmanaged.transmissions_skipped, 0);

    let settling = simulation.run_until(Duration::from_secs(900)).unwrap();
    let managed = simulation.run_until(Duration::from_secs(1800)).unwrap();

    let early = window_delivery_ratio(&start, &unmanaged);
    let late = window_delivery_ratio(&settling, &managed);
    tracing::info!(early, late, "Delivery ratio before and after reconfiguration");

    assert!(early < 0.95, "the unmanaged network should be congested, pdr {early}");
    assert!(late > early, "pdr did not improve: {early} -> {late}");
    assert!(restricted_devices(&simulation) >= DEVICES as usize / 2);
    assert!(managed.downlinks_delivered > 0);
    assert!(managed.transmissions_skipped > 0);
    assert!(managed.gateways.values().all(|g| g.sent > 0));
}

#[test]
fn test_fast_convergence_needs_no_downlink() {
    let mut simulation = congested_network(true);

    let report = simulation.run_until(Duration::from_secs(900)).unwrap();
    assert!(restricted_devices(&simulation) >= DEVICES as usize / 2);
    assert_eq!(report.downlinks_delivered, 0);
    assert!(report.gateways.values().all(|g| g.sent == 0));
}

#[test]
fn test_light_load_is_left_alone() {
    let devices = ring(20, 800.0, |_| 5, Duration::from_secs(600));
    let mut simulation = single_gateway(congested_config(false), devices);
    simulation.install_congestion_control();

    let report = simulation.run_until(Duration::from_secs(3600)).unwrap();
    assert_eq!(restricted_devices(&simulation), 0);
    assert_eq!(report.downlinks_delivered, 0);
    assert!(report.delivery_ratio.unwrap() > 0.95);
}
