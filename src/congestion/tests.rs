//! Tests for the congestion-control search and component.
use super::*;
use crate::allocator::{DISABLED, UNRESTRICTED, duty_cycle_fraction, is_legal_duty_cycle};
use crate::config::CongestionControlConfig;
use crate::error::Error;
use crate::network::controller::{ControllerComponent, Reply};
use crate::network::status::{
    ApplicationStatus, DeviceAddress, EndDeviceMac, EndDeviceStatus, GatewayId, GatewayStatus,
    NetworkStatus, Position,
};
use crate::packet::{MessageType, Packet};
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;

const G1: GatewayId = GatewayId(1);

fn test_config() -> CongestionControlConfig {
    CongestionControlConfig {
        sampling_duration: Duration::from_secs(100),
        value_stagnation_tolerance: 1e-6,
        ..Default::default()
    }
}

/// Two gateways, devices close to the first one.
fn network(devices: &[(u32, u8, Duration)]) -> NetworkStatus {
    let status = NetworkStatus::new();
    status.add_gateway(GatewayStatus {
        id: G1,
        node_id: 1000,
        position: Position::new(0.0, 0.0, 15.0),
    });
    status.add_gateway(GatewayStatus {
        id: GatewayId(2),
        node_id: 1001,
        position: Position::new(10_000.0, 0.0, 15.0),
    });
    for (index, &(address, data_rate, interval)) in devices.iter().enumerate() {
        status.add_end_device(EndDeviceStatus::new(
            DeviceAddress(address),
            address,
            Position::new(100.0 * (index as f64 + 1.0), 0.0, 1.2),
            EndDeviceMac {
                data_rate,
                cluster: 0,
                aggregated_duty_cycle: 1.0,
            },
            ApplicationStatus {
                packet_size: 10,
                interval,
                running: true,
            },
        ));
    }
    status
}

fn sf7_network() -> NetworkStatus {
    let interval = Duration::from_secs(600);
    network(&[(1, 5, interval), (2, 5, interval), (3, 5, interval), (4, 5, interval)])
}

fn uplink(address: u32, fcnt: u16) -> Packet {
    Packet::uplink(u64::from(fcnt), DeviceAddress(address), fcnt, Bytes::from_static(&[0u8; 10]))
}

fn feed(
    cc: &mut CongestionControlComponent,
    status: &NetworkStatus,
    address: u32,
    fcnt: u16,
    secs: u64,
) -> crate::error::Result<()> {
    cc.on_received_packet(Duration::from_secs(secs), &uplink(address, fcnt), status)
}

/// Device 1 reports 70 of 100 frames over one sampling period starting at
/// `start`, with counters starting after `fcnt_base`. The last frame closes
/// the period.
fn congested_period(cc: &mut CongestionControlComponent, status: &NetworkStatus, fcnt_base: u16, start: u64) {
    for i in 1..=69u16 {
        feed(cc, status, 1, fcnt_base + i, start + u64::from(i)).unwrap();
    }
    feed(cc, status, 1, fcnt_base + 100, start + 150).unwrap();
}

fn group(cc: &CongestionControlComponent, data_rate: u8) -> &DataRateStatus {
    cc.groups().group(G1, 0, data_rate).unwrap()
}

fn pending(cc: &CongestionControlComponent) -> Vec<(DeviceAddress, u8)> {
    let mut todo: Vec<_> = cc
        .groups()
        .cluster(G1, 0)
        .unwrap()
        .todo
        .iter()
        .map(|(a, dc)| (*a, *dc))
        .collect();
    todo.sort_unstable();
    todo
}

fn allocated_traffic(ceiling: f64, exponent: u8) -> f64 {
    match exponent {
        UNRESTRICTED => ceiling,
        n => duty_cycle_fraction(n),
    }
}

fn temp_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("lorawan-sim-{}-{name}.txt", std::process::id()))
}

#[test]
fn test_lambert_w0() {
    assert!((lambert_w0(1.0) - 0.567_143_290_409_783_8).abs() < 1e-12);
    assert!((lambert_w0(std::f64::consts::E) - 1.0).abs() < 1e-12);
    assert!((lambert_w0(-1.0 / std::f64::consts::E) + 1.0).abs() < 1e-9);
    assert_eq!(lambert_w0(0.0), 0.0);
    assert!(lambert_w0(-0.5).is_nan());
    let w = lambert_w0(-0.2);
    assert!((w * w.exp() + 0.2).abs() < 1e-12);
}

#[test]
fn test_lambert_w0_near_branch_point_and_large_arguments() {
    let close = |actual: f64, expected: f64| {
        assert!(
            ((actual - expected) / expected).abs() < 1e-12,
            "expected {expected}, got {actual}"
        );
    };
    close(lambert_w0(10.0), 1.745_528_002_740_699_4);
    close(lambert_w0(100.0), 3.385_630_140_290_05);
    close(lambert_w0(1e6), 11.383_358_086_140_053);
    close(lambert_w0(-0.3), -0.489_402_227_180_214_9);
    close(lambert_w0(-0.36), -0.806_084_315_970_817_5);

    let x = -1.0 / std::f64::consts::E + 1e-12;
    let w = lambert_w0(x);
    assert!(w > -1.0 && w < -1.0 + 1e-3, "W({x}) = {w}");
    assert!((w * w.exp() - x).abs() < 1e-15);

    let w = lambert_w0(1e300);
    assert!(w.is_finite());
    assert!((w + w.ln() - 1e300f64.ln()).abs() < 1e-9);
    close(w, 684.247_208_629_760_8);
}

#[test]
fn test_capacity_model() {
    let expected = [
        (0.5, 0.334_156),
        (0.8, 0.100_773),
        (0.9, 0.042_286),
        (0.95, 0.015_438_5),
        (0.99, -0.005_041_3),
    ];
    for (pdr, capacity) in expected {
        let model = capacity_for_pdr_model(pdr);
        assert!((model - capacity).abs() < 1e-5, "pdr {pdr}: {model} vs {capacity}");
    }
}

fn params(capacity_estimate: f64) -> BisectionParams {
    BisectionParams {
        epsilon: 0.01,
        tolerance: 1e-4,
        capacity_estimate,
    }
}

#[test]
fn test_bisection_not_needed() {
    let mut state = OffTraffic {
        high: 1.0,
        ..Default::default()
    };
    assert!(!bisection_logic(&mut state, 0.99, 0.95, &params(0.3)));
    assert!(!state.started);

    // Close enough to the target.
    assert!(!bisection_logic(&mut state, 0.945, 0.95, &params(0.3)));
    assert!(!state.started);
}

#[test]
fn test_bisection_first_step_uses_seed() {
    let mut state = OffTraffic {
        high: 1.0,
        ..Default::default()
    };
    assert!(bisection_logic(&mut state, 0.5, 0.95, &params(0.3)));
    assert!(state.started);
    assert_eq!(state.currbest, 0.3);
    assert_eq!(state.high, 1.0);
    assert_eq!(state.low, 0.0);
}

#[test]
fn test_bisection_rejects_seed_outside_interval() {
    let mut state = OffTraffic {
        high: 0.01,
        ..Default::default()
    };
    assert!(bisection_logic(&mut state, 0.5, 0.95, &params(0.3)));
    assert_eq!(state.currbest, 0.005);

    let mut state = OffTraffic {
        high: 0.01,
        low: 0.004,
        ..Default::default()
    };
    assert!(bisection_logic(&mut state, 0.5, 0.95, &params(0.002)));
    assert!((state.currbest - 0.007).abs() < 1e-15);
}

#[test]
fn test_bisection_narrows_interval() {
    let mut state = OffTraffic {
        started: true,
        currbest: 0.5,
        high: 1.0,
        ..Default::default()
    };
    // Congested: the upper bound moves down.
    assert!(bisection_logic(&mut state, 0.7, 0.95, &params(0.3)));
    assert_eq!(state.high, 0.5);
    assert_eq!(state.currbest, 0.25);

    // Not congested: the lower bound moves up.
    assert!(bisection_logic(&mut state, 0.99, 0.95, &params(0.3)));
    assert_eq!(state.low, 0.25);
    assert_eq!(state.currbest, 0.375);
}

#[test]
fn test_bisection_stagnation_and_change() {
    let mut state = OffTraffic {
        started: true,
        currbest: 0.50005,
        low: 0.5,
        high: 0.5001,
        ..Default::default()
    };
    assert!(!bisection_logic(&mut state, 0.7, 0.95, &params(0.3)));

    // A changed device set forces a fresh allocation with the same bounds.
    state.changed = true;
    let before = state.clone();
    assert!(bisection_logic(&mut state, 0.7, 0.95, &params(0.3)));
    assert_eq!(state, before);
}

#[test]
fn test_bisection_converges_on_synthetic_channel() {
    // Delivery ratio of a channel that saturates past 0.285 of offered traffic.
    let pdr = |offered: f64| if offered <= 0.0 { 1.0 } else { (0.285 / offered).min(1.0) };
    let target = 0.95;
    let params = BisectionParams {
        epsilon: 0.001,
        tolerance: 1e-9,
        capacity_estimate: 10.0,
    };
    let mut state = OffTraffic {
        high: 1.0,
        ..Default::default()
    };

    let mut offered = state.high;
    let mut width = state.high - state.low;
    for _ in 0..100 {
        if !bisection_logic(&mut state, pdr(offered), target, &params) {
            break;
        }
        let new_width = state.high - state.low;
        assert!(new_width <= width);
        width = new_width;
        offered = state.currbest;
    }
    assert!(state.started);
    assert!((pdr(offered) - target).abs() < params.epsilon);
    assert!((state.currbest - 0.3).abs() < 0.001);
}

#[test]
fn test_frame_counter_wraparound() {
    let status = sf7_network();
    let mut cc = CongestionControlComponent::new(CongestionControlConfig {
        sampling_duration: Duration::from_secs(10_000),
        ..test_config()
    });
    feed(&mut cc, &status, 1, 65_000, 1).unwrap();
    feed(&mut cc, &status, 1, 30, 2).unwrap();

    let group = group(&cc, 5);
    assert_eq!(group.received, 2);
    assert_eq!(group.sent, 65_000 + 566);
}

#[test]
fn test_duplicate_copies_counted_once() {
    let status = sf7_network();
    let mut cc = CongestionControlComponent::new(test_config());
    feed(&mut cc, &status, 2, 7, 1).unwrap();
    feed(&mut cc, &status, 2, 7, 1).unwrap();
    assert_eq!(group(&cc, 5).received, 1);
    assert_eq!(group(&cc, 5).sent, 7);
}

#[test]
fn test_frame_counter_decrease_is_fatal() {
    let status = sf7_network();
    let mut cc = CongestionControlComponent::new(test_config());
    feed(&mut cc, &status, 3, 10, 1).unwrap();
    let err = feed(&mut cc, &status, 3, 5, 2).unwrap_err();
    assert!(matches!(
        err,
        Error::FrameCounterDecreased {
            previous: 10,
            current: 5,
            ..
        }
    ));
}

#[test]
fn test_packets_before_start_are_ignored() {
    let status = sf7_network();
    let mut cc = CongestionControlComponent::new(CongestionControlConfig {
        start_time: Duration::from_secs(50),
        ..test_config()
    });
    feed(&mut cc, &status, 1, 1, 10).unwrap();
    assert!(cc.groups().is_empty());

    feed(&mut cc, &status, 1, 2, 60).unwrap();
    assert_eq!(group(&cc, 5).received, 1);
    assert_eq!(group(&cc, 5).sent, 1);
}

#[test]
fn test_initialization_attributes_devices() {
    let status = sf7_network();
    status.set_application_running(DeviceAddress(4), false).unwrap();
    let mut cc = CongestionControlComponent::new(test_config());
    cc.initialize_data(&status).unwrap();

    let group = group(&cc, 5);
    assert_eq!(group.devices.len(), 3);
    let ceiling = group.devices[0].1;
    assert!(ceiling > 0.0 && ceiling < cc.config().max_offered_traffic);
    assert!((group.offered_traffic.high - 3.0 * ceiling).abs() < 1e-15);

    let info = cc.device_info(DeviceAddress(4)).unwrap();
    assert_eq!(info.best_gateway, G1);
    assert!(!info.active);
    assert!(cc.groups().cluster(G1, 0).unwrap().unactive.contains(&DeviceAddress(4)));
    // The far gateway has groups too, but no devices.
    assert!(cc.groups().group(GatewayId(2), 0, 5).unwrap().devices.is_empty());
}

fn register_late_device(status: &NetworkStatus, address: u32, x: f64, data_rate: u8) {
    status.add_end_device(EndDeviceStatus::new(
        DeviceAddress(address),
        address,
        Position::new(x, 0.0, 1.2),
        EndDeviceMac {
            data_rate,
            cluster: 0,
            aggregated_duty_cycle: 1.0,
        },
        ApplicationStatus {
            packet_size: 10,
            interval: Duration::from_secs(600),
            running: true,
        },
    ));
}

#[test]
fn test_late_device_joins_its_group_and_allocation() {
    let status = sf7_network();
    let mut cc = CongestionControlComponent::new(test_config());
    feed(&mut cc, &status, 1, 1, 1).unwrap();
    let ceiling = group(&cc, 5).devices[0].1;
    assert_eq!(group(&cc, 5).devices.len(), 4);

    register_late_device(&status, 5, 500.0, 5);
    register_late_device(&status, 6, 9_900.0, 3);
    feed(&mut cc, &status, 5, 1, 2).unwrap();
    feed(&mut cc, &status, 6, 1, 2).unwrap();

    let info = cc.device_info(DeviceAddress(5)).unwrap();
    assert!(info.active);
    assert_eq!((info.best_gateway, info.cluster), (G1, 0));
    let joined = group(&cc, 5);
    assert_eq!(joined.devices.len(), 5);
    assert!(joined.devices.iter().any(|(address, _)| *address == DeviceAddress(5)));
    assert!((joined.offered_traffic.high - 5.0 * ceiling).abs() < 1e-15);
    assert_eq!(joined.received, 2);

    let far = cc.groups().group(GatewayId(2), 0, 3).unwrap();
    assert_eq!(far.devices.len(), 1);
    assert_eq!(far.devices[0].0, DeviceAddress(6));
    assert_eq!(cc.device_info(DeviceAddress(6)).unwrap().best_gateway, GatewayId(2));

    // The next reconfiguration shares the budget with the newcomer.
    congested_period(&mut cc, &status, 1, 2);
    let ot = &group(&cc, 5).offered_traffic;
    assert!(ot.started);
    assert!((ot.currbest - 2.5 * ceiling).abs() < 1e-15);
    let currbest = ot.currbest;

    let todo = pending(&cc);
    assert_eq!(todo.len(), 5);
    assert!(todo.iter().any(|(address, _)| *address == DeviceAddress(5)));
    let total: f64 = todo
        .iter()
        .map(|(_, dc)| {
            assert!(is_legal_duty_cycle(*dc));
            allocated_traffic(ceiling, *dc)
        })
        .sum();
    assert!(total <= currbest);

    // Once the search runs, a newcomer only flags the group.
    register_late_device(&status, 7, 600.0, 5);
    feed(&mut cc, &status, 7, 1, 153).unwrap();
    let ot = &group(&cc, 5).offered_traffic;
    assert!(ot.changed);
    assert!((ot.high - 5.0 * ceiling).abs() < 1e-15);
    assert_eq!(group(&cc, 5).devices.len(), 6);
}

#[test]
fn test_offered_traffic_capped() {
    let status = network(&[(1, 0, Duration::from_secs(1))]);
    let mut cc = CongestionControlComponent::new(test_config());
    cc.initialize_data(&status).unwrap();
    let info = cc.device_info(DeviceAddress(1)).unwrap();
    assert_eq!(info.max_offered_traffic, 0.01);
    assert!(info.time_on_air > Duration::from_secs(1));
}

#[test]
fn test_congested_group_reconfigures() {
    let status = sf7_network();
    let mut cc = CongestionControlComponent::new(test_config());
    congested_period(&mut cc, &status, 0, 0);

    let high = group(&cc, 5).offered_traffic.high;
    let ceiling = group(&cc, 5).devices[0].1;
    let currbest = {
        let ot = &group(&cc, 5).offered_traffic;
        assert!(ot.started);
        assert!((ot.currbest - high / 2.0).abs() < 1e-15);
        ot.currbest
    };
    // Counters are reset for the next period.
    assert_eq!(group(&cc, 5).sent, 0);

    let todo = pending(&cc);
    assert_eq!(todo.len(), 4);
    let total: f64 = todo
        .iter()
        .map(|(_, dc)| {
            assert!(is_legal_duty_cycle(*dc));
            allocated_traffic(ceiling, *dc)
        })
        .sum();
    assert!(total <= currbest);

    // Uplinks still count while instructions are pending, but never close the period.
    feed(&mut cc, &status, 2, 1, 155).unwrap();
    assert_eq!(group(&cc, 5).received, 1);

    // Deliver every instruction; the last one restarts sampling.
    let delivered_at = Duration::from_secs(160);
    for (address, dc) in &todo {
        let mut reply = Reply::new(*address);
        cc.before_sending_reply(delivered_at, *address, &mut reply, &status).unwrap();
        assert!(reply.needs_reply);
        assert_eq!(reply.mac_header.message_type, MessageType::UnconfirmedDataDown);
        assert_eq!(reply.frame_header.duty_cycle_req(), Some(*dc));
        assert_eq!(cc.device_info(*address).unwrap().duty_cycle, *dc);
    }
    let cluster = cc.groups().cluster(G1, 0).unwrap();
    assert!(cluster.todo.is_empty());
    assert_eq!(cluster.sampling_start, delivered_at);
    assert_eq!(group(&cc, 5).received, 0);

    // A reply without instruction is left alone.
    let mut reply = Reply::new(DeviceAddress(1));
    cc.before_sending_reply(delivered_at, DeviceAddress(1), &mut reply, &status).unwrap();
    assert!(!reply.needs_reply);

    // Still congested: the upper bound narrows to the previous ceiling.
    congested_period(&mut cc, &status, 100, 160);
    let ot = &group(&cc, 5).offered_traffic;
    assert_eq!(ot.high, currbest);
    assert!((ot.currbest - currbest / 2.0).abs() < 1e-15);
}

#[test]
fn test_fast_convergence_applies_immediately() {
    let status = sf7_network();
    let mut cc = CongestionControlComponent::new(CongestionControlConfig {
        fast_converge: true,
        ..test_config()
    });
    congested_period(&mut cc, &status, 0, 0);

    assert!(pending(&cc).is_empty());
    assert!(cc.is_fast_converging());
    for address in 1..=4 {
        let address = DeviceAddress(address);
        let dc = cc.device_info(address).unwrap().duty_cycle;
        assert_ne!(dc, UNRESTRICTED);
        assert_eq!(status.aggregated_duty_cycle(address).unwrap(), duty_cycle_fraction(dc));
    }

    // A device leaving a started group ends fast convergence.
    status.set_application_running(DeviceAddress(4), false).unwrap();
    congested_period(&mut cc, &status, 100, 150);
    assert!(!cc.is_fast_converging());
    assert!(group(&cc, 5).offered_traffic.changed);
    assert!(!cc.device_info(DeviceAddress(4)).unwrap().active);
    assert!(!pending(&cc).is_empty());
}

#[test]
fn test_disabled_device_is_woken_up() {
    let status = sf7_network();
    let mut cc = CongestionControlComponent::new(test_config());
    cc.initialize_data(&status).unwrap();

    let mut configs = ConfigAssignments::from([(DeviceAddress(1), DISABLED)]);
    cc.fast_forward_config(&mut configs, &status).unwrap();
    assert!(configs.is_empty());
    assert_eq!(status.aggregated_duty_cycle(DeviceAddress(1)).unwrap(), 0.0);
    assert!(cc.groups().cluster(G1, 0).unwrap().disabled.contains(&DeviceAddress(1)));

    congested_period(&mut cc, &status, 0, 0);
    let cluster = cc.groups().cluster(G1, 0).unwrap();
    assert!(!cluster.disabled.contains(&DeviceAddress(1)));
    assert!(cluster.todo.contains_key(&DeviceAddress(1)));
    assert_eq!(cc.device_info(DeviceAddress(1)).unwrap().duty_cycle, UNRESTRICTED);
    assert_eq!(status.aggregated_duty_cycle(DeviceAddress(1)).unwrap(), 1.0);
}

#[test]
fn test_illegal_duty_cycle_rejected() {
    let status = sf7_network();
    let mut cc = CongestionControlComponent::new(test_config());
    cc.initialize_data(&status).unwrap();
    let mut configs = ConfigAssignments::from([(DeviceAddress(2), 3)]);
    let err = cc.fast_forward_config(&mut configs, &status).unwrap_err();
    assert!(matches!(err, Error::IllegalDutyCycle(3)));
}

#[test]
fn test_stopped_device_leaves_unstarted_group() {
    let status = sf7_network();
    let mut cc = CongestionControlComponent::new(test_config());
    cc.initialize_data(&status).unwrap();
    let high = group(&cc, 5).offered_traffic.high;
    let share = cc.device_info(DeviceAddress(3)).unwrap().max_offered_traffic;

    status.set_application_running(DeviceAddress(3), false).unwrap();
    cc.look_for_changes(G1, 0, &status).unwrap();
    let ot = &group(&cc, 5).offered_traffic;
    assert!((ot.high - (high - share)).abs() < 1e-15);
    assert!(!ot.changed);
    assert_eq!(group(&cc, 5).devices.len(), 3);
    assert!(cc.groups().cluster(G1, 0).unwrap().unactive.contains(&DeviceAddress(3)));

    // Coming back restores the share exactly once.
    status.set_application_running(DeviceAddress(3), true).unwrap();
    cc.look_for_changes(G1, 0, &status).unwrap();
    cc.look_for_changes(G1, 0, &status).unwrap();
    assert_eq!(group(&cc, 5).devices.len(), 4);
    assert!((group(&cc, 5).offered_traffic.high - high).abs() < 1e-15);
    assert!(cc.groups().cluster(G1, 0).unwrap().unactive.is_empty());
}

#[test]
fn test_saved_configuration_round_trip() {
    let path = temp_file("save");
    let status = sf7_network();
    let mut cc = CongestionControlComponent::new(CongestionControlConfig {
        output_config_file: Some(path.clone()),
        ..test_config()
    });
    congested_period(&mut cc, &status, 0, 0);

    let saved = persistence::load_config_from_file(&path).unwrap();
    // Two gateways, one cluster, one line per data rate.
    assert_eq!(saved.len(), 2 * N_SF);
    let line = saved
        .iter()
        .find(|s| s.gateway == G1 && s.cluster == 0 && s.data_rate == 5)
        .unwrap();
    let ot = &group(&cc, 5).offered_traffic;
    assert!(line.started);
    assert_eq!(line.currbest, ot.currbest);
    assert_eq!(line.high, ot.high);
    assert_eq!(line.low, ot.low);
    assert_eq!(line.max_total, group(&cc, 5).max_total());
    assert_eq!(saved.iter().filter(|s| s.started).count(), 1);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_loaded_configuration_is_applied_immediately() {
    let path = temp_file("load");
    std::fs::write(
        &path,
        "1 0 3 1 5.00000000000000000e-3 1.00000000000000000e-2 0.00000000000000000e0 3e-2\n\
         1 0 5 0 0 0 0 0\n",
    )
    .unwrap();

    let interval = Duration::from_secs(10);
    let status = network(&[(1, 3, interval), (2, 3, interval), (3, 3, interval)]);
    let mut cc = CongestionControlComponent::new(CongestionControlConfig {
        input_config_file: Some(path.clone()),
        ..test_config()
    });
    cc.initialize_data(&status).unwrap();

    let ot = &group(&cc, 3).offered_traffic;
    assert!(ot.started);
    assert_eq!(ot.currbest, 0.005);
    assert_eq!(ot.high, 0.01);
    assert!(!group(&cc, 5).offered_traffic.started);

    let mut total = 0.0;
    for address in 1..=3 {
        let address = DeviceAddress(address);
        let info = cc.device_info(address).unwrap();
        assert_ne!(info.duty_cycle, UNRESTRICTED);
        let fraction = duty_cycle_fraction(info.duty_cycle);
        assert_eq!(status.aggregated_duty_cycle(address).unwrap(), fraction);
        total += allocated_traffic(info.max_offered_traffic, info.duty_cycle);
    }
    assert!(total <= 0.005);
    assert!(pending(&cc).is_empty());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_configuration_file_errors() {
    let status = sf7_network();
    let missing = temp_file("missing");
    let mut cc = CongestionControlComponent::new(CongestionControlConfig {
        input_config_file: Some(missing),
        ..test_config()
    });
    assert!(matches!(cc.initialize_data(&status), Err(Error::ConfigFile { .. })));

    let unknown = temp_file("unknown-group");
    std::fs::write(&unknown, "9 0 5 1 1e-3 1e-2 0 1e-2\n").unwrap();
    let mut cc = CongestionControlComponent::new(CongestionControlConfig {
        input_config_file: Some(unknown.clone()),
        ..test_config()
    });
    assert!(matches!(
        cc.initialize_data(&status),
        Err(Error::UnknownGroup {
            gateway: GatewayId(9),
            ..
        })
    ));
    let _ = std::fs::remove_file(&unknown);

    let malformed = temp_file("malformed");
    std::fs::write(&malformed, "1 0 5 1 1e-3\n").unwrap();
    assert!(matches!(
        persistence::load_config_from_file(&malformed),
        Err(Error::MalformedConfigLine { line: 1, .. })
    ));
    let _ = std::fs::remove_file(&malformed);
}

#[test]
fn test_congestion_report() {
    let status = sf7_network();
    let mut cc = CongestionControlComponent::new(test_config());
    feed(&mut cc, &status, 1, 4, 1).unwrap();
    let report = cc.groups().cluster(G1, 0).unwrap().congestion_report();
    assert!(report.starts_with("SF7 0.2500"));
    assert!(report.contains("SF12 -1.0000"));
    assert!(report.ends_with("All 0.2500"));
}
