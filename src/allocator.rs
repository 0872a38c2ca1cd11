//! 占空比分配工具
//! Duty-cycle allocation utility
//!
//! Given a group of devices with their own offered-traffic ceiling and an
//! aggregate limit, pick one setting per device among:
//!
//! * its own ceiling (exponent `0`, unrestricted),
//! * `1/2^n` for `n` in `7..=15`, when not above its ceiling,
//! * `0` (exponent `255`, disabled),
//!
//! so that the aggregate stays within the limit. Both policies are greedy and
//! deterministic: ties go to the device listed first.
//!
//! 给定一组设备及其各自的提供流量上限和总上限，为每个设备选择一个占空比设置，
//! 使总流量不超过上限。两种策略都是确定性的贪心算法。

use crate::network::status::DeviceAddress;
use std::collections::HashMap;
use tracing::debug;

/// 不受限的占空比指数
/// Unrestricted duty-cycle exponent
pub const UNRESTRICTED: u8 = 0;

/// 禁用设备的占空比指数
/// Duty-cycle exponent of a disabled device
pub const DISABLED: u8 = 255;

/// 可用的受限指数范围
/// Range of restricting exponents
pub const RESTRICTED_EXPONENTS: std::ops::RangeInclusive<u8> = 7..=15;

/// 占空比指数是否合法：`{0} ∪ [7, 15] ∪ {255}`
/// Whether a duty-cycle exponent is legal: `{0} ∪ [7, 15] ∪ {255}`
pub fn is_legal_duty_cycle(exponent: u8) -> bool {
    exponent == UNRESTRICTED || exponent == DISABLED || RESTRICTED_EXPONENTS.contains(&exponent)
}

/// 指数对应的聚合占空比：`0` 为 `1.0`，`255` 为 `0.0`，其他为 `1/2^n`
/// Aggregated duty cycle of an exponent: `1.0` for `0`, `0.0` for `255`,
/// `1/2^n` otherwise
pub fn duty_cycle_fraction(exponent: u8) -> f64 {
    match exponent {
        DISABLED => 0.0,
        n => 2f64.powi(-i32::from(n)),
    }
}

/// 分配策略
/// Allocation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationPolicy {
    /// Maximize the smallest allocation, then fill up what is left.
    #[default]
    MaxMin,
    /// Maximize the aggregate allocated traffic.
    MaxThroughput,
}

/// 单个设备可选的设置，按流量降序排列
/// Settings available to one device, by decreasing traffic
#[derive(Debug)]
struct Ladder {
    /// `(exponent, traffic)` pairs.
    steps: Vec<(u8, f64)>,
    /// Index of the current setting in `steps`.
    current: usize,
}

impl Ladder {
    fn new(ceiling: f64) -> Self {
        let ceiling = ceiling.max(0.0);
        let mut steps = vec![(UNRESTRICTED, ceiling)];
        for n in RESTRICTED_EXPONENTS {
            let traffic = duty_cycle_fraction(n);
            if traffic < ceiling {
                steps.push((n, traffic));
            }
        }
        if ceiling > 0.0 {
            steps.push((DISABLED, 0.0));
        }
        Self { steps, current: 0 }
    }

    fn traffic(&self) -> f64 {
        self.steps[self.current].1
    }

    fn exponent(&self) -> u8 {
        self.steps[self.current].0
    }

    /// Traffic lost by moving one step down, if possible.
    fn down_loss(&self) -> Option<f64> {
        self.steps
            .get(self.current + 1)
            .map(|(_, next)| self.traffic() - next)
    }

    /// Traffic gained by moving one step up, if possible.
    fn up_gain(&self) -> Option<f64> {
        self.current
            .checked_sub(1)
            .map(|prev| self.steps[prev].1 - self.traffic())
    }
}

/// 按策略在 `limit` 之内分配占空比，结果写入 `output`
/// Allocate duty cycles within `limit` according to the policy, writing the
/// result into `output`
///
/// Existing entries of `output` for other devices are kept.
pub fn optimize_duty_cycle(
    policy: AllocationPolicy,
    devices: &[(DeviceAddress, f64)],
    limit: f64,
    output: &mut HashMap<DeviceAddress, u8>,
) {
    match policy {
        AllocationPolicy::MaxMin => optimize_duty_cycle_max_min(devices, limit, output),
        AllocationPolicy::MaxThroughput => optimize_duty_cycle_max(devices, limit, output),
    }
}

/// 最大最小公平分配
/// Max-min fair allocation
pub fn optimize_duty_cycle_max_min(
    devices: &[(DeviceAddress, f64)],
    limit: f64,
    output: &mut HashMap<DeviceAddress, u8>,
) {
    let mut ladders: Vec<_> = devices.iter().map(|(_, c)| Ladder::new(*c)).collect();
    let mut total: f64 = ladders.iter().map(Ladder::traffic).sum();

    // Lower the largest allocation until the aggregate fits.
    while total > limit {
        let candidate = ladders
            .iter()
            .enumerate()
            .filter(|(_, l)| l.down_loss().is_some())
            .fold(None, |best: Option<(usize, f64)>, (i, l)| match best {
                Some((_, t)) if t >= l.traffic() => best,
                _ => Some((i, l.traffic())),
            });
        let Some((index, _)) = candidate else { break };
        total -= ladders[index].down_loss().unwrap_or(0.0);
        ladders[index].current += 1;
    }

    // Raise the smallest allocations while there is room.
    loop {
        let candidate = ladders
            .iter()
            .enumerate()
            .filter(|(_, l)| l.up_gain().is_some_and(|gain| total + gain <= limit))
            .fold(None, |best: Option<(usize, f64)>, (i, l)| match best {
                Some((_, t)) if t <= l.traffic() => best,
                _ => Some((i, l.traffic())),
            });
        let Some((index, _)) = candidate else { break };
        total += ladders[index].up_gain().unwrap_or(0.0);
        ladders[index].current -= 1;
    }

    write_output(devices, &ladders, limit, total, output);
}

/// 最大吞吐量分配
/// Max-throughput allocation
pub fn optimize_duty_cycle_max(
    devices: &[(DeviceAddress, f64)],
    limit: f64,
    output: &mut HashMap<DeviceAddress, u8>,
) {
    let mut ladders: Vec<_> = devices.iter().map(|(_, c)| Ladder::new(*c)).collect();
    let mut total: f64 = ladders.iter().map(Ladder::traffic).sum();

    // Take the cheapest step down until the aggregate fits.
    while total > limit {
        let candidate = ladders
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.down_loss().map(|loss| (i, loss)))
            .fold(None, |best: Option<(usize, f64)>, (i, loss)| match best {
                Some((_, b)) if b <= loss => best,
                _ => Some((i, loss)),
            });
        let Some((index, loss)) = candidate else { break };
        total -= loss;
        ladders[index].current += 1;
    }

    // Give back the largest steps that still fit.
    loop {
        let candidate = ladders
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.up_gain().map(|gain| (i, gain)))
            .filter(|(_, gain)| total + gain <= limit)
            .fold(None, |best: Option<(usize, f64)>, (i, gain)| match best {
                Some((_, b)) if b >= gain => best,
                _ => Some((i, gain)),
            });
        let Some((index, gain)) = candidate else { break };
        total += gain;
        ladders[index].current -= 1;
    }

    write_output(devices, &ladders, limit, total, output);
}

fn write_output(
    devices: &[(DeviceAddress, f64)],
    ladders: &[Ladder],
    limit: f64,
    total: f64,
    output: &mut HashMap<DeviceAddress, u8>,
) {
    let mut disabled = 0;
    for ((address, _), ladder) in devices.iter().zip(ladders) {
        if ladder.exponent() == DISABLED {
            disabled += 1;
        }
        output.insert(*address, ladder.exponent());
    }
    debug!(
        devices = devices.len(),
        bound = limit,
        objective = total,
        disabled,
        "Duty-cycle allocation produced"
    );
}
