//! 提供流量上的二分搜索与解析容量模型
//! Bisection search over offered traffic and the analytical capacity model

use super::group::OffTraffic;
use tracing::debug;

/// 二分搜索参数
/// Bisection search parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BisectionParams {
    /// Acceptable distance from the target PDR.
    pub epsilon: f64,
    /// Half-width of `[low, high]` below which values are stagnating.
    pub tolerance: f64,
    /// Offered traffic the analytical model predicts for the target PDR,
    /// already scaled by the channel count and the scaling factor.
    pub capacity_estimate: f64,
}

/// 执行一步二分搜索。返回是否产生了新的 `currbest`。
/// Run one bisection step. Returns whether a new `currbest` was produced.
///
/// A group whose device set changed keeps its bounds and `currbest`, but the
/// step still reports `true` so the devices get a fresh allocation.
pub fn bisection_logic(state: &mut OffTraffic, pdr: f64, target: f64, params: &BisectionParams) -> bool {
    let congested = pdr < target;

    if !state.started && !congested {
        debug!("Not needed (not started and not congested) in this group");
        return false;
    }
    if (target - pdr).abs() < params.epsilon {
        debug!(pdr, target, "Reached the PDR objective in this group");
        return false;
    }
    if (state.high - state.low) / 2.0 < params.tolerance && !state.changed {
        debug!(
            low = state.low,
            high = state.high,
            "Capacity values are stagnating in this group and no changes were detected"
        );
        return false;
    }

    if !state.changed {
        if !state.started {
            let midpoint = (state.high + state.low) / 2.0;
            let estimate = params.capacity_estimate;
            // The estimate is only a seed: it must fall strictly inside the
            // interval and meaningfully below `high`.
            state.currbest = if estimate > state.low
                && (state.high - estimate) / 2.0 >= params.tolerance
            {
                estimate
            } else {
                midpoint
            };
            state.started = true;
        } else {
            if congested {
                state.high = state.currbest;
            } else {
                state.low = state.currbest;
            }
            state.currbest = (state.high + state.low) / 2.0;
        }
    }
    true
}

/// 在瑞利衰落下达到给定 PDR 的单信道归一化容量
/// Single-channel normalized capacity reaching the given PDR under Rayleigh
/// fading
pub fn capacity_for_pdr_model(pdr: f64) -> f64 {
    // Thermal gain for a 0.98 PDR with Rayleigh fading.
    let gt = -(0.98f64.ln());
    let gamma = 10f64.powf(6.0 / 10.0);
    let a = (gamma + 1.0) / (1.0 + gamma * (1.0 - (-gt + 1.0 / gamma).exp()));
    -0.5 * (a + lambert_w0(-(a / a.exp()) * gt.exp() * pdr))
}

/// 朗伯 W 函数主分支，定义域 `x >= -1/e`，域外返回 NaN
/// Principal branch of the Lambert W function, defined for `x >= -1/e`,
/// NaN outside
pub fn lambert_w0(x: f64) -> f64 {
    const BRANCH_POINT: f64 = -1.0 / std::f64::consts::E;
    if x.is_nan() || x < BRANCH_POINT {
        return f64::NAN;
    }
    if x == 0.0 {
        return 0.0;
    }
    if x == BRANCH_POINT {
        return -1.0;
    }

    let mut w = if x > std::f64::consts::E {
        let l = x.ln();
        l - l.ln()
    } else if x > -0.25 {
        (1.0 + x).ln()
    } else {
        // Series around the branch point.
        let p = (2.0 * (std::f64::consts::E * x + 1.0)).sqrt();
        -1.0 + p - p * p / 3.0 + 11.0 / 72.0 * p * p * p
    };

    // Halley iteration.
    for _ in 0..64 {
        let ew = w.exp();
        let f = w * ew - x;
        let step = f / (ew * (w + 1.0) - (w + 2.0) * f / (2.0 * w + 2.0));
        w -= step;
        if step.abs() <= 1e-15 * (1.0 + w.abs()) {
            break;
        }
    }
    w
}
