//! Difficulty & target schedule
//!
//! Maintains the acceptance threshold Θ (µ-nats) and derives *share*
//! thresholds used by miners. The retarget loop is fractional:
//!
//! ```text
//!     r_k   = ln(dt_k / T)
//!     r̂_k  = (1−α)^m · r̂_{k−1} + (1 − (1−α)^m) · r_k     (skip-EMA, m blocks)
//!     τ_{k+1} = τ_k − β · r̂_k
//!     Θ_{k+1} = clamp_global(clamp_step(round(τ_{k+1} · 10⁶)))
//! ```
//!
//! with α derived from a half-life `H` in blocks (`α = 1 − 2^(−1/H)`) and
//! β the proportional gain. Blocks arriving too fast (dt < T) raise Θ;
//! too slow (dt > T) lower it; per-step and global clamps bound every move.
//!
//! Share thresholds follow from the Poisson scaling of exceedances for
//! `H(u) = −ln u`: targeting K shares per block puts the share threshold at
//! `τ_share = Θ_nats − ln K`.
//!
//! State is replayable: `(Θ, r̂, α, params)` plus the observed dt sequence
//! reproduce the trajectory exactly. All functions are side-effect free.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::errors::ConsensusError;
use crate::math::clamp;
use crate::{MicroNat, ThetaMicro, MICRO_SCALE};

/// Convert µ-nats to natural-log units.
#[inline]
pub fn micro_to_nats(theta_micro: MicroNat) -> f64 {
    theta_micro as f64 / MICRO_SCALE as f64
}

/// Convert natural-log units to µ-nats (signed; callers clamp).
#[inline]
fn nats_to_micro(tau_nats: f64) -> i64 {
    (tau_nats * MICRO_SCALE as f64).round() as i64
}

fn safe_log(x: f64) -> f64 {
    if x <= 0.0 || !x.is_finite() {
        0.0
    } else {
        x.ln()
    }
}

/// `α = 1 − 2^(−1/H)`: α ≈ 0.0433 for H = 16, α ≈ 0.0285 for H = 24.
fn derive_alpha_from_half_life(half_life_blocks: f64) -> f64 {
    if half_life_blocks <= 0.0 {
        return 1.0;
    }
    1.0 - 2f64.powf(-1.0 / half_life_blocks)
}

// ============================================================================
// Params & state
// ============================================================================

/// Parameters controlling the Θ retarget loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetargetParams {
    /// Target inter-block time T (seconds).
    pub target_block_time_s: f64,
    /// EMA half-life in blocks; larger is smoother.
    pub half_life_blocks: f64,
    /// Proportional gain β ∈ (0, 1.5].
    pub gain_beta: f64,
    /// Per-update absolute clamp on |ΔΘ| (µ-nats).
    pub step_clamp_micro: MicroNat,
    /// Global lower bound for Θ.
    pub theta_min_micro: ThetaMicro,
    /// Global upper bound for Θ.
    pub theta_max_micro: ThetaMicro,
}

impl Default for RetargetParams {
    fn default() -> Self {
        RetargetParams {
            target_block_time_s: 12.0,
            half_life_blocks: 24.0,
            gain_beta: 0.75,
            step_clamp_micro: 400_000,
            theta_min_micro: 500_000,
            theta_max_micro: 30_000_000,
        }
    }
}

impl RetargetParams {
    /// Reject parameter sets the loop cannot run on.
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if !(self.half_life_blocks > 0.0) || !self.half_life_blocks.is_finite() {
            return Err(ConsensusError::theta_invalid_window(self.half_life_blocks));
        }
        if !(self.gain_beta > 0.0 && self.gain_beta <= 1.5) {
            return Err(ConsensusError::theta("gain_beta must lie in (0, 1.5]")
                .with_context("gain_beta", self.gain_beta.to_string()));
        }
        if !(self.target_block_time_s > 0.0) || !self.target_block_time_s.is_finite() {
            return Err(ConsensusError::theta("target_block_time_s must be positive")
                .with_context("target_block_time_s", self.target_block_time_s.to_string()));
        }
        if self.theta_min_micro > self.theta_max_micro {
            return Err(ConsensusError::theta("theta bounds inverted")
                .with_context("theta_min_micro", self.theta_min_micro.to_string())
                .with_context("theta_max_micro", self.theta_max_micro.to_string()));
        }
        Ok(())
    }
}

/// Retarget loop state. Replay-friendly: serialize and resume anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetargetState {
    /// Current acceptance threshold Θ (µ-nats).
    pub theta_micro: ThetaMicro,
    /// Θ in natural units (derived view of `theta_micro`).
    pub tau_nats: f64,
    /// EMA estimate of `ln(dt/T)`.
    pub ema_log_dt_over_t: f64,
    /// Smoothing factor α derived from the half-life.
    pub alpha: f64,
    /// The parameter set evolving this state.
    pub params: RetargetParams,
}

/// Initialize retarget state from validated params and an initial Θ.
pub fn init_state(
    params: RetargetParams,
    theta_init_micro: ThetaMicro,
) -> Result<RetargetState, ConsensusError> {
    params.validate()?;
    Ok(RetargetState {
        theta_micro: theta_init_micro,
        tau_nats: micro_to_nats(theta_init_micro),
        ema_log_dt_over_t: 0.0,
        alpha: derive_alpha_from_half_life(params.half_life_blocks),
        params,
    })
}

/// Advance Θ by one observation of `dt_seconds`.
///
/// `blocks_skipped ≥ 1` rolls the EMA across missing steps with effective
/// smoothing `1 − (1−α)^m`. Pathological dt (non-positive or non-finite)
/// leaves the state unchanged.
pub fn update_theta(
    state: &RetargetState,
    dt_seconds: f64,
    blocks_skipped: u32,
) -> RetargetState {
    if dt_seconds <= 0.0 || !dt_seconds.is_finite() {
        return *state;
    }
    let p = state.params;
    let r_k = safe_log(dt_seconds / p.target_block_time_s.max(1e-9));
    let m = blocks_skipped.max(1);
    let decay = (1.0 - state.alpha).powi(m as i32);
    let r_hat = decay * state.ema_log_dt_over_t + (1.0 - decay) * r_k;

    let tau_next = state.tau_nats - p.gain_beta * r_hat;
    let theta_prev = state.theta_micro;
    let theta_target = nats_to_micro(tau_next);

    // Per-step clamp on |ΔΘ|.
    let max_step = p.step_clamp_micro as i64;
    let delta = clamp(theta_target - theta_prev as i64, -max_step, max_step);
    let theta_stepped = theta_prev as i64 + delta;

    // Global clamps.
    let theta_next =
        clamp(theta_stepped, p.theta_min_micro as i64, p.theta_max_micro as i64) as ThetaMicro;

    trace!(theta_prev, theta_next, r_hat, dt_seconds, "theta retarget step");
    RetargetState {
        theta_micro: theta_next,
        tau_nats: micro_to_nats(theta_next),
        ema_log_dt_over_t: r_hat,
        alpha: state.alpha,
        params: state.params,
    }
}

/// Fold multiple dt samples sequentially (each with `blocks_skipped = 1`).
pub fn update_theta_multi(state: &RetargetState, dt_seconds_samples: &[f64]) -> RetargetState {
    let mut s = *state;
    for &dt in dt_seconds_samples {
        s = update_theta(&s, dt, 1);
    }
    s
}

// ============================================================================
// Share thresholds
// ============================================================================

/// Share threshold in µ-nats targeting ~`shares_per_block` shares per block:
/// `τ_share = Θ_nats − ln K`, clipped to `[0, Θ − 1]`.
pub fn compute_share_micro(theta_micro: ThetaMicro, shares_per_block: f64) -> MicroNat {
    if theta_micro == 0 {
        return 0;
    }
    let k = shares_per_block.max(1.0);
    let tau_share = micro_to_nats(theta_micro) - k.ln();
    if tau_share < 0.0 {
        return 0;
    }
    clamp(nats_to_micro(tau_share), 0, theta_micro as i64 - 1) as MicroNat
}

/// One entry of [`compute_share_tiers`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShareTier {
    /// Multiplicative share target K.
    pub k: u64,
    /// Share threshold for this tier (µ-nats).
    pub theta_share_micro: MicroNat,
    /// `τ_share / Θ` — the minimum d_ratio a share at this tier represents.
    pub d_ratio_min: f64,
}

/// Common share tiers for a ladder of K factors.
pub fn compute_share_tiers(theta_micro: ThetaMicro, factors: &[u64]) -> Vec<ShareTier> {
    let theta_n = micro_to_nats(theta_micro);
    factors
        .iter()
        .map(|&k| {
            let mut tau_s = (theta_n - (k.max(1) as f64).ln()).max(0.0);
            let mut th_s = nats_to_micro(tau_s).max(0) as MicroNat;
            if th_s >= theta_micro {
                th_s = theta_micro.saturating_sub(1);
                tau_s = micro_to_nats(th_s);
            }
            let d_ratio_min = if theta_micro == 0 || theta_n <= 0.0 {
                0.0
            } else {
                (tau_s / theta_n).clamp(0.0, 1.0)
            };
            ShareTier { k, theta_share_micro: th_s, d_ratio_min }
        })
        .collect()
}

/// The default tier ladder.
pub const DEFAULT_SHARE_TIERS: [u64; 8] = [2, 4, 8, 16, 32, 64, 128, 256];
