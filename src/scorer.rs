//! PoIES scorer
//!
//! Maps verified proof *metrics* → ψ (µ-nats), applies caps (per-proof,
//! per-type, Γ), enforces the escort/diversity rule, and evaluates the
//! acceptance predicate
//!
//! ```text
//!     S = base_entropy_micro + Σψ_capped  ≥  Θ_micro
//! ```
//!
//! Metrics are a closed tagged sum ([`ProofMetrics`]) — one variant per proof
//! kind — and scoring hooks are a per-kind function table indexed by stable
//! id ([`ScoreHooks`]). No reflection, no dynamic registration.
//!
//! ## Numerics
//!
//! Hooks compute in `f64` and convert exactly once at the integer boundary:
//! `round(x · 10⁶ + 1e-12)` clamped at 0, with non-finite intermediates
//! mapping to 0. ψ never goes negative and is never carried as a float past
//! this module. Proportional cap downscaling with deterministic rounding is
//! handled by [`crate::caps`].

use std::collections::BTreeMap;

use tracing::debug;

use crate::alpha_tuner::ALPHA_SCALE;
use crate::caps::{apply_all_caps, CapStats, Contribution, PerKindSums};
use crate::policy::{PoiesPolicy, Weights};
use crate::types::ProofKind;
use crate::{MicroNat, ThetaMicro, BP_SCALE};

// ============================================================================
// Metrics (closed tagged sum)
// ============================================================================

/// Quantum work units, either reported directly or synthesized from the
/// circuit shape as `depth · width · ln(1 + shots)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuantumUnits {
    /// Provider-normalized unit count.
    Units(f64),
    /// Synthesize units from circuit depth × width × ln(1 + shots).
    Synth {
        /// Circuit depth.
        depth: f64,
        /// Circuit width (qubits).
        width: f64,
        /// Shot count.
        shots: f64,
    },
}

/// Verified VDF work, in wall-clock seconds or raw iterations (converted via
/// the policy's `iters_to_seconds_nano` knob).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VdfWork {
    /// Seconds-equivalent of verified delay.
    Seconds(f64),
    /// Raw iteration count.
    Iterations(f64),
}

/// Normalized numeric metrics emitted by verifiers, one variant per kind.
///
/// All values are expected finite and non-negative; hooks clamp defensively.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProofMetrics {
    /// Hash-share draw quality.
    Hash {
        /// `share_difficulty / target_difficulty` (≥ 0).
        d_ratio: f64,
    },
    /// Attested AI work.
    Ai {
        /// Normalized compute units.
        ai_units: f64,
        /// Effective replicate count (≥ 1).
        redundancy: f64,
        /// Fraction of trap prompts passed, in `[0, 1]`.
        traps_ratio: f64,
        /// Quality-of-service score, in `[0, 1]`.
        qos: f64,
    },
    /// Attested quantum work.
    Quantum {
        /// Unit count or synthesis inputs.
        units: QuantumUnits,
        /// Fraction of trap circuits passed, in `[0, 1]`.
        traps_ratio: f64,
        /// Quality-of-service score, in `[0, 1]`.
        qos: f64,
    },
    /// Storage heartbeat.
    Storage {
        /// Committed size in GiB.
        size_gib: f64,
        /// Availability over the heartbeat window, in `[0, 1]`.
        availability: f64,
        /// Base gate: ψ is 0 without a live heartbeat.
        heartbeat_ok: bool,
        /// Optional retrieval bonus, in `[0, 1]`.
        retrieval_bonus: f64,
    },
    /// Verifiable delay function.
    Vdf {
        /// Verified delay amount.
        work: VdfWork,
    },
}

impl ProofMetrics {
    /// The proof kind this metrics variant belongs to.
    pub fn kind(&self) -> ProofKind {
        match self {
            ProofMetrics::Hash { .. } => ProofKind::Hash,
            ProofMetrics::Ai { .. } => ProofKind::Ai,
            ProofMetrics::Quantum { .. } => ProofKind::Quantum,
            ProofMetrics::Storage { .. } => ProofKind::Storage,
            ProofMetrics::Vdf { .. } => ProofKind::Vdf,
        }
    }
}

// ============================================================================
// Hooks
// ============================================================================

/// A scoring hook: metrics + policy weights → ψ in µ-nats (non-negative).
pub type ScoreHook = fn(&ProofMetrics, &Weights) -> MicroNat;

/// Per-kind hook table indexed by stable id.
#[derive(Clone)]
pub struct ScoreHooks {
    table: [ScoreHook; 5],
}

impl Default for ScoreHooks {
    fn default() -> Self {
        ScoreHooks {
            table: [score_hash, score_ai, score_quantum, score_storage, score_vdf],
        }
    }
}

impl ScoreHooks {
    /// The hook registered for `kind`.
    #[inline]
    pub fn get(&self, kind: ProofKind) -> ScoreHook {
        self.table[kind.id() as usize - 1]
    }

    /// Replace the hook for `kind` (tests, experiments).
    pub fn set(&mut self, kind: ProofKind, hook: ScoreHook) {
        self.table[kind.id() as usize - 1] = hook;
    }
}

/// Convert a non-negative real ψ (nats) to µ-nats. The `1e-12` nudge keeps
/// values that are exactly representable from landing on a rounding boundary.
fn to_micro(x: f64) -> MicroNat {
    if !x.is_finite() || x <= 0.0 {
        return 0;
    }
    let v = (x * 1_000_000.0 + 1e-12).round();
    if v <= 0.0 {
        0
    } else {
        v as MicroNat
    }
}

#[inline]
fn clamp01(x: f64) -> f64 {
    // NaN propagates to to_micro, which maps it to 0.
    x.clamp(0.0, 1.0)
}

/// Piecewise-linear trap-quality ramp: 0 below `t_min`, 1 above `t_target`.
fn trap_ramp(traps: f64, w: &Weights) -> f64 {
    let t_min = w.t_min_bp as f64 / BP_SCALE as f64;
    let mut t_target = w.t_target_bp as f64 / BP_SCALE as f64;
    if t_target <= t_min {
        t_target = (t_min + 1e-6).min(0.999_999);
    }
    let t = clamp01(traps);
    if t <= t_min {
        0.0
    } else if t >= t_target {
        1.0
    } else {
        (t - t_min) / (t_target - t_min)
    }
}

fn score_hash(metrics: &ProofMetrics, w: &Weights) -> MicroNat {
    let ProofMetrics::Hash { d_ratio } = metrics else { return 0 };
    let k = w.k_ln_micro as f64 / 1e6;
    to_micro(k * d_ratio.max(0.0).ln_1p())
}

fn score_ai(metrics: &ProofMetrics, w: &Weights) -> MicroNat {
    let ProofMetrics::Ai { ai_units, redundancy, traps_ratio, qos } = metrics else { return 0 };
    let units = ai_units.max(0.0);
    let redundancy = redundancy.max(1.0);
    let rho = w.redundancy_exp_milli as f64 / 1e3;
    let k_units = w.k_units_micro as f64 / 1e6;
    let score =
        k_units * units * clamp01(*qos) * trap_ramp(*traps_ratio, w) / redundancy.powf(rho);
    to_micro(score)
}

fn score_quantum(metrics: &ProofMetrics, w: &Weights) -> MicroNat {
    let ProofMetrics::Quantum { units, traps_ratio, qos } = metrics else { return 0 };
    let units = match *units {
        QuantumUnits::Units(u) => u.max(0.0),
        QuantumUnits::Synth { depth, width, shots } => {
            depth.max(0.0) * width.max(0.0) * shots.max(0.0).ln_1p()
        }
    };
    let k_units = w.k_units_micro as f64 / 1e6;
    to_micro(k_units * units * clamp01(*qos) * trap_ramp(*traps_ratio, w))
}

fn score_storage(metrics: &ProofMetrics, w: &Weights) -> MicroNat {
    let ProofMetrics::Storage { size_gib, availability, heartbeat_ok, retrieval_bonus } = metrics
    else {
        return 0;
    };
    if !heartbeat_ok {
        return 0;
    }
    let k_size = w.k_size_micro as f64 / 1e6;
    let alpha = w.availability_exp_milli as f64 / 1e3;
    let score = k_size
        * size_gib.max(0.0)
        * clamp01(*availability).powf(alpha)
        * (1.0 + 0.25 * clamp01(*retrieval_bonus));
    to_micro(score)
}

fn score_vdf(metrics: &ProofMetrics, w: &Weights) -> MicroNat {
    let ProofMetrics::Vdf { work } = metrics else { return 0 };
    let seconds = match *work {
        VdfWork::Seconds(s) => s.max(0.0),
        VdfWork::Iterations(iters) => iters.max(0.0) * (w.iters_to_seconds_nano as f64 * 1e-9),
    };
    let k_sec = w.k_seconds_micro as f64 / 1e6;
    to_micro(k_sec * seconds.ln_1p())
}

// ============================================================================
// Scoring, aggregation, acceptance
// ============================================================================

/// One proof's scoring input.
#[derive(Debug, Clone, PartialEq)]
pub struct ProofInput {
    /// Stable per-proof id (tie-breaker in the cap engine).
    pub proof_id: Vec<u8>,
    /// The envelope's declared kind.
    pub kind: ProofKind,
    /// Normalized metrics from the verifier.
    pub metrics: ProofMetrics,
}

/// α fairness weights by kind, in `ALPHA_SCALE` fixed-point.
pub type AlphaMap = BTreeMap<ProofKind, u64>;

/// Per-proof ψ before and after caps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerProofScore {
    /// Stable proof id.
    pub proof_id: Vec<u8>,
    /// Proof kind.
    pub kind: ProofKind,
    /// ψ as produced by the hook (after α rescale, before caps).
    pub psi_raw_micro: MicroNat,
    /// ψ after per-proof / per-type / Γ caps.
    pub psi_capped_micro: MicroNat,
}

/// Per-stage sums and tables for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreBreakdown {
    /// Θ the vector was scored against.
    pub theta_micro: ThetaMicro,
    /// Base entropy contribution (typically H(u)).
    pub base_entropy_micro: MicroNat,
    /// Γ cap from the policy.
    pub gamma_cap_micro: MicroNat,
    /// Σψ_raw before any caps.
    pub sum_raw: MicroNat,
    /// Σψ after per-proof caps.
    pub sum_after_per_proof: MicroNat,
    /// Σψ after per-type caps.
    pub sum_after_per_type: MicroNat,
    /// Σψ after the Γ cap.
    pub sum_after_gamma: MicroNat,
    /// Per-kind raw sums.
    pub per_type_raw: PerKindSums,
    /// Per-kind sums after per-proof caps.
    pub per_type_after_per_proof: PerKindSums,
    /// Per-kind sums after per-type caps.
    pub per_type_after_per_type: PerKindSums,
    /// Per-kind sums after the Γ cap.
    pub per_type_after_gamma: PerKindSums,
    /// Useful-kind share of Σψ_capped in basis points (when escort applies).
    pub useful_ratio_bp: Option<u64>,
    /// `S − Θ` (negative when the block falls short).
    pub distance_micro: i64,
}

/// Outcome of scoring + acceptance for one proof vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreOutcome {
    /// `S ≥ Θ` **and** the escort rule (if enabled) is satisfied.
    pub accepted: bool,
    /// `S = base_entropy + Σψ_capped`.
    pub score_micro: MicroNat,
    /// Θ the vector was scored against.
    pub theta_micro: ThetaMicro,
    /// Base entropy contribution.
    pub base_entropy_micro: MicroNat,
    /// Whether the escort rule passed (true when the rule is absent).
    pub escort_ok: bool,
    /// Per-proof table aligned with the input order.
    pub per_proof: Vec<PerProofScore>,
    /// Per-stage sums and tables.
    pub breakdown: ScoreBreakdown,
}

/// Compute ψ_raw per proof and return contributions ready for cap
/// processing, plus per-kind raw sums.
///
/// When `alphas` is supplied, each ψ_raw is rescaled by
/// `α_kind / ALPHA_SCALE` (floor, 128-bit widening) before caps — the
/// α-tuner's slow fairness correction.
pub fn score_vector(
    proofs: &[ProofInput],
    policy: &PoiesPolicy,
    hooks: &ScoreHooks,
    alphas: Option<&AlphaMap>,
) -> (Vec<Contribution>, PerKindSums, MicroNat) {
    let mut contributions = Vec::with_capacity(proofs.len());
    let mut per_type_raw: PerKindSums = ProofKind::ALL.iter().map(|&k| (k, 0)).collect();
    let mut sum_raw: MicroNat = 0;
    for p in proofs {
        let weights = policy.weights_for(p.kind);
        let mut psi = hooks.get(p.kind)(&p.metrics, &weights);
        if let Some(alphas) = alphas {
            let alpha = *alphas.get(&p.kind).unwrap_or(&ALPHA_SCALE);
            psi = (psi as u128 * alpha as u128 / ALPHA_SCALE as u128) as MicroNat;
        }
        if let Some(slot) = per_type_raw.get_mut(&p.kind) {
            *slot = slot.saturating_add(psi);
        }
        sum_raw = sum_raw.saturating_add(psi);
        contributions.push(Contribution::new(p.proof_id.clone(), p.kind, psi));
    }
    (contributions, per_type_raw, sum_raw)
}

/// A scored-and-capped proof vector, before any Θ comparison.
///
/// This is the piece the block validator consumes: it supplies its own base
/// entropy (H from the hash shares) and threshold from the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredVector {
    /// Per-proof table aligned with the input order.
    pub per_proof: Vec<PerProofScore>,
    /// Σψ_raw before caps.
    pub sum_raw: MicroNat,
    /// Per-kind raw sums.
    pub per_type_raw: PerKindSums,
    /// Cap-engine stage statistics; `sum_after_gamma` is Σψ_capped.
    pub cap_stats: CapStats,
}

impl ScoredVector {
    /// Σψ_capped — the vector's total contribution to S.
    #[inline]
    pub fn psi_total_micro(&self) -> MicroNat {
        self.cap_stats.sum_after_gamma
    }
}

/// Score a proof vector and run it through the cap engine.
pub fn score_and_cap(
    proofs: &[ProofInput],
    policy: &PoiesPolicy,
    hooks: &ScoreHooks,
    alphas: Option<&AlphaMap>,
) -> ScoredVector {
    let (contribs, per_type_raw, sum_raw) = score_vector(proofs, policy, hooks, alphas);
    let (capped, cap_stats) = apply_all_caps(&contribs, policy);
    let per_proof: Vec<PerProofScore> = contribs
        .iter()
        .zip(&capped)
        .map(|(before, after)| PerProofScore {
            proof_id: before.proof_id.clone(),
            kind: before.kind,
            psi_raw_micro: before.psi_micro,
            psi_capped_micro: after.psi_micro,
        })
        .collect();
    ScoredVector { per_proof, sum_raw, per_type_raw, cap_stats }
}

/// High-level entry: score, cap, check escort, and compare against Θ.
pub fn aggregate_and_accept(
    proofs: &[ProofInput],
    policy: &PoiesPolicy,
    theta_micro: ThetaMicro,
    base_entropy_micro: MicroNat,
    hooks: &ScoreHooks,
    alphas: Option<&AlphaMap>,
) -> ScoreOutcome {
    let scored = score_and_cap(proofs, policy, hooks, alphas);
    let ScoredVector { per_proof, sum_raw, per_type_raw, cap_stats } = scored;

    let sum_capped = cap_stats.sum_after_gamma;
    let score_micro = base_entropy_micro.saturating_add(sum_capped);
    let (escort_ok, useful_ratio_bp) = escort_check(&cap_stats, policy);
    let meets_theta = score_micro >= theta_micro;
    let accepted = meets_theta && escort_ok;
    if !accepted {
        debug!(
            score_micro,
            theta_micro, escort_ok, "proof vector rejected by acceptance predicate"
        );
    }

    let breakdown = ScoreBreakdown {
        theta_micro,
        base_entropy_micro,
        gamma_cap_micro: policy.gamma_cap,
        sum_raw,
        sum_after_per_proof: cap_stats.sum_after_per_proof,
        sum_after_per_type: cap_stats.sum_after_per_type,
        sum_after_gamma: cap_stats.sum_after_gamma,
        per_type_raw,
        per_type_after_per_proof: cap_stats.per_type_after_per_proof,
        per_type_after_per_type: cap_stats.per_type_after_per_type,
        per_type_after_gamma: cap_stats.per_type_after_gamma,
        useful_ratio_bp,
        distance_micro: score_micro as i64 - theta_micro as i64,
    };

    ScoreOutcome {
        accepted,
        score_micro,
        theta_micro,
        base_entropy_micro,
        escort_ok,
        per_proof,
        breakdown,
    }
}

/// Escort/diversity rule: when enabled, the useful-kind share of Σψ_capped
/// must reach `min_useful_ratio_bp`. Integer cross-multiplication only.
pub(crate) fn escort_check(stats: &CapStats, policy: &PoiesPolicy) -> (bool, Option<u64>) {
    let rule = match &policy.escort {
        Some(rule) if rule.enabled => rule,
        _ => return (true, None),
    };
    let total = stats.sum_after_gamma;
    if total == 0 {
        // Nothing to escort: an empty ψ vector cannot violate the mix.
        return (true, Some(0));
    }
    let useful: u128 = rule
        .useful_kinds
        .iter()
        .map(|k| *stats.per_type_after_gamma.get(k).unwrap_or(&0) as u128)
        .sum();
    let ratio_bp = (useful * BP_SCALE as u128 / total as u128) as u64;
    let ok = useful * BP_SCALE as u128 >= rule.min_useful_ratio_bp as u128 * total as u128;
    (ok, Some(ratio_bp))
}
