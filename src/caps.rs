//! Cap engine for PoIES ψ contributions
//!
//! Deliberately *pure*: given a batch of pre-cap ψ values (µ-nats) with their
//! proof kinds, plus a loaded policy, deterministically clip them by
//!
//! 1. per-proof caps,
//! 2. per-type caps, and
//! 3. the total Γ cap,
//!
//! preserving fairness via **proportional downscaling** with deterministic
//! rounding. Escort/diversity constraints are enforced in the scorer, not
//! here; this module only shapes the ψ vector so Σψ never exceeds the
//! configured limits.
//!
//! ## Determinism
//!
//! - All arithmetic is integer (`u128` widening for the `v·T` products).
//! - Reductions are monotone: no stage ever increases a ψ.
//! - Remainder µ-nats after a downscale go to the entries with the largest
//!   fractional remainder `v_i·T mod Σv`, tie-broken by lexicographically
//!   smallest `proof_id` bytes, then by original insertion index.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::policy::PoiesPolicy;
use crate::types::ProofKind;
use crate::MicroNat;

/// A single proof's pre-cap ψ contribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    /// Deterministic tie-breaker, stable per proof (e.g. the nullifier).
    pub proof_id: Vec<u8>,
    /// The proof's kind.
    pub kind: ProofKind,
    /// ψ in µ-nats.
    pub psi_micro: MicroNat,
}

impl Contribution {
    /// Convenience constructor.
    pub fn new(proof_id: impl Into<Vec<u8>>, kind: ProofKind, psi_micro: MicroNat) -> Self {
        Contribution { proof_id: proof_id.into(), kind, psi_micro }
    }
}

/// Per-kind ψ sums, one table per pipeline stage.
pub type PerKindSums = BTreeMap<ProofKind, MicroNat>;

/// Diagnostics for how much clipping happened at each stage (sums in µ-nats).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapStats {
    /// Σψ of the input vector.
    pub sum_in: MicroNat,
    /// Σψ after per-proof caps.
    pub sum_after_per_proof: MicroNat,
    /// Σψ after per-type caps.
    pub sum_after_per_type: MicroNat,
    /// Σψ after the Γ cap (the final sum).
    pub sum_after_gamma: MicroNat,
    /// Per-kind sums of the input vector.
    pub per_type_in: PerKindSums,
    /// Per-kind sums after per-proof caps.
    pub per_type_after_per_proof: PerKindSums,
    /// Per-kind sums after per-type caps.
    pub per_type_after_per_type: PerKindSums,
    /// Per-kind sums after the Γ cap.
    pub per_type_after_gamma: PerKindSums,
}

/// Apply per-proof caps, per-type caps, then the total Γ cap.
///
/// Returns the capped vector (same order as the input) and per-stage
/// statistics for observability.
pub fn apply_all_caps(
    contributions: &[Contribution],
    policy: &PoiesPolicy,
) -> (Vec<Contribution>, CapStats) {
    let sum_in = sum_psi(contributions);
    let per_type_in = sum_psi_by_kind(contributions);

    let stage1 = apply_per_proof_caps(contributions, policy);
    let sum_after_per_proof = sum_psi(&stage1);
    let per_type_after_per_proof = sum_psi_by_kind(&stage1);

    let stage2 = apply_per_type_caps(&stage1, policy);
    let sum_after_per_type = sum_psi(&stage2);
    let per_type_after_per_type = sum_psi_by_kind(&stage2);

    let stage3 = apply_total_gamma_cap(&stage2, policy);
    let sum_after_gamma = sum_psi(&stage3);
    let per_type_after_gamma = sum_psi_by_kind(&stage3);

    let stats = CapStats {
        sum_in,
        sum_after_per_proof,
        sum_after_per_type,
        sum_after_gamma,
        per_type_in,
        per_type_after_per_proof,
        per_type_after_per_type,
        per_type_after_gamma,
    };
    (stage3, stats)
}

// ============================================================================
// Stage implementations
// ============================================================================

/// Clip each ψ to its kind's `per_proof_micro_max`.
fn apply_per_proof_caps(items: &[Contribution], policy: &PoiesPolicy) -> Vec<Contribution> {
    items
        .iter()
        .map(|c| {
            let cap = policy.cap_for(c.kind).per_proof_micro_max;
            Contribution { psi_micro: c.psi_micro.min(cap), ..c.clone() }
        })
        .collect()
}

/// For each kind independently: if Σψ_kind exceeds the kind's cap, scale that
/// kind's entries down proportionally with deterministic rounding.
fn apply_per_type_caps(items: &[Contribution], policy: &PoiesPolicy) -> Vec<Contribution> {
    let mut out = items.to_vec();
    for kind in ProofKind::ALL {
        let idxs: Vec<usize> =
            out.iter().enumerate().filter(|(_, c)| c.kind == kind).map(|(i, _)| i).collect();
        if idxs.is_empty() {
            continue;
        }
        let cap = policy.cap_for(kind).per_type_micro;
        let cur_sum: u128 = idxs.iter().map(|&i| out[i].psi_micro as u128).sum();
        if cur_sum <= cap as u128 {
            continue;
        }
        let vec: Vec<MicroNat> = idxs.iter().map(|&i| out[i].psi_micro).collect();
        let ids: Vec<&[u8]> = idxs.iter().map(|&i| out[i].proof_id.as_slice()).collect();
        let scaled = proportional_downscale(&vec, cap, &ids);
        for (j, &i) in idxs.iter().enumerate() {
            out[i].psi_micro = scaled[j];
        }
    }
    out
}

/// If Σψ exceeds Γ, scale the entire vector proportionally.
fn apply_total_gamma_cap(items: &[Contribution], policy: &PoiesPolicy) -> Vec<Contribution> {
    let total: u128 = items.iter().map(|c| c.psi_micro as u128).sum();
    if total <= policy.gamma_cap as u128 {
        return items.to_vec();
    }
    let vec: Vec<MicroNat> = items.iter().map(|c| c.psi_micro).collect();
    let ids: Vec<&[u8]> = items.iter().map(|c| c.proof_id.as_slice()).collect();
    let scaled = proportional_downscale(&vec, policy.gamma_cap, &ids);
    items
        .iter()
        .zip(scaled)
        .map(|(c, psi)| Contribution { psi_micro: psi, ..c.clone() })
        .collect()
}

// ============================================================================
// Sums & scaling
// ============================================================================

fn sum_psi(items: &[Contribution]) -> MicroNat {
    items.iter().fold(0u64, |acc, c| acc.saturating_add(c.psi_micro))
}

fn sum_psi_by_kind(items: &[Contribution]) -> PerKindSums {
    let mut acc: PerKindSums = ProofKind::ALL.iter().map(|&k| (k, 0)).collect();
    for c in items {
        if let Some(slot) = acc.get_mut(&c.kind) {
            *slot = slot.saturating_add(c.psi_micro);
        }
    }
    acc
}

/// Deterministically scale `values` so the output sums to exactly
/// `min(target_sum, Σ values)`, preserving proportions as closely as
/// possible.
///
/// Algorithm: `base_i = ⌊v_i · T / Σv⌋`, then the remainder
/// `R = T − Σ base_i` is distributed as `+1` to the entries with the largest
/// `v_i · T mod Σv`, ties broken by smallest `proof_id` bytes, then original
/// index. Inputs with `v = 0` or `T = 0` map to 0; `Σv ≤ T` returns the
/// vector unchanged (reductions never increase).
pub fn proportional_downscale(
    values: &[MicroNat],
    target_sum: MicroNat,
    ids_for_tiebreak: &[&[u8]],
) -> Vec<MicroNat> {
    debug_assert_eq!(values.len(), ids_for_tiebreak.len(), "values and ids must align");
    let n = values.len();
    if target_sum == 0 {
        return vec![0; n];
    }
    let total: u128 = values.iter().map(|&v| v as u128).sum();
    if total == 0 {
        return vec![0; n];
    }
    if total <= target_sum as u128 {
        return values.to_vec();
    }

    let mut bases: Vec<MicroNat> = Vec::with_capacity(n);
    // (remainder, proof_id, original index) — sorted descending by remainder,
    // ascending by id then index.
    let mut fracs: Vec<(u128, &[u8], usize)> = Vec::with_capacity(n);
    for (i, (&v, &id)) in values.iter().zip(ids_for_tiebreak).enumerate() {
        if v == 0 {
            bases.push(0);
            fracs.push((0, id, i));
            continue;
        }
        let scaled = v as u128 * target_sum as u128;
        bases.push((scaled / total) as MicroNat);
        fracs.push((scaled % total, id, i));
    }

    let assigned: u128 = bases.iter().map(|&b| b as u128).sum();
    let mut remaining = (target_sum as u128).saturating_sub(assigned) as usize;
    if remaining == 0 {
        return bases;
    }

    fracs.sort_by_key(|&(rem, id, idx)| (Reverse(rem), id, idx));
    let mut out = bases;
    for &(_, _, idx) in fracs.iter().take(remaining.min(n)) {
        out[idx] += 1;
        remaining -= 1;
        if remaining == 0 {
            break;
        }
    }
    out
}
