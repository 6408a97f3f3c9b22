//! Block validator
//!
//! Recomputes the PoIES acceptance score `S = H(u) + Σψ` for a candidate
//! block, enforces policy roots and nullifier freshness, and checks `S ≥ Θ`
//! at the header's height. Pipeline stages, short-circuiting on the first
//! failure:
//!
//! 1. root binding (header vs. policy snapshot),
//! 2. nullifier freshness (in-block duplicates and the TTL store),
//! 3. deterministic verification of every envelope via the registry,
//! 4. metrics → ψ through the scorer (caps applied inside),
//! 5. escort/diversity check over the capped vector,
//! 6. H(u) from verified hash-share metrics; accept iff `S ≥ Θ`,
//! 7. commit: nullifiers are recorded only after acceptance.
//!
//! Everything up to stage 7 is pure with respect to the inputs; only
//! `NullifierStore::record` mutates, and only at the commit point. A
//! rejected block re-submitted against the same chain state yields the same
//! `(reason, bad_stage, bad_index)`.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::errors::ConsensusError;
use crate::policy::PoiesPolicy;
use crate::scorer::{
    escort_check, score_and_cap, AlphaMap, ProofInput, ProofMetrics, ScoreBreakdown, ScoreHooks,
    ScoredVector,
};
use crate::types::ProofKind;
use crate::verifier::{HeaderView, PolicySnapshot, ProofEnvelope, VerifierRegistry};
use crate::{Hash32, Height, MicroNat, ThetaMicro};

// ============================================================================
// Dependency seams
// ============================================================================

/// Sliding-window TTL store for proof nullifiers. Backed by persistent KV in
/// production; [`MemoryNullifierStore`] serves tests and single-node tools.
///
/// `record` must be idempotent; the validator calls it at most once per
/// accepted block for a given nullifier.
pub trait NullifierStore {
    /// Whether `nullifier` is live in the TTL window.
    fn seen(&self, nullifier: &Hash32) -> bool;
    /// Record `nullifier` as first seen at `height`.
    fn record(&mut self, nullifier: &Hash32, height: Height);
}

/// Maps verified proof metrics to a capped ψ vector. The default
/// implementation is [`PoiesScorer`]; tests can inject failures.
pub trait BlockScorer {
    /// Score and cap `proofs` under `policy`.
    fn score(
        &self,
        proofs: &[ProofInput],
        policy: &PoiesPolicy,
    ) -> Result<ScoredVector, ConsensusError>;
}

/// The standard scorer: default hooks, optional α fairness weights.
#[derive(Default, Clone)]
pub struct PoiesScorer {
    hooks: ScoreHooks,
    alphas: Option<AlphaMap>,
}

impl PoiesScorer {
    /// Default hooks, no α rescaling.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given α weights (from the α-tuner) when scoring.
    pub fn with_alphas(mut self, alphas: AlphaMap) -> Self {
        self.alphas = Some(alphas);
        self
    }

    /// Replace the hook table.
    pub fn with_hooks(mut self, hooks: ScoreHooks) -> Self {
        self.hooks = hooks;
        self
    }
}

impl BlockScorer for PoiesScorer {
    fn score(
        &self,
        proofs: &[ProofInput],
        policy: &PoiesPolicy,
    ) -> Result<ScoredVector, ConsensusError> {
        Ok(score_and_cap(proofs, policy, &self.hooks, self.alphas.as_ref()))
    }
}

/// In-memory nullifier store: nullifier → first-seen height.
#[derive(Debug, Default, Clone)]
pub struct MemoryNullifierStore {
    first_seen: BTreeMap<Hash32, Height>,
}

impl MemoryNullifierStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nullifiers.
    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }

    /// First-seen height for `nullifier`, if live.
    pub fn first_seen_height(&self, nullifier: &Hash32) -> Option<Height> {
        self.first_seen.get(nullifier).copied()
    }

    /// Drop nullifiers whose TTL window has elapsed at `current_height`.
    pub fn prune(&mut self, current_height: Height, ttl_blocks: u64) {
        self.first_seen.retain(|_, &mut h0| current_height.saturating_sub(h0) < ttl_blocks);
    }
}

impl NullifierStore for MemoryNullifierStore {
    fn seen(&self, nullifier: &Hash32) -> bool {
        self.first_seen.contains_key(nullifier)
    }

    fn record(&mut self, nullifier: &Hash32, height: Height) {
        // Idempotent: the first-seen height wins.
        self.first_seen.entry(*nullifier).or_insert(height);
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Which pipeline stage rejected the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// A nullifier repeated in-block or within the TTL window.
    DuplicateNullifier,
    /// A verifier rejected an envelope (or dispatch failed).
    Verifier,
    /// Scoring, policy binding, or the acceptance comparison failed.
    Score,
}

impl Stage {
    /// Stable tag for logs and RPC surfaces.
    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::DuplicateNullifier => "duplicate-nullifier",
            Stage::Verifier => "verifier",
            Stage::Score => "score",
        }
    }
}

/// Full result of validating one candidate block.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    /// Whether the block is admissible.
    pub ok: bool,
    /// Deterministic rejection reason (`None` on acceptance).
    pub reason: Option<String>,
    /// Θ from the header (µ-nats).
    pub theta_micro: ThetaMicro,
    /// H(u) recomputed from hash-share metrics (µ-nats).
    pub h_micro: MicroNat,
    /// Σψ_capped (µ-nats).
    pub psi_micro: MicroNat,
    /// `S = H + Σψ` (µ-nats).
    pub s_micro: MicroNat,
    /// Index of the offending envelope, when a stage pinpoints one.
    pub bad_index: Option<usize>,
    /// The stage that rejected the block.
    pub bad_stage: Option<Stage>,
    /// Canonicalized envelopes for receipts hashing (populated once every
    /// envelope has verified).
    pub normalized_envelopes: Vec<ProofEnvelope>,
    /// Scorer breakdown (populated once scoring ran).
    pub breakdown: Option<ScoreBreakdown>,
}

impl ValidationOutcome {
    fn rejected(
        header: &HeaderView,
        reason: impl Into<String>,
        stage: Stage,
        bad_index: Option<usize>,
    ) -> Self {
        ValidationOutcome {
            ok: false,
            reason: Some(reason.into()),
            theta_micro: header.theta_micro,
            h_micro: 0,
            psi_micro: 0,
            s_micro: 0,
            bad_index,
            bad_stage: Some(stage),
            normalized_envelopes: Vec::new(),
            breakdown: None,
        }
    }
}

// ============================================================================
// Core
// ============================================================================

/// End-to-end validation of a block's proof set against header and policy.
///
/// Only `nullifiers.record` mutates, and only after acceptance is known.
pub fn validate_block(
    header: &HeaderView,
    proofs: &[ProofEnvelope],
    policy: &PoiesPolicy,
    snapshot: &PolicySnapshot,
    verifiers: &VerifierRegistry,
    scorer: &dyn BlockScorer,
    nullifiers: &mut dyn NullifierStore,
) -> ValidationOutcome {
    // (1) Policy root binding.
    if header.policy_alg_root != snapshot.alg_policy_root {
        debug!(
            header_root = %hex::encode(header.policy_alg_root),
            policy_root = %hex::encode(snapshot.alg_policy_root),
            "rejecting block: alg policy root mismatch"
        );
        return ValidationOutcome::rejected(header, "alg-policy-root-mismatch", Stage::Score, None);
    }

    // (2) Nullifier freshness: in-block duplicates and the TTL window.
    let mut local_seen: BTreeSet<Hash32> = BTreeSet::new();
    for (i, env) in proofs.iter().enumerate() {
        if local_seen.contains(&env.nullifier) || nullifiers.seen(&env.nullifier) {
            debug!(index = i, nullifier = %hex::encode(env.nullifier), "duplicate nullifier");
            return ValidationOutcome::rejected(
                header,
                "duplicate-nullifier",
                Stage::DuplicateNullifier,
                Some(i),
            );
        }
        local_seen.insert(env.nullifier);
    }

    // (3) Verify each envelope in input order.
    let mut verified: Vec<ProofInput> = Vec::with_capacity(proofs.len());
    let mut normalized: Vec<ProofEnvelope> = Vec::with_capacity(proofs.len());
    for (i, env) in proofs.iter().enumerate() {
        let result = match verifiers.verify(env, header, snapshot) {
            Ok(result) => result,
            Err(e) => {
                return ValidationOutcome::rejected(
                    header,
                    format!("verifier-exception:{}", e.kind_slug()),
                    Stage::Verifier,
                    Some(i),
                );
            }
        };
        if !result.ok {
            let why = result.reason.as_deref().unwrap_or("unspecified");
            return ValidationOutcome::rejected(
                header,
                format!("proof-invalid:{why}"),
                Stage::Verifier,
                Some(i),
            );
        }
        let (Some(kind), Some(metrics)) = (ProofKind::from_id(env.type_id), result.metrics)
        else {
            // An ok result must carry metrics for a known kind.
            return ValidationOutcome::rejected(
                header,
                "proof-invalid:missing-metrics",
                Stage::Verifier,
                Some(i),
            );
        };
        normalized.push(ProofEnvelope {
            type_id: env.type_id,
            body_cbor: result.normalized_body,
            nullifier: env.nullifier,
        });
        verified.push(ProofInput { proof_id: env.nullifier.to_vec(), kind, metrics });
    }

    // (4) Score Σψ (caps inside).
    let scored = match scorer.score(&verified, policy) {
        Ok(scored) => scored,
        Err(e) => {
            return ValidationOutcome::rejected(
                header,
                format!("score-error:{}", e.kind_slug()),
                Stage::Score,
                None,
            );
        }
    };
    let psi_micro = scored.psi_total_micro();

    // (5) Escort/diversity over the capped vector.
    let (escort_ok, useful_ratio_bp) = escort_check(&scored.cap_stats, policy);
    if !escort_ok {
        return ValidationOutcome {
            breakdown: Some(breakdown_for(header, policy, &scored, 0, useful_ratio_bp)),
            psi_micro,
            ..ValidationOutcome::rejected(header, "escort-ratio-below-minimum", Stage::Score, None)
        };
    }

    // (6) H(u) from hash shares; accept iff S ≥ Θ.
    let h_micro = compute_h_micro_from_hash_shares(&verified);
    let s_micro = h_micro.saturating_add(psi_micro);
    let theta = header.theta_micro;
    if s_micro < theta {
        debug!(s_micro, theta, "rejecting block: below theta");
        return ValidationOutcome {
            h_micro,
            psi_micro,
            s_micro,
            normalized_envelopes: normalized,
            breakdown: Some(breakdown_for(header, policy, &scored, h_micro, useful_ratio_bp)),
            ..ValidationOutcome::rejected(header, "below-theta", Stage::Score, None)
        };
    }

    // (7) Commit: record nullifiers only after acceptance.
    for env in proofs {
        nullifiers.record(&env.nullifier, header.height);
    }

    ValidationOutcome {
        ok: true,
        reason: None,
        theta_micro: theta,
        h_micro,
        psi_micro,
        s_micro,
        bad_index: None,
        bad_stage: None,
        normalized_envelopes: normalized,
        breakdown: Some(breakdown_for(header, policy, &scored, h_micro, useful_ratio_bp)),
    }
}

/// `H_micro = round(max_i ln(max(1, d_ratio_i)) · 10⁶)` over verified HASH
/// proofs; 0 when none are present.
///
/// Under the exponential race model the best hash share's `d_ratio`
/// approximates `e^{H(u)}`, so `ln` of the best ratio recovers the entropy
/// term. Ratios at or below 1 contribute nothing.
fn compute_h_micro_from_hash_shares(items: &[ProofInput]) -> MicroNat {
    let mut best_ln: f64 = 0.0;
    for item in items {
        let ProofMetrics::Hash { d_ratio } = item.metrics else { continue };
        if !d_ratio.is_finite() || d_ratio <= 1.0 {
            continue;
        }
        best_ln = best_ln.max(d_ratio.ln());
    }
    let v = (best_ln * 1_000_000.0).round();
    if v <= 0.0 {
        0
    } else {
        v as MicroNat
    }
}

fn breakdown_for(
    header: &HeaderView,
    policy: &PoiesPolicy,
    scored: &ScoredVector,
    h_micro: MicroNat,
    useful_ratio_bp: Option<u64>,
) -> ScoreBreakdown {
    let s = h_micro.saturating_add(scored.psi_total_micro());
    ScoreBreakdown {
        theta_micro: header.theta_micro,
        base_entropy_micro: h_micro,
        gamma_cap_micro: policy.gamma_cap,
        sum_raw: scored.sum_raw,
        sum_after_per_proof: scored.cap_stats.sum_after_per_proof,
        sum_after_per_type: scored.cap_stats.sum_after_per_type,
        sum_after_gamma: scored.cap_stats.sum_after_gamma,
        per_type_raw: scored.per_type_raw.clone(),
        per_type_after_per_proof: scored.cap_stats.per_type_after_per_proof.clone(),
        per_type_after_per_type: scored.cap_stats.per_type_after_per_type.clone(),
        per_type_after_gamma: scored.cap_stats.per_type_after_gamma.clone(),
        useful_ratio_bp,
        distance_micro: s as i64 - header.theta_micro as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::QuantumUnits;
    use crate::verifier::{ProofVerifier, VerificationResult};
    use serde_json::json;

    /// Test verifier: derives its metrics from the first body byte so one
    /// registry entry can serve many envelopes.
    struct ByteVerifier {
        kind: ProofKind,
    }

    impl ProofVerifier for ByteVerifier {
        fn kind(&self) -> ProofKind {
            self.kind
        }
        fn verify(
            &self,
            envelope: &ProofEnvelope,
            _header: &HeaderView,
            _policy: &PolicySnapshot,
        ) -> VerificationResult {
            let Some(&b) = envelope.body_cbor.first() else {
                return VerificationResult::reject("schema-invalid");
            };
            let x = b as f64 / 10.0;
            let metrics = match self.kind {
                ProofKind::Hash => ProofMetrics::Hash { d_ratio: x },
                ProofKind::Ai => ProofMetrics::Ai {
                    ai_units: x,
                    redundancy: 1.0,
                    traps_ratio: 0.9,
                    qos: 0.9,
                },
                ProofKind::Quantum => ProofMetrics::Quantum {
                    units: QuantumUnits::Units(x),
                    traps_ratio: 0.95,
                    qos: 0.95,
                },
                ProofKind::Storage => ProofMetrics::Storage {
                    size_gib: x * 100.0,
                    availability: 1.0,
                    heartbeat_ok: true,
                    retrieval_bonus: 0.0,
                },
                ProofKind::Vdf => ProofMetrics::Vdf {
                    work: crate::scorer::VdfWork::Seconds(x),
                },
            };
            VerificationResult::accept(metrics, envelope.body_cbor.clone())
        }
    }

    struct RejectingVerifier;
    impl ProofVerifier for RejectingVerifier {
        fn kind(&self) -> ProofKind {
            ProofKind::Vdf
        }
        fn verify(
            &self,
            _e: &ProofEnvelope,
            _h: &HeaderView,
            _p: &PolicySnapshot,
        ) -> VerificationResult {
            VerificationResult::reject("attest-chain-invalid")
        }
    }

    struct ErrScorer;
    impl BlockScorer for ErrScorer {
        fn score(
            &self,
            _proofs: &[ProofInput],
            _policy: &PoiesPolicy,
        ) -> Result<ScoredVector, ConsensusError> {
            Err(ConsensusError::generic("negative psi from hook"))
        }
    }

    const ALG_ROOT: Hash32 = [0x44; 32];

    fn policy() -> PoiesPolicy {
        PoiesPolicy::from_json_value(&json!({
            "gamma_cap_micro": 12_000_000,
            "caps": {
                "per_type_micro": {
                    "HASH": 5_000_000, "AI": 7_000_000, "QUANTUM": 7_000_000,
                    "STORAGE": 6_000_000, "VDF": 6_000_000,
                },
                "per_proof_micro_max": {
                    "HASH": 3_000_000, "AI": 5_000_000, "QUANTUM": 5_000_000,
                    "STORAGE": 4_000_000, "VDF": 4_000_000,
                },
            },
            "weights": {
                "AI": { "k_units_micro": 1_200_000 },
                "QUANTUM": { "k_units_micro": 1_800_000 },
            },
        }))
        .unwrap()
    }

    fn header(theta_micro: u64) -> HeaderView {
        HeaderView {
            hash: [0x11; 32],
            height: 64,
            chain_id: 1,
            theta_micro,
            da_root: [0x22; 32],
            proofs_root: [0x33; 32],
            policy_alg_root: ALG_ROOT,
            mix_seed: [0x55; 32],
            parent_hash: Some([0x10; 32]),
        }
    }

    fn registry() -> VerifierRegistry {
        let mut reg = VerifierRegistry::new();
        for kind in [ProofKind::Hash, ProofKind::Ai, ProofKind::Quantum, ProofKind::Storage] {
            reg.register(Box::new(ByteVerifier { kind })).unwrap();
        }
        reg
    }

    fn envelope(type_id: u8, body_byte: u8, nullifier_byte: u8) -> ProofEnvelope {
        ProofEnvelope {
            type_id,
            body_cbor: vec![body_byte],
            nullifier: [nullifier_byte; 32],
        }
    }

    /// HASH d_ratio 2.0 (body 20), AI 3 units (body 30), QUANTUM 1 unit
    /// (body 10).
    fn good_proofs() -> Vec<ProofEnvelope> {
        vec![envelope(1, 20, 0xa1), envelope(2, 30, 0xa2), envelope(3, 10, 0xa3)]
    }

    #[test]
    fn accepts_and_commits_nullifiers() {
        let policy = policy();
        let snapshot = PolicySnapshot::allow_all(ALG_ROOT);
        let reg = registry();
        let mut store = MemoryNullifierStore::new();
        let out = validate_block(
            &header(5_000_000),
            &good_proofs(),
            &policy,
            &snapshot,
            &reg,
            &PoiesScorer::new(),
            &mut store,
        );
        assert!(out.ok, "reason: {:?}", out.reason);
        // H = ln 2 from the best hash share.
        assert_eq!(out.h_micro, 693_147);
        // ψ: HASH 0.25·ln3, AI 1.2·3·0.9·1 (traps 0.9 ≥ t_target), QUANTUM
        // 1.8·1·0.95·1 (traps 0.95 ≥ 0.9).
        assert_eq!(out.psi_micro, 274_653 + 3_240_000 + 1_710_000);
        assert_eq!(out.s_micro, out.h_micro + out.psi_micro);
        assert!(out.s_micro >= out.theta_micro);
        assert_eq!(out.bad_stage, None);
        assert_eq!(out.normalized_envelopes.len(), 3);
        // Commit point: all three nullifiers recorded at the header height.
        assert_eq!(store.len(), 3);
        assert_eq!(store.first_seen_height(&[0xa2; 32]), Some(64));
        let bd = out.breakdown.unwrap();
        assert_eq!(bd.sum_after_gamma, out.psi_micro);
        assert_eq!(bd.distance_micro, out.s_micro as i64 - 5_000_000);
    }

    #[test]
    fn duplicate_nullifier_in_block_rejects_without_mutation() {
        let policy = policy();
        let snapshot = PolicySnapshot::allow_all(ALG_ROOT);
        let reg = registry();
        let mut store = MemoryNullifierStore::new();
        let proofs = vec![envelope(1, 20, 0xb1), envelope(2, 30, 0xb1)];
        let out = validate_block(
            &header(1_000),
            &proofs,
            &policy,
            &snapshot,
            &reg,
            &PoiesScorer::new(),
            &mut store,
        );
        assert!(!out.ok);
        assert_eq!(out.reason.as_deref(), Some("duplicate-nullifier"));
        assert_eq!(out.bad_index, Some(1));
        assert_eq!(out.bad_stage, Some(Stage::DuplicateNullifier));
        assert!(store.is_empty(), "no nullifier may be recorded on rejection");
    }

    #[test]
    fn nullifier_live_in_store_rejects_first_offender() {
        let policy = policy();
        let snapshot = PolicySnapshot::allow_all(ALG_ROOT);
        let reg = registry();
        let mut store = MemoryNullifierStore::new();
        store.record(&[0xa1; 32], 10);
        let out = validate_block(
            &header(1_000),
            &good_proofs(),
            &policy,
            &snapshot,
            &reg,
            &PoiesScorer::new(),
            &mut store,
        );
        assert_eq!(out.bad_index, Some(0));
        assert_eq!(out.bad_stage, Some(Stage::DuplicateNullifier));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn policy_root_mismatch_short_circuits_before_verifiers() {
        let policy = policy();
        let snapshot = PolicySnapshot::allow_all([0x99; 32]);
        // Empty registry: if verification ran, we would see a dispatch error
        // instead of the root mismatch.
        let reg = VerifierRegistry::new();
        let mut store = MemoryNullifierStore::new();
        let out = validate_block(
            &header(1_000),
            &good_proofs(),
            &policy,
            &snapshot,
            &reg,
            &PoiesScorer::new(),
            &mut store,
        );
        assert!(!out.ok);
        assert_eq!(out.reason.as_deref(), Some("alg-policy-root-mismatch"));
        assert_eq!(out.bad_stage, Some(Stage::Score));
        assert!(out.normalized_envelopes.is_empty());
    }

    #[test]
    fn verifier_rejection_surfaces_reason_and_index() {
        let policy = policy();
        let snapshot = PolicySnapshot::allow_all(ALG_ROOT);
        let mut reg = registry();
        reg.register(Box::new(RejectingVerifier)).unwrap();
        let mut store = MemoryNullifierStore::new();
        let proofs = vec![envelope(1, 20, 0xc1), envelope(5, 1, 0xc2)];
        let out = validate_block(
            &header(1_000),
            &proofs,
            &policy,
            &snapshot,
            &reg,
            &PoiesScorer::new(),
            &mut store,
        );
        assert_eq!(out.reason.as_deref(), Some("proof-invalid:attest-chain-invalid"));
        assert_eq!(out.bad_index, Some(1));
        assert_eq!(out.bad_stage, Some(Stage::Verifier));
        assert!(store.is_empty());
    }

    #[test]
    fn unknown_type_id_is_a_verifier_exception() {
        let policy = policy();
        let snapshot = PolicySnapshot::allow_all(ALG_ROOT);
        let reg = registry();
        let mut store = MemoryNullifierStore::new();
        let out = validate_block(
            &header(1_000),
            &[envelope(9, 1, 0xd1)],
            &policy,
            &snapshot,
            &reg,
            &PoiesScorer::new(),
            &mut store,
        );
        assert!(out.reason.as_deref().unwrap().starts_with("verifier-exception:"));
        assert_eq!(out.bad_stage, Some(Stage::Verifier));
        assert_eq!(out.bad_index, Some(0));
    }

    #[test]
    fn disabled_kind_rejects_deterministically() {
        let policy = policy();
        let mut snapshot = PolicySnapshot::allow_all(ALG_ROOT);
        snapshot.enabled.insert(ProofKind::Ai, false);
        let reg = registry();
        let mut store = MemoryNullifierStore::new();
        let out = validate_block(
            &header(1_000),
            &good_proofs(),
            &policy,
            &snapshot,
            &reg,
            &PoiesScorer::new(),
            &mut store,
        );
        assert_eq!(out.reason.as_deref(), Some("proof-invalid:disabled-by-policy"));
        assert_eq!(out.bad_index, Some(1));
    }

    #[test]
    fn below_theta_keeps_breakdown_and_normalized_envelopes() {
        let policy = policy();
        let snapshot = PolicySnapshot::allow_all(ALG_ROOT);
        let reg = registry();
        let mut store = MemoryNullifierStore::new();
        let out = validate_block(
            &header(50_000_000),
            &good_proofs(),
            &policy,
            &snapshot,
            &reg,
            &PoiesScorer::new(),
            &mut store,
        );
        assert!(!out.ok);
        assert_eq!(out.reason.as_deref(), Some("below-theta"));
        assert_eq!(out.bad_stage, Some(Stage::Score));
        assert_eq!(out.normalized_envelopes.len(), 3);
        assert!(out.breakdown.is_some());
        assert!(out.s_micro > 0);
        assert!(store.is_empty());
    }

    #[test]
    fn scorer_error_maps_to_score_stage() {
        let policy = policy();
        let snapshot = PolicySnapshot::allow_all(ALG_ROOT);
        let reg = registry();
        let mut store = MemoryNullifierStore::new();
        let out = validate_block(
            &header(1_000),
            &good_proofs(),
            &policy,
            &snapshot,
            &reg,
            &ErrScorer,
            &mut store,
        );
        assert_eq!(out.reason.as_deref(), Some("score-error:consensus"));
        assert_eq!(out.bad_stage, Some(Stage::Score));
    }

    #[test]
    fn escort_violation_rejects_hash_only_blocks() {
        let policy = PoiesPolicy::from_json_value(&json!({
            "gamma_cap_micro": 12_000_000,
            "escort": {
                "enabled": true,
                "min_useful_ratio_bp": 3000,
                "useful_types": ["AI", "QUANTUM", "STORAGE", "VDF"],
            },
            "caps": { "per_type_micro": { "HASH": 5_000_000 } },
        }))
        .unwrap();
        let snapshot = PolicySnapshot::allow_all(ALG_ROOT);
        let reg = registry();
        let mut store = MemoryNullifierStore::new();
        let out = validate_block(
            &header(1_000),
            &[envelope(1, 50, 0xe1)],
            &policy,
            &snapshot,
            &reg,
            &PoiesScorer::new(),
            &mut store,
        );
        assert_eq!(out.reason.as_deref(), Some("escort-ratio-below-minimum"));
        assert_eq!(out.bad_stage, Some(Stage::Score));
        assert!(store.is_empty());
    }

    #[test]
    fn rejection_is_deterministic_across_resubmission() {
        let policy = policy();
        let snapshot = PolicySnapshot::allow_all(ALG_ROOT);
        let reg = registry();
        let run = || {
            let mut store = MemoryNullifierStore::new();
            validate_block(
                &header(50_000_000),
                &good_proofs(),
                &policy,
                &snapshot,
                &reg,
                &PoiesScorer::new(),
                &mut store,
            )
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn no_hash_share_means_zero_base_entropy() {
        let policy = policy();
        let snapshot = PolicySnapshot::allow_all(ALG_ROOT);
        let reg = registry();
        let mut store = MemoryNullifierStore::new();
        let out = validate_block(
            &header(1_000),
            &[envelope(2, 30, 0xf1)],
            &policy,
            &snapshot,
            &reg,
            &PoiesScorer::new(),
            &mut store,
        );
        assert!(out.ok);
        assert_eq!(out.h_micro, 0);
        // d_ratio ≤ 1 also contributes nothing.
        let mut store = MemoryNullifierStore::new();
        let out = validate_block(
            &header(1_000),
            &[envelope(1, 5, 0xf2)],
            &policy,
            &snapshot,
            &reg,
            &PoiesScorer::new(),
            &mut store,
        );
        assert_eq!(out.h_micro, 0);
    }

    #[test]
    fn memory_store_prunes_expired_windows_and_keeps_first_height() {
        let mut store = MemoryNullifierStore::new();
        store.record(&[1; 32], 100);
        store.record(&[1; 32], 120); // idempotent: first height wins
        store.record(&[2; 32], 150);
        assert_eq!(store.first_seen_height(&[1; 32]), Some(100));
        store.prune(199, 100);
        assert!(!store.seen(&[1; 32]), "height 100 is out of a 100-block window at 199");
        assert!(store.seen(&[2; 32]));
    }

    #[test]
    fn accepted_block_feeds_fork_choice() {
        use crate::fork_choice::ForkChoice;

        let policy = policy();
        let snapshot = PolicySnapshot::allow_all(ALG_ROOT);
        let reg = registry();
        let mut store = MemoryNullifierStore::new();
        let head = header(5_000_000);
        let out = validate_block(
            &head,
            &good_proofs(),
            &policy,
            &snapshot,
            &reg,
            &PoiesScorer::new(),
            &mut store,
        );
        assert!(out.ok);

        let mut fc = ForkChoice::new([0x10; 32], 0, 63);
        let res = fc.add_block(head.hash, [0x10; 32], head.height, head.theta_micro);
        assert!(res.accepted && res.became_best);
        assert_eq!(fc.best_tip().hash, head.hash);
    }
}
