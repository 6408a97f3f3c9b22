//! Consensus ⇄ proof-verifier interfaces
//!
//! Narrow, stable types and the protocol the consensus layer uses to talk to
//! proof verifiers. The heavy cryptography lives behind [`ProofVerifier`];
//! consensus stays agnostic to proof kinds beyond the stable `type_id`.
//!
//! Verifiers MUST be pure functions of their inputs — no clocks, no I/O, no
//! randomness — and MUST return a canonicalized body (stable map ordering)
//! so the proofs-root hashing is reproducible everywhere. The helper
//! [`canonicalize_cbor`] implements the canonical form: maps sorted by the
//! byte encoding of their keys, applied recursively.
//!
//! Nothing here mutates global state; nullifier and policy-root enforcement
//! happen in [`crate::validator`] using the data verifiers return.

use std::collections::BTreeMap;

use ciborium::value::Value as CborValue;

use crate::errors::ConsensusError;
use crate::scorer::ProofMetrics;
use crate::types::ProofKind;
use crate::{Hash32, Height, ThetaMicro};

// ============================================================================
// Wire views
// ============================================================================

/// Generic proof envelope as carried in a block. The body is opaque,
/// CBOR-encoded; the nullifier is a per-proof replay-prevention tag under a
/// domain-separated hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofEnvelope {
    /// Stable proof-kind id (see [`ProofKind::id`]).
    pub type_id: u8,
    /// Opaque canonical-CBOR body.
    pub body_cbor: Vec<u8>,
    /// 32-byte replay-prevention tag, tracked in a sliding TTL window.
    pub nullifier: Hash32,
}

/// Minimal header view needed by verifiers and the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderView {
    /// Canonical header hash.
    pub hash: Hash32,
    /// Candidate block height.
    pub height: Height,
    /// Chain identifier.
    pub chain_id: u64,
    /// Θ at seal time (µ-nats), from the difficulty schedule.
    pub theta_micro: ThetaMicro,
    /// Data-availability root.
    pub da_root: Hash32,
    /// Merkle root over attached proofs' compact receipts.
    pub proofs_root: Hash32,
    /// Algorithm-policy root the header binds.
    pub policy_alg_root: Hash32,
    /// Nonce / mix-seed domain binding for the u-draw.
    pub mix_seed: Hash32,
    /// Parent hash, when known without a store read.
    pub parent_hash: Option<Hash32>,
}

/// Verifier-facing policy snapshot: the subset needed during verification.
/// Caps and Γ are enforced later by the cap engine, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySnapshot {
    /// Algorithm-policy root that headers must bind.
    pub alg_policy_root: Hash32,
    /// Allowed signature algorithm ids.
    pub allowed_sig_algs: Vec<u16>,
    /// Allowed KEM algorithm ids.
    pub allowed_kem_algs: Vec<u16>,
    /// Per-kind enable flags; kinds absent from the map count as enabled.
    pub enabled: BTreeMap<ProofKind, bool>,
}

impl PolicySnapshot {
    /// A snapshot with every kind enabled and empty allow-lists.
    pub fn allow_all(alg_policy_root: Hash32) -> Self {
        PolicySnapshot {
            alg_policy_root,
            allowed_sig_algs: Vec::new(),
            allowed_kem_algs: Vec::new(),
            enabled: BTreeMap::new(),
        }
    }

    /// Whether proofs of `kind` are enabled.
    #[inline]
    pub fn is_enabled(&self, kind: ProofKind) -> bool {
        *self.enabled.get(&kind).unwrap_or(&true)
    }
}

/// Output of a verifier.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    /// Whether the proof verified.
    pub ok: bool,
    /// Normalized metrics for ψ mapping; present when `ok`.
    pub metrics: Option<ProofMetrics>,
    /// Canonicalized body bytes used for proofs-root hashing.
    pub normalized_body: Vec<u8>,
    /// Optional non-consensus metadata (provider, model, region, ...).
    pub labels: BTreeMap<String, String>,
    /// Deterministic rejection reason when `!ok` ("schema-invalid", ...).
    pub reason: Option<String>,
}

impl VerificationResult {
    /// A successful verification.
    pub fn accept(metrics: ProofMetrics, normalized_body: Vec<u8>) -> Self {
        VerificationResult {
            ok: true,
            metrics: Some(metrics),
            normalized_body,
            labels: BTreeMap::new(),
            reason: None,
        }
    }

    /// A deterministic rejection.
    pub fn reject(reason: impl Into<String>) -> Self {
        VerificationResult {
            ok: false,
            metrics: None,
            normalized_body: Vec::new(),
            labels: BTreeMap::new(),
            reason: Some(reason.into()),
        }
    }

    /// The rejection used when policy disables a proof kind.
    pub fn disabled_by_policy() -> Self {
        Self::reject("disabled-by-policy")
    }
}

// ============================================================================
// Verifier protocol & registry
// ============================================================================

/// Protocol implemented by each proof-kind verifier.
///
/// Implementations MUST be pure/deterministic: reject mismatched type ids,
/// canonicalize the body, validate any binding to the header, clamp metrics
/// to finite non-negative values, and never touch clocks, network,
/// filesystem, or environment. Irrecoverable parse errors surface as
/// `ok = false` with a deterministic reason, never as a panic.
pub trait ProofVerifier {
    /// The single proof kind this verifier accepts.
    fn kind(&self) -> ProofKind;

    /// Verify `envelope` against `header` and `policy`.
    fn verify(
        &self,
        envelope: &ProofEnvelope,
        header: &HeaderView,
        policy: &PolicySnapshot,
    ) -> VerificationResult;
}

/// Map `type_id → verifier` with unique registration and typed dispatch
/// errors.
#[derive(Default)]
pub struct VerifierRegistry {
    by_id: BTreeMap<u8, Box<dyn ProofVerifier>>,
}

impl VerifierRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a verifier; duplicate type ids are rejected.
    pub fn register(&mut self, verifier: Box<dyn ProofVerifier>) -> Result<(), ConsensusError> {
        let id = verifier.kind().id();
        if self.by_id.contains_key(&id) {
            return Err(ConsensusError::generic("duplicate verifier registration")
                .with_context("type_id", id.to_string()));
        }
        self.by_id.insert(id, verifier);
        Ok(())
    }

    /// The verifier for `type_id`, or a typed "no verifier" error.
    pub fn get(&self, type_id: u8) -> Result<&dyn ProofVerifier, ConsensusError> {
        self.by_id.get(&type_id).map(|b| b.as_ref()).ok_or_else(|| {
            ConsensusError::generic("no verifier registered for type id")
                .with_context("type_id", type_id.to_string())
        })
    }

    /// Dispatch an envelope to its verifier.
    ///
    /// Kinds disabled by the snapshot short-circuit to
    /// `reason = "disabled-by-policy"` without invoking the verifier.
    pub fn verify(
        &self,
        envelope: &ProofEnvelope,
        header: &HeaderView,
        policy: &PolicySnapshot,
    ) -> Result<VerificationResult, ConsensusError> {
        let verifier = self.get(envelope.type_id)?;
        if let Some(kind) = ProofKind::from_id(envelope.type_id) {
            if !policy.is_enabled(kind) {
                return Ok(VerificationResult::disabled_by_policy());
            }
        }
        Ok(verifier.verify(envelope, header, policy))
    }
}

// ============================================================================
// Canonical CBOR
// ============================================================================

/// Re-encode CBOR bytes into canonical form: every map's entries sorted by
/// the byte encoding of their keys, recursively. Deterministic for any
/// decodable input; undecodable bytes are a hard error.
pub fn canonicalize_cbor(bytes: &[u8]) -> Result<Vec<u8>, ConsensusError> {
    let value: CborValue = ciborium::de::from_reader(bytes).map_err(|e| {
        ConsensusError::generic(format!("invalid CBOR body: {e}"))
    })?;
    encode_cbor(&canonicalize_value(value))
}

fn canonicalize_value(value: CborValue) -> CborValue {
    match value {
        CborValue::Array(items) => {
            CborValue::Array(items.into_iter().map(canonicalize_value).collect())
        }
        CborValue::Map(entries) => {
            let mut canon: Vec<(Vec<u8>, CborValue, CborValue)> = entries
                .into_iter()
                .map(|(k, v)| {
                    let k = canonicalize_value(k);
                    let v = canonicalize_value(v);
                    let key_bytes = encode_cbor(&k).unwrap_or_default();
                    (key_bytes, k, v)
                })
                .collect();
            canon.sort_by(|a, b| a.0.cmp(&b.0));
            CborValue::Map(canon.into_iter().map(|(_, k, v)| (k, v)).collect())
        }
        other => other,
    }
}

fn encode_cbor(value: &CborValue) -> Result<Vec<u8>, ConsensusError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| ConsensusError::generic(format!("CBOR encode error: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::ProofMetrics;

    struct FixedVerifier {
        kind: ProofKind,
        result: VerificationResult,
    }

    impl ProofVerifier for FixedVerifier {
        fn kind(&self) -> ProofKind {
            self.kind
        }
        fn verify(
            &self,
            _envelope: &ProofEnvelope,
            _header: &HeaderView,
            _policy: &PolicySnapshot,
        ) -> VerificationResult {
            self.result.clone()
        }
    }

    fn header() -> HeaderView {
        HeaderView {
            hash: [1u8; 32],
            height: 7,
            chain_id: 9,
            theta_micro: 1_000_000,
            da_root: [2u8; 32],
            proofs_root: [3u8; 32],
            policy_alg_root: [4u8; 32],
            mix_seed: [5u8; 32],
            parent_hash: None,
        }
    }

    fn envelope(type_id: u8) -> ProofEnvelope {
        ProofEnvelope { type_id, body_cbor: vec![0xa0], nullifier: [9u8; 32] }
    }

    #[test]
    fn registry_enforces_unique_type_ids() {
        let mut reg = VerifierRegistry::new();
        reg.register(Box::new(FixedVerifier {
            kind: ProofKind::Hash,
            result: VerificationResult::reject("x"),
        }))
        .unwrap();
        let err = reg
            .register(Box::new(FixedVerifier {
                kind: ProofKind::Hash,
                result: VerificationResult::reject("y"),
            }))
            .unwrap_err();
        assert!(err.message().contains("duplicate"));
        assert_eq!(err.context().get("type_id").unwrap(), "1");
    }

    #[test]
    fn dispatch_unknown_type_id_is_a_typed_error() {
        let reg = VerifierRegistry::new();
        let err = reg
            .verify(&envelope(42), &header(), &PolicySnapshot::allow_all([4u8; 32]))
            .unwrap_err();
        assert!(err.message().contains("no verifier"));
        assert_eq!(err.context().get("type_id").unwrap(), "42");
    }

    #[test]
    fn disabled_kind_short_circuits_before_the_verifier_runs() {
        let mut reg = VerifierRegistry::new();
        reg.register(Box::new(FixedVerifier {
            kind: ProofKind::Ai,
            result: VerificationResult::accept(
                ProofMetrics::Ai { ai_units: 1.0, redundancy: 1.0, traps_ratio: 1.0, qos: 1.0 },
                vec![0xa0],
            ),
        }))
        .unwrap();
        let mut snapshot = PolicySnapshot::allow_all([4u8; 32]);
        snapshot.enabled.insert(ProofKind::Ai, false);
        let res = reg.verify(&envelope(2), &header(), &snapshot).unwrap();
        assert!(!res.ok);
        assert_eq!(res.reason.as_deref(), Some("disabled-by-policy"));
    }

    #[test]
    fn canonical_cbor_sorts_map_keys_recursively() {
        // {"b": 2, "a": {"z": 1, "y": [1, {"q": 0, "p": 0}]}}, keys unsorted.
        let inner_map = CborValue::Map(vec![
            (CborValue::Text("q".into()), CborValue::Integer(0.into())),
            (CborValue::Text("p".into()), CborValue::Integer(0.into())),
        ]);
        let nested = CborValue::Map(vec![
            (CborValue::Text("z".into()), CborValue::Integer(1.into())),
            (
                CborValue::Text("y".into()),
                CborValue::Array(vec![CborValue::Integer(1.into()), inner_map]),
            ),
        ]);
        let doc = CborValue::Map(vec![
            (CborValue::Text("b".into()), CborValue::Integer(2.into())),
            (CborValue::Text("a".into()), nested),
        ]);
        let raw = encode_cbor(&doc).unwrap();
        let canon = canonicalize_cbor(&raw).unwrap();
        assert_ne!(raw, canon);

        let reparsed: CborValue = ciborium::de::from_reader(canon.as_slice()).unwrap();
        let CborValue::Map(top) = reparsed else { panic!("expected map") };
        let keys: Vec<String> = top
            .iter()
            .map(|(k, _)| match k {
                CborValue::Text(s) => s.clone(),
                _ => panic!("expected text key"),
            })
            .collect();
        assert_eq!(keys, vec!["a", "b"]);

        // Canonicalization is idempotent.
        assert_eq!(canonicalize_cbor(&canon).unwrap(), canon);
    }

    #[test]
    fn canonical_cbor_rejects_garbage() {
        assert!(canonicalize_cbor(&[0xff, 0x00, 0x13]).is_err());
    }

    #[test]
    fn snapshot_defaults_kinds_to_enabled() {
        let snap = PolicySnapshot::allow_all([0u8; 32]);
        for kind in ProofKind::ALL {
            assert!(snap.is_enabled(kind));
        }
    }
}
