//! PoIES policy model, loader, and commitment root
//!
//! The policy is a declarative JSON document loaded into a strongly-typed,
//! validated object used by scorer/validator:
//!
//! - Γ (`gamma_cap`): total per-block ψ cap (µ-nats).
//! - Per-kind caps: max Σψ per kind, and per single proof of that kind.
//! - Escort rule: a minimum fraction of Σψ must come from "useful" kinds.
//! - Weights: integer knobs mapping verified proof metrics to ψ inputs.
//! - Target mix (ppm) consumed by the α-tuner; normalized to sum 10⁶.
//!
//! ## Commitment root
//!
//! `policy_root = sha3-256(canonical JSON)` where the canonical JSON excludes
//! the root itself, sorts all map keys lexicographically, emits every numeric
//! as an integer, names kinds by their stable uppercase names, and writes the
//! escort `useful_types` list in id order. Headers bind this root; a mismatch
//! rejects the block before any verifier runs. Independent implementations
//! must agree on these bytes exactly — `serde_json`'s sorted map plus compact
//! separators produce them without a custom writer.
//!
//! Unknown JSON keys are ignored (forward-compatible rollout); malformed or
//! negative numerics are hard errors.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use tracing::debug;

use crate::errors::ConsensusError;
use crate::types::ProofKind;
use crate::{GammaMicro, Hash32, MicroNat, PPM_SCALE};

// ============================================================================
// Policy shapes
// ============================================================================

/// Per-proof-kind caps (µ-nats).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCap {
    /// Max Σψ for this kind within a block.
    pub per_type_micro: MicroNat,
    /// Max ψ contribution from a single proof of this kind.
    pub per_proof_micro_max: MicroNat,
}

/// Escort / diversity rule: at least `min_useful_ratio_bp` basis points of
/// the final accepted Σψ must come from the configured set of useful kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscortRule {
    /// Whether the rule is enforced.
    pub enabled: bool,
    /// Required useful share in basis points, `0..=10_000`.
    pub min_useful_ratio_bp: u32,
    /// The kinds counted as useful (typically everything but `HASH`).
    pub useful_kinds: BTreeSet<ProofKind>,
}

/// Per-kind weight knobs, all integers with explicit scales.
///
/// Only a subset is meaningful per kind; unused fields stay at their
/// defaults and are still serialized (the canonical JSON is total).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weights {
    /// HASH: µ-nats per `ln(1 + d_ratio)` unit.
    pub k_ln_micro: u64,
    /// AI/QUANTUM: µ-nats per normalized work unit.
    pub k_units_micro: u64,
    /// Trap ramp lower knee (basis points): `Q(t) = 0` for `t ≤ t_min`.
    pub t_min_bp: u32,
    /// Trap ramp upper knee (basis points): `Q(t) = 1` for `t ≥ t_target`.
    pub t_target_bp: u32,
    /// AI redundancy penalty exponent ρ, in milli (1000 = 1.0).
    pub redundancy_exp_milli: u32,
    /// STORAGE: µ-nats per GiB at full availability.
    pub k_size_micro: u64,
    /// STORAGE availability convexity exponent, in milli.
    pub availability_exp_milli: u32,
    /// VDF: µ-nats per `ln(1 + seconds)` unit.
    pub k_seconds_micro: u64,
    /// VDF: nanoseconds of verified delay per iteration (when `seconds` absent).
    pub iters_to_seconds_nano: u64,
}

impl Default for Weights {
    fn default() -> Self {
        Weights {
            k_ln_micro: 0,
            k_units_micro: 0,
            t_min_bp: 0,
            t_target_bp: 0,
            redundancy_exp_milli: 1000,
            k_size_micro: 0,
            availability_exp_milli: 1000,
            k_seconds_micro: 0,
            iters_to_seconds_nano: 1,
        }
    }
}

impl Weights {
    /// Reference default knobs per kind.
    pub fn defaults_for(kind: ProofKind) -> Weights {
        let mut w = Weights::default();
        match kind {
            ProofKind::Hash => {
                w.k_ln_micro = 250_000;
            }
            ProofKind::Ai => {
                w.k_units_micro = 1_000_000;
                w.t_min_bp = 6_000;
                w.t_target_bp = 8_500;
            }
            ProofKind::Quantum => {
                w.k_units_micro = 1_500_000;
                w.t_min_bp = 6_500;
                w.t_target_bp = 9_000;
            }
            ProofKind::Storage => {
                w.k_size_micro = 20_000;
                w.availability_exp_milli = 1_200;
            }
            ProofKind::Vdf => {
                w.k_seconds_micro = 50_000;
            }
        }
        w
    }
}

/// Canonical policy object used throughout consensus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoiesPolicy {
    /// Monotonically increasing schema/content version.
    pub version: u64,
    /// Block-level cap on Σψ (µ-nats).
    pub gamma_cap: GammaMicro,
    /// Per-kind caps; kinds absent from the source document load as zero
    /// caps (disabled).
    pub caps: BTreeMap<ProofKind, TypeCap>,
    /// Optional escort/diversity rule.
    pub escort: Option<EscortRule>,
    /// Per-kind weight knobs.
    pub weights: BTreeMap<ProofKind, Weights>,
    /// α-tuner target mix in ppm; always sums to exactly 10⁶ after load.
    pub target_mix_ppm: BTreeMap<ProofKind, u64>,
    /// Sliding-window TTL for proof nullifiers, in blocks.
    pub nullifier_ttl_blocks: u64,
    /// sha3-256 over the canonical JSON of all fields above.
    pub policy_root: Hash32,
}

impl PoiesPolicy {
    /// Caps for `kind` (zero caps when the kind is absent).
    #[inline]
    pub fn cap_for(&self, kind: ProofKind) -> TypeCap {
        self.caps.get(&kind).copied().unwrap_or_default()
    }

    /// Weight knobs for `kind` (reference defaults when absent).
    #[inline]
    pub fn weights_for(&self, kind: ProofKind) -> Weights {
        self.weights.get(&kind).copied().unwrap_or_else(|| Weights::defaults_for(kind))
    }

    /// Canonical JSON bytes for hashing: sorted keys, integers only, kinds
    /// under their stable names, escort `useful_types` in id order. Excludes
    /// `policy_root` itself.
    pub fn to_canonical_json(&self) -> Vec<u8> {
        use serde_json::{json, Map, Value};

        let mut caps = Map::new();
        for (kind, cap) in &self.caps {
            caps.insert(
                kind.name().to_string(),
                json!({
                    "per_type_micro": cap.per_type_micro,
                    "per_proof_micro_max": cap.per_proof_micro_max,
                }),
            );
        }

        let escort: Value = match &self.escort {
            None => Value::Null,
            Some(rule) => {
                // BTreeSet iterates in Ord order, which is id order for kinds.
                let useful: Vec<&str> = rule.useful_kinds.iter().map(|k| k.name()).collect();
                json!({
                    "enabled": rule.enabled,
                    "min_useful_ratio_bp": rule.min_useful_ratio_bp,
                    "useful_types": useful,
                })
            }
        };

        let mut weights = Map::new();
        for (kind, w) in &self.weights {
            weights.insert(
                kind.name().to_string(),
                json!({
                    "k_ln_micro": w.k_ln_micro,
                    "k_units_micro": w.k_units_micro,
                    "t_min_bp": w.t_min_bp,
                    "t_target_bp": w.t_target_bp,
                    "redundancy_exp_milli": w.redundancy_exp_milli,
                    "k_size_micro": w.k_size_micro,
                    "availability_exp_milli": w.availability_exp_milli,
                    "k_seconds_micro": w.k_seconds_micro,
                    "iters_to_seconds_nano": w.iters_to_seconds_nano,
                }),
            );
        }

        let mut mix = Map::new();
        for (kind, ppm) in &self.target_mix_ppm {
            mix.insert(kind.name().to_string(), json!(ppm));
        }

        let payload = json!({
            "version": self.version,
            "gamma_cap_micro": self.gamma_cap,
            "nullifier_ttl_blocks": self.nullifier_ttl_blocks,
            "caps": Value::Object(caps),
            "escort": escort,
            "weights": Value::Object(weights),
            "target_mix_ppm": Value::Object(mix),
        });
        // serde_json's map is BTreeMap-backed: keys come out sorted, and
        // `to_vec` writes compact separators. Both are consensus-relevant.
        serde_json::to_vec(&payload).unwrap_or_default()
    }

    /// `policy_root` rendered as `0x`-prefixed hex.
    pub fn hex_policy_root(&self) -> String {
        format!("0x{}", hex::encode(self.policy_root))
    }

    /// Load and validate a policy from JSON bytes.
    pub fn from_json_slice(bytes: &[u8]) -> Result<PoiesPolicy, ConsensusError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| ConsensusError::policy(format!("policy JSON parse error: {e}")))?;
        Self::from_json_value(&value)
    }

    /// Build a validated policy from a parsed JSON document.
    pub fn from_json_value(value: &serde_json::Value) -> Result<PoiesPolicy, ConsensusError> {
        let doc = value
            .as_object()
            .ok_or_else(|| ConsensusError::policy("policy document must be an object"))?;

        let version = match doc.get("version") {
            None => 1,
            Some(v) => require_u64(v, "version")?,
        };
        let gamma_cap = require_u64(
            doc.get("gamma_cap_micro")
                .ok_or_else(|| ConsensusError::policy("missing required key 'gamma_cap_micro'"))?,
            "gamma_cap_micro",
        )?;
        let nullifier_ttl_blocks = match doc.get("nullifier_ttl_blocks") {
            None => DEFAULT_NULLIFIER_TTL_BLOCKS,
            Some(v) => require_u64(v, "nullifier_ttl_blocks")?,
        };

        let caps = load_caps(doc.get("caps"), gamma_cap)?;
        let escort = load_escort(doc.get("escort"))?;
        let weights = load_weights(doc.get("weights"))?;
        let target_mix_ppm = load_target_mix(doc.get("target_mix_ppm"))?;

        let mut policy = PoiesPolicy {
            version,
            gamma_cap,
            caps,
            escort,
            weights,
            target_mix_ppm,
            nullifier_ttl_blocks,
            policy_root: [0u8; 32],
        };
        policy.policy_root = compute_policy_root(&policy.to_canonical_json());
        debug!(root = %policy.hex_policy_root(), version, gamma_cap, "loaded PoIES policy");
        Ok(policy)
    }
}

/// Default nullifier TTL when the document does not set one.
pub const DEFAULT_NULLIFIER_TTL_BLOCKS: u64 = 1_024;

/// Reference target mix (ppm) when the document does not set one.
pub fn default_target_mix() -> BTreeMap<ProofKind, u64> {
    BTreeMap::from([
        (ProofKind::Hash, 600_000),
        (ProofKind::Ai, 200_000),
        (ProofKind::Quantum, 120_000),
        (ProofKind::Storage, 50_000),
        (ProofKind::Vdf, 30_000),
    ])
}

/// sha3-256 over canonical JSON; headers bind this root for enforcement.
pub fn compute_policy_root(canonical_json: &[u8]) -> Hash32 {
    let digest = Sha3_256::digest(canonical_json);
    digest.into()
}

/// Deterministically normalize a raw mix so it sums to exactly 10⁶ ppm:
/// floor-proportional shares, then ±1 drift distributed from the first kinds
/// in stable id order.
pub fn normalize_target_mix(raw: &BTreeMap<ProofKind, u64>) -> BTreeMap<ProofKind, u64> {
    let total: u128 = ProofKind::ALL.iter().map(|k| *raw.get(k).unwrap_or(&0) as u128).sum();
    let mut out = BTreeMap::new();
    let mut acc: u64 = 0;
    for kind in ProofKind::ALL {
        let share = if total > 0 {
            let v = *raw.get(&kind).unwrap_or(&0) as u128;
            ((v * PPM_SCALE as u128) / total) as u64
        } else {
            PPM_SCALE / ProofKind::ALL.len() as u64
        };
        acc += share;
        out.insert(kind, share);
    }
    let mut drift = PPM_SCALE as i64 - acc as i64;
    for kind in ProofKind::ALL {
        if drift == 0 {
            break;
        }
        let entry = out.entry(kind).or_insert(0);
        if drift > 0 {
            *entry += 1;
            drift -= 1;
        } else if *entry > 0 {
            *entry -= 1;
            drift += 1;
        }
    }
    out
}

// ============================================================================
// Loader internals
// ============================================================================

fn require_u64(v: &serde_json::Value, key: &str) -> Result<u64, ConsensusError> {
    v.as_u64().ok_or_else(|| {
        ConsensusError::policy(format!("expected non-negative integer for '{key}'"))
            .with_context("path", key)
    })
}

fn load_caps(
    caps_cfg: Option<&serde_json::Value>,
    gamma_cap: u64,
) -> Result<BTreeMap<ProofKind, TypeCap>, ConsensusError> {
    let mut caps = BTreeMap::new();
    let cfg = match caps_cfg {
        None => {
            for kind in ProofKind::ALL {
                caps.insert(kind, TypeCap::default());
            }
            return Ok(caps);
        }
        Some(v) => v
            .as_object()
            .ok_or_else(|| ConsensusError::policy("caps must be an object"))?,
    };
    let per_type = cfg
        .get("per_type_micro")
        .map(|v| v.as_object().ok_or_else(|| ConsensusError::policy("caps.per_type_micro must be a map")))
        .transpose()?;
    let per_proof = cfg
        .get("per_proof_micro_max")
        .map(|v| v.as_object().ok_or_else(|| ConsensusError::policy("caps.per_proof_micro_max must be a map")))
        .transpose()?;

    if let Some(per_type) = per_type {
        for (name, v) in per_type {
            let kind = ProofKind::from_name(name).ok_or_else(|| {
                ConsensusError::policy(format!("unknown proof type '{name}' in policy"))
                    .with_context("path", format!("caps.per_type_micro.{name}"))
            })?;
            let pt_cap = require_u64(v, &format!("caps.per_type_micro.{name}"))?;
            // Per-proof cap defaults to the per-type cap.
            let pp_cap = match per_proof.and_then(|m| m.get(name)) {
                Some(v) => require_u64(v, &format!("caps.per_proof_micro_max.{name}"))?,
                None => pt_cap,
            };
            if pt_cap > gamma_cap {
                return Err(ConsensusError::policy_mismatch(
                    &format!("caps.per_type_micro.{}", kind.name()),
                    format!("<= gamma_cap ({gamma_cap})"),
                    pt_cap,
                ));
            }
            if pp_cap > pt_cap {
                return Err(ConsensusError::policy_mismatch(
                    &format!("caps.per_proof_micro_max.{}", kind.name()),
                    format!("<= per_type_micro ({pt_cap})"),
                    pp_cap,
                ));
            }
            caps.insert(kind, TypeCap { per_type_micro: pt_cap, per_proof_micro_max: pp_cap });
        }
    }
    // Kinds missing from the document get zero caps (disabled).
    for kind in ProofKind::ALL {
        caps.entry(kind).or_default();
    }
    Ok(caps)
}

fn load_escort(cfg: Option<&serde_json::Value>) -> Result<Option<EscortRule>, ConsensusError> {
    let cfg = match cfg {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(v) => v
            .as_object()
            .ok_or_else(|| ConsensusError::policy("escort must be an object"))?,
    };
    let enabled = cfg.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false);
    let min_bp = match cfg.get("min_useful_ratio_bp") {
        None => 0,
        Some(v) => require_u64(v, "escort.min_useful_ratio_bp")?,
    };
    if min_bp > 10_000 {
        return Err(ConsensusError::policy_mismatch("escort.min_useful_ratio_bp", "0..=10000", min_bp));
    }
    let mut useful_kinds = BTreeSet::new();
    if let Some(raw) = cfg.get("useful_types") {
        let list = raw
            .as_array()
            .ok_or_else(|| ConsensusError::policy("escort.useful_types must be a list"))?;
        for item in list {
            let name = item
                .as_str()
                .ok_or_else(|| ConsensusError::policy("escort.useful_types entries must be strings"))?;
            let kind = ProofKind::from_name(name).ok_or_else(|| {
                ConsensusError::policy(format!("unknown proof type '{name}' in policy"))
                    .with_context("path", "escort.useful_types")
            })?;
            useful_kinds.insert(kind);
        }
    }
    if enabled && min_bp > 0 && useful_kinds.is_empty() {
        return Err(ConsensusError::policy("escort.enabled is true but useful_types is empty"));
    }
    Ok(Some(EscortRule { enabled, min_useful_ratio_bp: min_bp as u32, useful_kinds }))
}

fn load_weights(
    cfg: Option<&serde_json::Value>,
) -> Result<BTreeMap<ProofKind, Weights>, ConsensusError> {
    let mut out = BTreeMap::new();
    for kind in ProofKind::ALL {
        out.insert(kind, Weights::defaults_for(kind));
    }
    let cfg = match cfg {
        None => return Ok(out),
        Some(v) => v
            .as_object()
            .ok_or_else(|| ConsensusError::policy("weights must be an object"))?,
    };
    for (name, entry) in cfg {
        let kind = ProofKind::from_name(name).ok_or_else(|| {
            ConsensusError::policy(format!("unknown proof type '{name}' in policy"))
                .with_context("path", format!("weights.{name}"))
        })?;
        let map = entry
            .as_object()
            .ok_or_else(|| ConsensusError::policy(format!("weights.{} must be an object", kind.name())))?;
        let w = out.entry(kind).or_insert_with(|| Weights::defaults_for(kind));
        // Known knobs only; unknown keys are ignored for forward-compat.
        for (key, slot) in [
            ("k_ln_micro", &mut w.k_ln_micro),
            ("k_units_micro", &mut w.k_units_micro),
            ("k_size_micro", &mut w.k_size_micro),
            ("k_seconds_micro", &mut w.k_seconds_micro),
            ("iters_to_seconds_nano", &mut w.iters_to_seconds_nano),
        ] {
            if let Some(v) = map.get(key) {
                *slot = require_u64(v, &format!("weights.{}.{key}", kind.name()))?;
            }
        }
        for (key, slot) in [
            ("t_min_bp", &mut w.t_min_bp),
            ("t_target_bp", &mut w.t_target_bp),
            ("redundancy_exp_milli", &mut w.redundancy_exp_milli),
            ("availability_exp_milli", &mut w.availability_exp_milli),
        ] {
            if let Some(v) = map.get(key) {
                let raw = require_u64(v, &format!("weights.{}.{key}", kind.name()))?;
                *slot = u32::try_from(raw).map_err(|_| {
                    ConsensusError::policy_mismatch(&format!("weights.{}.{key}", kind.name()), "u32 range", raw)
                })?;
            }
        }
    }
    Ok(out)
}

fn load_target_mix(
    cfg: Option<&serde_json::Value>,
) -> Result<BTreeMap<ProofKind, u64>, ConsensusError> {
    let raw = match cfg {
        None => default_target_mix(),
        Some(v) => {
            let map = v
                .as_object()
                .ok_or_else(|| ConsensusError::policy("target_mix_ppm must be an object"))?;
            let mut out = BTreeMap::new();
            for (name, entry) in map {
                let kind = ProofKind::from_name(name).ok_or_else(|| {
                    ConsensusError::policy(format!("unknown proof type '{name}' in policy"))
                        .with_context("path", format!("target_mix_ppm.{name}"))
                })?;
                out.insert(kind, require_u64(entry, &format!("target_mix_ppm.{name}"))?);
            }
            out
        }
    };
    Ok(normalize_target_mix(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_policy_json() -> serde_json::Value {
        json!({
            "version": 1,
            "gamma_cap_micro": 12_000_000,
            "escort": {
                "enabled": true,
                "min_useful_ratio_bp": 3000,
                "useful_types": ["AI", "QUANTUM", "STORAGE", "VDF"],
            },
            "caps": {
                "per_type_micro": {
                    "HASH": 8_000_000,
                    "AI": 8_000_000,
                    "QUANTUM": 8_000_000,
                    "STORAGE": 4_000_000,
                    "VDF": 2_000_000,
                },
                "per_proof_micro_max": {
                    "HASH": 4_000_000,
                    "AI": 4_000_000,
                    "QUANTUM": 4_000_000,
                    "STORAGE": 2_000_000,
                    "VDF": 1_000_000,
                },
            },
            "weights": {
                "AI": { "k_units_micro": 1_200_000 },
                "QUANTUM": { "k_units_micro": 1_800_000 },
            },
        })
    }

    #[test]
    fn loads_and_hashes_sample_policy() {
        let policy = PoiesPolicy::from_json_value(&sample_policy_json()).unwrap();
        assert_eq!(policy.version, 1);
        assert_eq!(policy.gamma_cap, 12_000_000);
        assert_eq!(policy.cap_for(ProofKind::Vdf).per_proof_micro_max, 1_000_000);
        assert_eq!(policy.weights_for(ProofKind::Ai).k_units_micro, 1_200_000);
        // Untouched knobs keep their reference defaults.
        assert_eq!(policy.weights_for(ProofKind::Ai).t_min_bp, 6_000);
        assert_ne!(policy.policy_root, [0u8; 32]);
        assert!(policy.hex_policy_root().starts_with("0x"));
    }

    #[test]
    fn root_is_stable_and_content_sensitive() {
        let a = PoiesPolicy::from_json_value(&sample_policy_json()).unwrap();
        let b = PoiesPolicy::from_json_value(&sample_policy_json()).unwrap();
        assert_eq!(a.policy_root, b.policy_root);

        let mut doc = sample_policy_json();
        doc["gamma_cap_micro"] = json!(12_000_001);
        let c = PoiesPolicy::from_json_value(&doc).unwrap();
        assert_ne!(a.policy_root, c.policy_root);
    }

    #[test]
    fn canonical_json_is_sorted_and_compact() {
        let policy = PoiesPolicy::from_json_value(&sample_policy_json()).unwrap();
        let bytes = policy.to_canonical_json();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains(' '), "canonical JSON must use compact separators");
        assert!(!text.contains("policy_root"));
        // Top-level keys in lexicographic order.
        let caps_at = text.find("\"caps\"").unwrap();
        let escort_at = text.find("\"escort\"").unwrap();
        let version_at = text.find("\"version\"").unwrap();
        assert!(caps_at < escort_at && escort_at < version_at);
        // Kind keys sorted lexicographically inside maps.
        let ai_at = text.find("\"AI\"").unwrap();
        let hash_at = text.find("\"HASH\"").unwrap();
        assert!(ai_at < hash_at);
    }

    #[test]
    fn missing_kinds_load_as_zero_caps() {
        let policy = PoiesPolicy::from_json_value(&json!({
            "gamma_cap_micro": 1_000_000,
            "caps": { "per_type_micro": { "HASH": 500_000 } },
        }))
        .unwrap();
        assert_eq!(policy.cap_for(ProofKind::Hash).per_type_micro, 500_000);
        assert_eq!(policy.cap_for(ProofKind::Hash).per_proof_micro_max, 500_000);
        assert_eq!(policy.cap_for(ProofKind::Ai), TypeCap::default());
    }

    #[test]
    fn rejects_cap_monotonicity_violations() {
        let err = PoiesPolicy::from_json_value(&json!({
            "gamma_cap_micro": 1_000_000,
            "caps": { "per_type_micro": { "AI": 2_000_000 } },
        }))
        .unwrap_err();
        assert_eq!(err.code() as u16, 2001);

        let err = PoiesPolicy::from_json_value(&json!({
            "gamma_cap_micro": 5_000_000,
            "caps": {
                "per_type_micro": { "AI": 2_000_000 },
                "per_proof_micro_max": { "AI": 3_000_000 },
            },
        }))
        .unwrap_err();
        assert_eq!(err.code() as u16, 2001);
    }

    #[test]
    fn rejects_enabled_escort_without_useful_kinds() {
        let err = PoiesPolicy::from_json_value(&json!({
            "gamma_cap_micro": 1_000_000,
            "escort": { "enabled": true, "min_useful_ratio_bp": 100, "useful_types": [] },
        }))
        .unwrap_err();
        assert!(err.message().contains("useful_types"));
    }

    #[test]
    fn rejects_unknown_kind_and_non_integer_values() {
        assert!(PoiesPolicy::from_json_value(&json!({
            "gamma_cap_micro": 1,
            "caps": { "per_type_micro": { "PLONK": 1 } },
        }))
        .is_err());
        assert!(PoiesPolicy::from_json_value(&json!({
            "gamma_cap_micro": -3,
        }))
        .is_err());
        assert!(PoiesPolicy::from_json_value(&json!({
            "gamma_cap_micro": 1,
            "weights": { "AI": { "k_units_micro": 1.5 } },
        }))
        .is_err());
    }

    #[test]
    fn target_mix_normalizes_to_exactly_one_million() {
        // Raw values that do not sum to 1e6.
        let mix = normalize_target_mix(&BTreeMap::from([
            (ProofKind::Hash, 3u64),
            (ProofKind::Ai, 3),
            (ProofKind::Quantum, 1),
        ]));
        let total: u64 = mix.values().sum();
        assert_eq!(total, PPM_SCALE);
        assert!(mix[&ProofKind::Hash] >= mix[&ProofKind::Quantum]);

        // All-zero raw mix splits evenly.
        let even = normalize_target_mix(&BTreeMap::new());
        assert!(even.values().all(|&v| v == PPM_SCALE / 5));
    }

    #[test]
    fn default_mix_is_already_normalized() {
        let policy = PoiesPolicy::from_json_value(&json!({ "gamma_cap_micro": 1 })).unwrap();
        let total: u64 = policy.target_mix_ppm.values().sum();
        assert_eq!(total, PPM_SCALE);
        assert_eq!(policy.target_mix_ppm[&ProofKind::Hash], 600_000);
        assert_eq!(policy.nullifier_ttl_blocks, DEFAULT_NULLIFIER_TTL_BLOCKS);
    }
}
