//! Proof kinds and canonical identifiers
//!
//! The proof-kind enumeration is **consensus-critical**: the numeric ids are
//! carried on the wire (envelope `type_id`), key the verifier registry and
//! the scorer's hook table, and name the per-kind sections of the policy's
//! canonical JSON. Ids are append-only across versions — never renumber.

use serde::{Deserialize, Serialize};

use crate::Hash32;

/// Canonical proof-kind identifiers with stable numeric ids.
///
/// | kind | id | stream |
/// |---|---|---|
/// | `Hash` | 1 | classical hash-share u-draw bound to the header template |
/// | `Ai` | 2 | attested AI work (redundancy + trap prompts + QoS) |
/// | `Quantum` | 3 | attested quantum work (trap circuits + QoS) |
/// | `Storage` | 4 | storage heartbeat / availability proof |
/// | `Vdf` | 5 | verifiable delay function (beacon tie-in) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofKind {
    /// Hash-share draw (`type_id = 1`).
    Hash,
    /// AI work proof (`type_id = 2`).
    Ai,
    /// Quantum work proof (`type_id = 3`).
    Quantum,
    /// Storage heartbeat proof (`type_id = 4`).
    Storage,
    /// Verifiable delay function proof (`type_id = 5`).
    Vdf,
}

impl ProofKind {
    /// All kinds in stable id order.
    pub const ALL: [ProofKind; 5] = [
        ProofKind::Hash,
        ProofKind::Ai,
        ProofKind::Quantum,
        ProofKind::Storage,
        ProofKind::Vdf,
    ];

    /// Stable numeric id (wire `type_id`).
    #[inline]
    pub const fn id(self) -> u8 {
        match self {
            ProofKind::Hash => 1,
            ProofKind::Ai => 2,
            ProofKind::Quantum => 3,
            ProofKind::Storage => 4,
            ProofKind::Vdf => 5,
        }
    }

    /// Stable uppercase name, used as the canonical-JSON map key.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            ProofKind::Hash => "HASH",
            ProofKind::Ai => "AI",
            ProofKind::Quantum => "QUANTUM",
            ProofKind::Storage => "STORAGE",
            ProofKind::Vdf => "VDF",
        }
    }

    /// Parse a stable id back into a kind. Unknown ids yield `None`.
    #[inline]
    pub const fn from_id(id: u8) -> Option<ProofKind> {
        match id {
            1 => Some(ProofKind::Hash),
            2 => Some(ProofKind::Ai),
            3 => Some(ProofKind::Quantum),
            4 => Some(ProofKind::Storage),
            5 => Some(ProofKind::Vdf),
            _ => None,
        }
    }

    /// Parse a case-insensitive name ("hash", "AI", ...). Unknown names
    /// yield `None`; policy loading surfaces that as a policy error.
    pub fn from_name(name: &str) -> Option<ProofKind> {
        match name.trim().to_ascii_uppercase().as_str() {
            "HASH" | "HASHSHARE" | "HASH_SHARE" => Some(ProofKind::Hash),
            "AI" => Some(ProofKind::Ai),
            "QUANTUM" => Some(ProofKind::Quantum),
            "STORAGE" => Some(ProofKind::Storage),
            "VDF" => Some(ProofKind::Vdf),
            _ => None,
        }
    }
}

/// Merkle roots that bind policy into headers.
///
/// - `poies_policy_root` binds the ψ mapping knobs, caps, escort rule and Γ.
/// - `alg_policy_root` binds the algorithm policy (allow-lists, enablement).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRoots {
    /// Root over the PoIES policy canonical JSON (see [`crate::policy`]).
    pub poies_policy_root: Hash32,
    /// Root over the verifier-facing algorithm policy.
    pub alg_policy_root: Hash32,
}
