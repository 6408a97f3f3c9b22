//! Structured consensus errors
//!
//! Four error kinds with **stable integer codes** so callers (RPC, mining,
//! tests) can classify failures without string matching:
//!
//! | kind | code |
//! |---|---|
//! | generic consensus | 2000 |
//! | policy | 2001 |
//! | Θ schedule | 2002 |
//! | nullifier | 2003 |
//!
//! Every error carries a human-readable message plus a small ordered context
//! map (string → string). Context stays shallow; no large blobs on hot paths.

use std::collections::BTreeMap;

use crate::types::ProofKind;
use crate::Hash32;

/// Stable error codes for consensus-layer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// Invariant violation surfaced by a pure function.
    ConsensusGeneric = 2000,
    /// Policy load/validation failure or header-vs-policy root mismatch.
    Policy = 2001,
    /// Difficulty/Θ schedule or retarget anomaly.
    ThetaSchedule = 2002,
    /// Nullifier reuse or domain mismatch.
    Nullifier = 2003,
}

/// Machine-friendly reason tags for nullifier failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullifierReason {
    /// Nullifier already recorded within the TTL window.
    Reused,
    /// Nullifier fell outside the TTL window.
    Expired,
    /// Nullifier was derived under the wrong proof-kind domain tag.
    DomainMismatch,
}

impl NullifierReason {
    /// Stable lowercase tag used in reasons and contexts.
    pub const fn as_str(self) -> &'static str {
        match self {
            NullifierReason::Reused => "reused",
            NullifierReason::Expired => "expired",
            NullifierReason::DomainMismatch => "domain-mismatch",
        }
    }
}

/// Ordered string context attached to an error.
pub type ErrorContext = BTreeMap<String, String>;

/// Consensus-layer error with a stable code and structured context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    /// Generic invariant violation (code 2000).
    #[error("[2000] {message}")]
    Consensus {
        /// Human-readable description.
        message: String,
        /// Structured fields for logs / RPC error data.
        context: ErrorContext,
    },
    /// Policy load/validation failure or root mismatch (code 2001).
    #[error("[2001] {message}")]
    Policy {
        /// Human-readable description.
        message: String,
        /// Structured fields (failing path, expected/actual, root hex).
        context: ErrorContext,
    },
    /// Θ schedule / retarget anomaly (code 2002).
    #[error("[2002] {message}")]
    ThetaSchedule {
        /// Human-readable description.
        message: String,
        /// Structured fields (theta_prev/next, window, clamp, height).
        context: ErrorContext,
    },
    /// Nullifier reuse or domain mismatch (code 2003).
    #[error("[2003] {message} ({})", .reason.as_str())]
    Nullifier {
        /// Human-readable description.
        message: String,
        /// Machine-friendly reason tag.
        reason: NullifierReason,
        /// Structured fields (proof kind, hex nullifier, first-seen, TTL).
        context: ErrorContext,
    },
}

impl ConsensusError {
    /// The stable integer code for this error kind.
    pub fn code(&self) -> ErrorCode {
        match self {
            ConsensusError::Consensus { .. } => ErrorCode::ConsensusGeneric,
            ConsensusError::Policy { .. } => ErrorCode::Policy,
            ConsensusError::ThetaSchedule { .. } => ErrorCode::ThetaSchedule,
            ConsensusError::Nullifier { .. } => ErrorCode::Nullifier,
        }
    }

    /// Short stable slug naming the error kind (used in validator reasons).
    pub fn kind_slug(&self) -> &'static str {
        match self {
            ConsensusError::Consensus { .. } => "consensus",
            ConsensusError::Policy { .. } => "policy",
            ConsensusError::ThetaSchedule { .. } => "theta-schedule",
            ConsensusError::Nullifier { .. } => "nullifier",
        }
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        match self {
            ConsensusError::Consensus { message, .. }
            | ConsensusError::Policy { message, .. }
            | ConsensusError::ThetaSchedule { message, .. }
            | ConsensusError::Nullifier { message, .. } => message,
        }
    }

    /// The structured context map.
    pub fn context(&self) -> &ErrorContext {
        match self {
            ConsensusError::Consensus { context, .. }
            | ConsensusError::Policy { context, .. }
            | ConsensusError::ThetaSchedule { context, .. }
            | ConsensusError::Nullifier { context, .. } => context,
        }
    }

    /// Attach (or overwrite) a context field. Builder-style.
    pub fn with_context(mut self, key: &str, value: impl Into<String>) -> Self {
        match &mut self {
            ConsensusError::Consensus { context, .. }
            | ConsensusError::Policy { context, .. }
            | ConsensusError::ThetaSchedule { context, .. }
            | ConsensusError::Nullifier { context, .. } => {
                context.insert(key.to_string(), value.into());
            }
        }
        self
    }

    /// Structured view suitable for logs or JSON-RPC error `data` fields.
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        out.insert("code".into(), serde_json::json!(self.code() as u16));
        out.insert("message".into(), serde_json::json!(self.message()));
        if !self.context().is_empty() {
            out.insert("context".into(), serde_json::json!(self.context()));
        }
        serde_json::Value::Object(out)
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// Generic consensus invariant violation.
    pub fn generic(message: impl Into<String>) -> Self {
        ConsensusError::Consensus { message: message.into(), context: ErrorContext::new() }
    }

    /// Policy failure with a bare message.
    pub fn policy(message: impl Into<String>) -> Self {
        ConsensusError::Policy { message: message.into(), context: ErrorContext::new() }
    }

    /// Policy validation mismatch at a dotted path.
    pub fn policy_mismatch(
        path: &str,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        let mut context = ErrorContext::new();
        context.insert("path".into(), path.to_string());
        context.insert("expected".into(), expected.to_string());
        context.insert("actual".into(), actual.to_string());
        ConsensusError::Policy {
            message: format!("policy mismatch at {path}: expected={expected} actual={actual}"),
            context,
        }
    }

    /// Θ schedule failure with a bare message.
    pub fn theta(message: impl Into<String>) -> Self {
        ConsensusError::ThetaSchedule { message: message.into(), context: ErrorContext::new() }
    }

    /// Retarget window parameter is non-positive.
    pub fn theta_invalid_window(window: f64) -> Self {
        Self::theta("theta retarget window must be > 0").with_context("window", window.to_string())
    }

    /// Computed Θ escaped the permissible bounds before clamping.
    pub fn theta_clamp_overflow(theta_prev: u64, computed: i128, clamp: u64) -> Self {
        Self::theta("theta retarget exceeded clamp bounds")
            .with_context("theta_prev", theta_prev.to_string())
            .with_context("theta_next", computed.to_string())
            .with_context("clamp", clamp.to_string())
    }

    /// Nullifier already used within the TTL window.
    pub fn nullifier_reused(
        kind: ProofKind,
        nullifier: &Hash32,
        first_seen_height: u64,
        ttl_blocks: u64,
    ) -> Self {
        let mut context = ErrorContext::new();
        context.insert("proof_type".into(), kind.name().to_string());
        context.insert("nullifier".into(), format!("0x{}", hex::encode(nullifier)));
        context.insert("first_seen_height".into(), first_seen_height.to_string());
        context.insert("ttl_blocks".into(), ttl_blocks.to_string());
        ConsensusError::Nullifier {
            message: "nullifier already used within TTL window".into(),
            reason: NullifierReason::Reused,
            context,
        }
    }

    /// Nullifier derived under the wrong proof-kind domain.
    pub fn nullifier_domain_mismatch(kind: ProofKind, nullifier: &Hash32) -> Self {
        let mut context = ErrorContext::new();
        context.insert("proof_type".into(), kind.name().to_string());
        context.insert("nullifier".into(), format!("0x{}", hex::encode(nullifier)));
        ConsensusError::Nullifier {
            message: "nullifier domain mismatch for proof type".into(),
            reason: NullifierReason::DomainMismatch,
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ConsensusError::generic("x").code() as u16, 2000);
        assert_eq!(ConsensusError::policy("x").code() as u16, 2001);
        assert_eq!(ConsensusError::theta("x").code() as u16, 2002);
        assert_eq!(
            ConsensusError::nullifier_domain_mismatch(ProofKind::Ai, &[0u8; 32]).code() as u16,
            2003
        );
    }

    #[test]
    fn reused_nullifier_carries_full_context() {
        let n = [0xabu8; 32];
        let err = ConsensusError::nullifier_reused(ProofKind::Storage, &n, 41, 1024);
        let ctx = err.context();
        assert_eq!(ctx.get("proof_type").unwrap(), "STORAGE");
        assert_eq!(ctx.get("first_seen_height").unwrap(), "41");
        assert_eq!(ctx.get("ttl_blocks").unwrap(), "1024");
        assert!(ctx.get("nullifier").unwrap().starts_with("0xabab"));
        assert!(err.to_string().contains("reused"));
    }

    #[test]
    fn json_view_has_code_message_context() {
        let err = ConsensusError::policy_mismatch("caps.AI.per_type_micro", 5, 9);
        let v = err.to_json();
        assert_eq!(v["code"], 2001);
        assert_eq!(v["context"]["path"], "caps.AI.per_type_micro");
        assert_eq!(v["context"]["expected"], "5");
        assert_eq!(v["context"]["actual"], "9");
    }

    #[test]
    fn display_includes_code_prefix() {
        let err = ConsensusError::theta_invalid_window(0.0);
        assert!(err.to_string().starts_with("[2002]"));
    }
}
