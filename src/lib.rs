//! Crate root: public surface, fixed-point aliases, and consensus-wide invariants
//!
//! This crate is the deterministic core of PoIES ("Proof of Integrated
//! Entropy Score") consensus: it decides whether a candidate block is
//! admissible and, given a set of admissible tips, which one is canonical.
//! Five heterogeneous proof streams (a classical hash-share draw plus
//! AI / Quantum / Storage / VDF useful-work proofs) are fused into a single
//! integer acceptance predicate
//!
//! ```text
//!     S = H(u) + Σ ψ_capped   ≥   Θ
//! ```
//!
//! where every quantity is an integer in **µ-nats** (10⁻⁶ natural-log units).
//!
//! ## Invariants (consensus-critical)
//!
//! - **No floats on the wire.** All consensus-carried quantities are scaled
//!   integers: µ-nats for ψ/Θ/Γ/S, ppm for shares, basis points for ratios,
//!   `SCALE = 10⁹` fixed-point for fairness weights. Per-kind scoring hooks
//!   may compute in `f64` but convert exactly once at the µ-nat boundary and
//!   never carry a float further.
//! - **No platform libm for H(u).** The entropy term −ln u is computed with
//!   fixed-precision big-integer arithmetic (320 fractional bits) and
//!   round-half-even, so every node produces bit-identical µ-nats. See
//!   [`math`].
//! - **Deterministic tie-breaks everywhere.** Proportional cap downscaling
//!   breaks rounding ties by proof id then input index; fork choice breaks
//!   weight/height ties by lexicographically smallest hash.
//! - **Single-writer, many-reader.** The pure layers (math, policy, caps,
//!   scorer, difficulty update, α update) have no interior state. The three
//!   stateful services (fork choice, retarget loop, α-tuner) each own their
//!   state and expose atomic, non-reentrant operations; callers serialize
//!   access per instance.
//!
//! If any invariant is violated at runtime the failure mode is a structured
//! [`errors::ConsensusError`] with a stable integer code — never a panic in
//! library code.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// α-tuner: slow multiplicative fairness weights across proof kinds.
pub mod alpha_tuner;
/// Cap engine: per-proof → per-type → Γ clipping with deterministic rounding.
pub mod caps;
/// Difficulty schedule: bounded EMA retarget of Θ and share thresholds.
pub mod difficulty;
/// Structured consensus errors with stable integer codes.
pub mod errors;
/// Weight-aware deterministic fork choice with reorg path computation.
pub mod fork_choice;
/// Deterministic fixed-point numerics: H(u) = −ln u in µ-nats, conversions.
pub mod math;
/// PoIES policy: typed model, JSON loader, canonical-JSON commitment root.
pub mod policy;
/// Scorer: proof metrics → ψ contributions, aggregation, acceptance.
pub mod scorer;
/// Proof kinds (closed enumeration with stable ids) and root bindings.
pub mod types;
/// Block validator: root binding, nullifiers, verification, acceptance.
pub mod validator;
/// Verifier protocol, registry, and proof envelope types.
pub mod verifier;

// ============================================================================
// Canonical scales and fixed-point aliases (centralization)
// ============================================================================

/// µ-nat scale: 1 nat == 1_000_000 µ-nats.
pub const MICRO_SCALE: u64 = 1_000_000;

/// Parts-per-million scale (ratios, policy shares).
pub const PPM_SCALE: u64 = 1_000_000;

/// Basis-point scale: 10_000 bp == 100%.
pub const BP_SCALE: u64 = 10_000;

/// A non-negative quantity in µ-nats (10⁻⁶ natural-log units).
pub type MicroNat = u64;

/// ψ — a single proof's contribution to the block score, in µ-nats.
pub type Psi = MicroNat;

/// Θ — the per-block acceptance threshold, in µ-nats.
pub type ThetaMicro = MicroNat;

/// Γ — the global per-block cap on Σψ, in µ-nats.
pub type GammaMicro = MicroNat;

/// Parts-per-million ratio.
pub type Ppm = u64;

/// Block height.
pub type Height = u64;

/// A 32-byte hash (block hashes, roots, nullifiers).
pub type Hash32 = [u8; 32];

// Root-level re-exports: downstream code imports the main types from here.
pub use crate::errors::{ConsensusError, ErrorCode, NullifierReason};
pub use crate::types::{PolicyRoots, ProofKind};
