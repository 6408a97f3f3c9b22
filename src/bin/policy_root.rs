//! Policy inspection CLI
//!
//! Loads a PoIES policy JSON document, validates it, and prints the
//! canonical commitment root plus a caps/escort summary:
//!
//! ```text
//!   policy_root path/to/poies_policy.json
//! ```
//!
//! The root printed here is exactly what headers bind; two nodes disagreeing
//! on it are running different policies.

#![forbid(unsafe_code)]

use std::{env, fs, process};

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use poies::policy::PoiesPolicy;
use poies::ProofKind;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("usage: policy_root <path/to/poies_policy.json>");
        process::exit(2);
    };

    let bytes = fs::read(path).with_context(|| format!("read policy file {path}"))?;
    let policy = PoiesPolicy::from_json_slice(&bytes)
        .with_context(|| format!("load policy from {path}"))?;

    println!("version: {}", policy.version);
    println!("gamma_cap_micro: {}", policy.gamma_cap);
    println!("nullifier_ttl_blocks: {}", policy.nullifier_ttl_blocks);
    println!("policy_root: {}", policy.hex_policy_root());
    for kind in ProofKind::ALL {
        let cap = policy.cap_for(kind);
        let mix = policy.target_mix_ppm.get(&kind).copied().unwrap_or(0);
        println!(
            "  caps[{}]: per_type={} per_proof_max={} target_mix_ppm={}",
            kind.name(),
            cap.per_type_micro,
            cap.per_proof_micro_max,
            mix,
        );
    }
    if let Some(escort) = &policy.escort {
        let useful: Vec<&str> = escort.useful_kinds.iter().map(|k| k.name()).collect();
        println!(
            "escort: enabled={} min_useful_ratio_bp={} useful=[{}]",
            escort.enabled,
            escort.min_useful_ratio_bp,
            useful.join(","),
        );
    } else {
        println!("escort: none");
    }
    Ok(())
}
