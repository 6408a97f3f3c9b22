//! Θ retarget simulator
//!
//! Runs the difficulty loop over a fast regime followed by a slow regime and
//! prints the Θ trajectory plus the final share tiers. Handy for eyeballing
//! gain/half-life choices before committing them to a policy rollout.
//!
//! ```text
//!   retarget_sim [--theta 3000000] [--target 12] [--half-life 24]
//!                [--beta 0.9] [--blocks 40] [--fast-dt 9.6] [--slow-dt 15.6]
//! ```

#![forbid(unsafe_code)]

use std::env;

use anyhow::bail;
use tracing_subscriber::EnvFilter;

use poies::difficulty::{
    compute_share_tiers, init_state, update_theta, RetargetParams, RetargetState,
    DEFAULT_SHARE_TIERS,
};

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn flag_f64(args: &[String], key: &str, default: f64) -> anyhow::Result<f64> {
    match parse_flag(args, key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<f64>() {
            Ok(v) => Ok(v),
            Err(_) => bail!("{key} expects a number, got `{raw}`"),
        },
    }
}

fn flag_u64(args: &[String], key: &str, default: u64) -> anyhow::Result<u64> {
    match parse_flag(args, key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u64>() {
            Ok(v) => Ok(v),
            Err(_) => bail!("{key} expects an integer, got `{raw}`"),
        },
    }
}

fn show(tag: &str, state: &RetargetState) {
    let tiers = compute_share_tiers(state.theta_micro, &[16]);
    let k16 = tiers.first().map(|t| t.theta_share_micro).unwrap_or(0);
    println!(
        "{tag}: theta={:.6} nats  r_hat={:+.4}  K16 tau_share={:.6} nats",
        state.theta_micro as f64 / 1e6,
        state.ema_log_dt_over_t,
        k16 as f64 / 1e6,
    );
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let theta0 = flag_u64(&args, "--theta", 3_000_000)?;
    let blocks = flag_u64(&args, "--blocks", 40)?;
    let fast_dt = flag_f64(&args, "--fast-dt", 9.6)?;
    let slow_dt = flag_f64(&args, "--slow-dt", 15.6)?;

    let params = RetargetParams {
        target_block_time_s: flag_f64(&args, "--target", 12.0)?,
        half_life_blocks: flag_f64(&args, "--half-life", 24.0)?,
        gain_beta: flag_f64(&args, "--beta", 0.9)?,
        step_clamp_micro: flag_u64(&args, "--step-clamp", 500_000)?,
        theta_min_micro: flag_u64(&args, "--min", 800_000)?,
        theta_max_micro: flag_u64(&args, "--max", 20_000_000)?,
    };

    let mut state = init_state(params, theta0)?;
    show("init", &state);

    for i in 0..blocks {
        state = update_theta(&state, fast_dt, 1);
        if i == 0 || (i + 1) % 10 == 0 {
            show(&format!("fast{:<3}", i + 1), &state);
        }
    }
    for i in 0..blocks {
        state = update_theta(&state, slow_dt, 1);
        if i == 0 || (i + 1) % 10 == 0 {
            show(&format!("slow{:<3}", i + 1), &state);
        }
    }

    println!("share tiers at final theta:");
    for tier in compute_share_tiers(state.theta_micro, &DEFAULT_SHARE_TIERS) {
        println!(
            "  K={:<4} tau_share={:.6} nats  d_ratio_min={:.3}",
            tier.k,
            tier.theta_share_micro as f64 / 1e6,
            tier.d_ratio_min,
        );
    }
    Ok(())
}
