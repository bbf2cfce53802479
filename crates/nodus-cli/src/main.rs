//! Driver binary for the `nodus` IR core: builds a small demonstration
//! program directly through the builder API and runs it through the
//! `nodus-passes` pipeline, standing in for the surface-language frontends
//! and target backends this workspace otherwise omits by design.

mod demo;

use clap::Parser;
use nodus_core::{World, WorldConfig};
use serde::Serialize;

/// nodus IR pipeline driver.
#[derive(Parser)]
#[command(name = "nodus", about = "Hash-consed CPS IR core: build and optimize a demonstration program")]
struct Cli {
    /// Disable constant folding and algebraic simplification while
    /// building the graph.
    #[arg(long)]
    no_fold: bool,

    /// Disable common-subexpression elimination (value numbering) while
    /// building the graph.
    #[arg(long)]
    no_cse: bool,

    /// SIMD lane width to vectorize the optimized entry at. 1 skips
    /// vectorization.
    #[arg(long, default_value_t = 1)]
    lanes: u32,
}

#[derive(Serialize)]
struct Summary {
    defs_before: usize,
    defs_after_passes: usize,
    lower2cff_specialized: usize,
    partial_evals: usize,
    mem2reg_promoted: usize,
    copy_props: usize,
    lanes: u32,
    defs_final: usize,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = WorldConfig {
        fold_constants: !cli.no_fold,
        simplify_algebraic: !cli.no_fold,
        cse_enabled: !cli.no_cse,
    };
    let mut world = World::new(config);

    let entry = demo::build(&mut world);
    let defs_before = world.def_count();

    let lower2cff_specialized = nodus_passes::lower2cff(&mut world);
    let partial_evals = nodus_passes::partial_eval(&mut world);
    let mem2reg_promoted = nodus_passes::mem2reg(&mut world);
    let copy_props = nodus_passes::copy_prop(&mut world);
    nodus_passes::cleanup(&mut world);
    let defs_after_passes = world.def_count();

    if cli.lanes > 1 {
        let _ = nodus_passes::vectorize(&mut world, entry, cli.lanes);
    }
    let defs_final = world.def_count();

    let summary = Summary {
        defs_before,
        defs_after_passes,
        lower2cff_specialized,
        partial_evals,
        mem2reg_promoted,
        copy_props,
        lanes: cli.lanes,
        defs_final,
    };
    let json = serde_json::to_string_pretty(&summary).unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize summary: {}\"}}", e));
    println!("{}", json);
}
