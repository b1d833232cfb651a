//! Inspect a level file: entity counts, portal wiring, visibility load.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use sectorport::io;
use sectorport::topo::Level;

#[derive(Parser)]
#[command(about = "Print statistics for a level file")]
struct Args {
    /// Level file to inspect
    level: PathBuf,

    /// Run the full back-reference consistency sweep (panics on corruption)
    #[arg(long)]
    check: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let level = io::load_file(&args.level)
        .with_context(|| format!("loading {}", args.level.display()))?;

    if args.check {
        level.assert_consistent();
        println!("consistency: ok");
    }

    print_stats(&level);
    Ok(())
}

fn print_stats(level: &Level) {
    println!("vertices:   {}", level.verts.len());
    println!("walls:      {}", level.walls.len());
    println!("sides:      {}", level.sides.len());
    println!("sectors:    {}", level.sectors.len());
    println!("subsectors: {}", level.subsectors.len());
    println!("objects:    {}", level.objects.len());

    let mut portals = 0usize;
    let mut disconnected = 0usize;
    for (s, side) in level.sides.iter() {
        if side.portal.is_some() {
            portals += 1;
            if level.portal_target(s).is_none() {
                disconnected += 1;
            }
        }
    }
    println!("portal sides: {portals} ({disconnected} one-directional)");

    // how much of the sector-pair space the PVS marks visible
    let live: Vec<_> = level.sectors.iter().map(|(h, _)| h).collect();
    let pairs = live.len() * live.len();
    if pairs > 0 {
        let set = live
            .iter()
            .flat_map(|a| live.iter().map(move |b| (a, b)))
            .filter(|(a, b)| level.vis.get(a.index(), b.index()))
            .count();
        println!(
            "visibility: {set}/{pairs} sector pairs ({:.1}%)",
            100.0 * set as f64 / pairs as f64
        );
    }
}
