//! # ripple_demo
//!
//! Builds a layout tree in a reactive world, moves its root and reports how
//! the change rippled through the systems.
//!
//! ```text
//! RUST_LOG=ripple_world=debug ripple_demo --nodes 40 --scheduler microtask --profile
//! ```
//!
//! Settings not given on the command line come from the `RIPPLE_*`
//! environment variables.

mod ui;

use std::cell::Cell;
use std::rc::Rc;

use anyhow::Result;
use clap::Parser;
use glam::Vec2;
use tokio::task::LocalSet;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ripple_world::{MutationFilter, SchedulerKind, World, WorldConfig};
use ui::{Hidden, Layout, Mounted, Offset};

#[derive(Parser, Debug)]
#[command(name = "ripple_demo", about = "Reactive layout tree demo")]
struct Args {
    /// Scheduler: immediate, microtask, frame or frame:<ms>.
    #[arg(short, long)]
    scheduler: Option<SchedulerKind>,

    /// Number of nodes in the tree.
    #[arg(short, long, default_value_t = 40)]
    nodes: usize,

    /// Children per node.
    #[arg(short, long, default_value_t = 3)]
    branching: usize,

    /// Record flush timings and print them at the end.
    #[arg(short, long)]
    profile: bool,

    /// Print the final world snapshot as JSON.
    #[arg(long)]
    dump: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ripple_demo=info".parse()?))
        .init();

    let args = Args::parse();
    // Deferred schedulers spawn their flushes onto the local task set.
    LocalSet::new().run_until(run(args)).await
}

async fn run(args: Args) -> Result<()> {
    let mut config = WorldConfig::from_env()?;
    if let Some(scheduler) = args.scheduler {
        config.scheduler = scheduler;
    }
    config.profiling |= args.profile;

    let world = World::with_config(config);
    ui::install(&world)?;

    let nodes = ui::build_tree(&world, args.nodes, args.branching)?;
    world.when_flushed().await?;
    let Some(&root) = nodes.first() else {
        info!("empty tree, nothing to do");
        return Ok(());
    };
    info!(nodes = nodes.len(), "tree built");

    let moved = Rc::new(Cell::new(0usize));
    let counter = Rc::clone(&moved);
    let subscription = world.on_mutation(
        move |event| {
            counter.set(counter.get() + 1);
            debug!(entity = %event.entity, kind = ?event.kind, "layout changed");
        },
        MutationFilter::all()
            .entity(root)
            .with_descendants()
            .component::<Layout>(),
    )?;

    world.set(root, Offset(Vec2::new(120.0, 48.0)))?;
    world.when_flushed().await?;
    info!(updates = moved.get(), "root moved");
    subscription.unsubscribe();

    if let Some(&last) = nodes.last() {
        world.add(last, Hidden)?;
        world.when_flushed().await?;
        info!(
            entity = %last,
            mounted = world.has::<Mounted>(last),
            "last node hidden"
        );
    }

    if let Some(layout) = nodes.last().and_then(|&last| world.get::<Layout>(last)) {
        info!(x = layout.0.x, y = layout.0.y, "deepest layout");
    }

    if world.is_profiling() {
        if let Some(profile) = world.last_flush_profile() {
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        println!("{}", serde_json::to_string_pretty(&world.profiling_stats())?);
    }
    if args.dump {
        println!("{}", serde_json::to_string_pretty(&world.snapshot())?);
    }

    info!("done");
    Ok(())
}
