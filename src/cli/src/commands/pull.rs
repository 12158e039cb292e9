//! `peerpull pull` command.

use std::time::Duration;

use clap::Args;

use peerpull_runtime::pull::{LoadOption, PullOptions};
use peerpull_runtime::{LayerSelection, Puller};

#[derive(Args)]
pub struct PullArgs {
    /// Image reference (e.g. "quay.example/ns/img:v1")
    pub image: String,

    /// Pull the squashed version of the image
    #[arg(long)]
    pub squashed: bool,

    /// Keep seeding for the given number of seconds after the pull;
    /// 0 seeds until interrupted
    #[arg(long, value_name = "SECONDS")]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub swarm: super::SwarmFlags,
}

pub async fn execute(args: PullArgs) -> Result<(), Box<dyn std::error::Error>> {
    let engine = super::open_engine()?;
    let client = args.swarm.build_client()?;
    let puller = Puller::new(engine, client);

    let options = PullOptions {
        insecure: args.swarm.insecure,
        squashed: args.squashed,
        load: LoadOption::Perform,
        selection: LayerSelection::Missing,
        seed_window: args.seed.map(Duration::from_secs),
        local_ip: args.swarm.local_ip.clone(),
        save_dir: args.swarm.save_dir(),
        legacy_archive_load: args.swarm.legacy_load,
        handle_signals: true,
        ..PullOptions::default()
    };

    puller.pull(&args.image, &options).await?;

    tracing::info!("Successfully pulled image {}", args.image);
    Ok(())
}
