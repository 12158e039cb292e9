//! `peerpull seed` command: download an image's blobs and serve them to
//! other clients without loading the image.

use std::time::Duration;

use clap::Args;

use peerpull_runtime::pull::{LoadOption, PullOptions};
use peerpull_runtime::{LayerSelection, Puller};

#[derive(Args)]
pub struct SeedArgs {
    /// Image reference (e.g. "quay.example/ns/img:v1")
    pub image: String,

    /// Duration of the seeding in seconds. If not specified, seeds until
    /// interrupted.
    #[arg(long, default_value_t = 0)]
    pub duration: u64,

    /// Seed the squashed version of the image
    #[arg(long)]
    pub squashed: bool,

    #[command(flatten)]
    pub swarm: super::SwarmFlags,
}

pub async fn execute(args: SeedArgs) -> Result<(), Box<dyn std::error::Error>> {
    let engine = super::open_engine()?;
    let client = args.swarm.build_client()?;
    let puller = Puller::new(engine, client);

    let options = PullOptions {
        insecure: args.swarm.insecure,
        squashed: args.squashed,
        load: LoadOption::Skip,
        // Seeding serves every blob, present or not.
        selection: LayerSelection::All,
        seed_window: Some(Duration::from_secs(args.duration)),
        local_ip: args.swarm.local_ip.clone(),
        save_dir: args.swarm.save_dir(),
        legacy_archive_load: false,
        handle_signals: true,
        ..PullOptions::default()
    };

    puller.pull(&args.image, &options).await?;
    Ok(())
}
