//! `peerpull version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs {}

pub async fn execute(_args: VersionArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("peerpull {}", env!("CARGO_PKG_VERSION"));
    println!("runtime  {}", peerpull_runtime::VERSION);
    Ok(())
}
