//! Id command - Generate run identifiers.

use anyhow::Result;
use clap::Args;

use tfprobe_core::RunIdentifier;

#[derive(Args)]
pub struct IdArgs {
    /// Human-readable prefix
    pub prefix: String,

    /// How many identifiers to print
    #[arg(short, long, default_value_t = 1)]
    pub count: usize,
}

pub async fn execute(args: IdArgs) -> Result<()> {
    for _ in 0..args.count {
        println!("{}", RunIdentifier::generate(&args.prefix)?);
    }
    Ok(())
}
