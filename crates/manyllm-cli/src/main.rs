use clap::Parser;
use manyllm_cli::CliArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    manyllm_cli::run(args).await?;
    Ok(())
}
