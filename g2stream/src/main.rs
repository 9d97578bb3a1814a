use anyhow::Result;
use std::io::Write;
use tracing_subscriber::EnvFilter;

use g2stream::{controller, CliArgs};

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

#[tokio::main]
async fn main() -> Result<()> {
    let args: CliArgs = argh::from_env();

    if args.version {
        let stdout = std::io::stdout();
        let mut stdout = stdout.lock();
        writeln!(
            stdout,
            concat!(
                env!("CARGO_BIN_NAME"),
                " ",
                "{}",
            ),
            GIT_VERSION,
        )?;
        return Ok(())
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    controller::main(args).await
}
