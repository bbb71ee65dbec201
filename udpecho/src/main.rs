use clap::Parser;
mod args;
mod logger;
mod probe;
mod protocol;
mod respond;
use anyhow::Result;
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = args::Opts::parse();

    match args.mode {
        args::Modes::Probe { source } => {
            let opts = source.resolve()?;
            let mut prober = probe::Prober::new(opts)?;
            prober.run().await?;
        }
        args::Modes::Respond(opts) => {
            let mut responder = respond::Responder::new(opts)?;
            responder.run().await?;
        }
    };
    Ok(())
}

/// Token cancelled on the first ctrl-c, so the run loops can finish their
/// current iteration and tear down in order.
pub(crate) fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    token
}
