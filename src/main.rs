mod cli;

use clap::Parser;
use cli::Cli;
use contentmig::migration::Shutdown;
use contentmig::observability;
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    observability::init_tracing();

    let cli = Cli::parse();
    let shutdown = Shutdown::new();
    let listener = cli.command.traps_signals().then(|| shutdown.listen());

    let result = cli::run(cli, shutdown.clone()).await;
    if let Some(listener) = listener {
        listener.abort();
    }

    if let Some(code) = shutdown.exit_code() {
        if let Err(e) = &result {
            error!(error = %e, "Run failed while shutting down");
        }
        return ExitCode::from(u8::try_from(code).unwrap_or(1));
    }

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(error = %e, "Migration aborted");
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}
