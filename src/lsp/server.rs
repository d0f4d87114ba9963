use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{stdin, stdout};
use tower_lsp::{LspService, Server};

use crate::Config;
use crate::config::ServerArgs;
use crate::lsp::backend::Backend;

/// Set to `1` by the smoke test so the server exits on its own
pub const TEST_EXIT_ENV: &str = "LIQUID_LS_TEST_EXIT";

/// Start the LSP server
pub async fn serve() -> Result<()> {
    let args = ServerArgs::parse();
    let config = Config::from_args(&args.validation)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    // Exit after a short delay so the integration test can read stdout to EOF
    if std::env::var(TEST_EXIT_ENV).as_deref() == Ok("1") {
        thread::spawn(|| {
            thread::sleep(Duration::from_secs(1));
            std::process::exit(0);
        });
    }

    let (service, socket) = LspService::build(move |client| Backend::new(client, config)).finish();

    Server::new(stdin(), stdout(), socket).serve(service).await;

    Ok(())
}
