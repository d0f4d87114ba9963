use anyhow::Result;
use liquid_template_validator::lsp::server::serve;

#[tokio::main]
async fn main() -> Result<()> {
    serve().await
}
