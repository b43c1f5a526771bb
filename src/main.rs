#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = autograde::run().await {
        eprintln!("autograde fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
