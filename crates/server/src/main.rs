#[tokio::main]
async fn main() -> anyhow::Result<()> {
    devotio_server::start().await
}
