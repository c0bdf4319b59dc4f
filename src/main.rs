#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tunebot::run().await
}
