//! Example: Announcing a certificate rotation
//!
//! Run with: cargo run --example publisher -- <app_id>

use credential_rotation::RotationPublisher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let redis_url = "redis://127.0.0.1:6379";
    let app_id: i64 = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "7".to_string())
        .parse()?;

    let publisher = RotationPublisher::new(redis_url).await?;
    let subscribers = publisher.announce(app_id).await?;
    println!("Rotation for app {} reached {} subscribers", app_id, subscribers);

    Ok(())
}
