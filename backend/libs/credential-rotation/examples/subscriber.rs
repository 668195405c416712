//! Example: Watching certificate rotation events
//!
//! Run with: cargo run --example subscriber

use credential_rotation::{parse_application_id, RedisRotationFeed, RotationFeed};
use futures_util::StreamExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let feed = RedisRotationFeed::new("redis://127.0.0.1:6379")?;
    let mut stream = feed.subscribe().await?;

    println!("Listening on {}. Press Ctrl+C to stop.", feed.channel());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            item = stream.next() => match item {
                Some(Ok(body)) => match parse_application_id(&body) {
                    Ok(app_id) => println!("app {} rotated its certificate", app_id),
                    Err(e) => println!("ignored: {}", e),
                },
                Some(Err(e)) => {
                    println!("subscription error: {}", e);
                    break;
                }
                None => {
                    println!("subscription closed");
                    break;
                }
            }
        }
    }

    Ok(())
}
