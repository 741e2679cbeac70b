//! Notify Worker - Entry Point
//!
//! Background worker that delivers queued issue notifications.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    notify_worker::run().await
}
