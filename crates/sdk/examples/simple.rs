//! Simple SDK Example
//!
//! Demonstrates basic usage of the Quiver SDK.
//!
//! # Usage
//!
//! 1. Start the daemon:
//!    ```bash
//!    cargo run --package quiver-daemon
//!    ```
//!
//! 2. Run this example:
//!    ```bash
//!    cargo run --package quiver-sdk --example simple
//!    ```

use quiver_sdk::{EnqueueRequest, QuiverClient, TaskArgs};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Quiver SDK - Simple Example");
    println!("===========================\n");

    // 1. Connect to daemon
    println!("1. Connecting to daemon...");
    let client = QuiverClient::connect("http://127.0.0.1:9527").await?;
    let health = client.health().await?;
    println!("   ✓ Connected (daemon {})\n", health.version);

    // 2. Submit a task to the built-in echo handler
    println!("2. Sending an echo task...");
    let response = client
        .enqueue(
            EnqueueRequest::new("echo", TaskArgs::positional(["hello from the sdk"]))
                .max_retries(2),
        )
        .await?;
    println!("   ✓ Task enqueued:");
    println!("     - ID: {}", response.task_id);
    println!("     - Queue: {}\n", response.queue);

    // 3. Wait for its result
    println!("3. Waiting for the result...");
    let result = client
        .wait_result(&response.task_id, Duration::from_secs(10), true)
        .await?;
    match result.value() {
        Some(value) => println!("   ✓ Succeeded after {} attempt(s): {:?}\n", result.attempts, value),
        None => println!("   ✗ Failed: {:?}\n", result.error()),
    }

    // 4. Queue statistics
    println!("4. Queue statistics...");
    let stats = client.stats(None).await?;
    println!(
        "   ✓ {}: ready={} delayed={} in_flight={} dead={}",
        stats.queue, stats.counts.ready, stats.counts.delayed, stats.counts.in_flight, stats.counts.dead
    );

    Ok(())
}
