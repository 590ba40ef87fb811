// Print every housekeeping reading and health change published on zenoh
//
// Usage: cargo run --example reading_listener
use housekeeping::config::TOPIC_PREFIX;
use housekeeping::messages::{Reading, RuntimeHealth};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let topic = format!("{}/**", TOPIC_PREFIX);
    let subscriber = session.declare_subscriber(topic.clone()).await?;
    info!("Subscribed to: {}", topic);

    while let Ok(sample) = subscriber.recv_async().await {
        let key = sample.key_expr().as_str().to_string();
        let payload = sample.payload().to_bytes();

        if key.ends_with("/reading") {
            match serde_json::from_slice::<Reading>(&payload) {
                Ok(reading) => {
                    let values: Vec<String> = reading
                        .values
                        .iter()
                        .map(|(name, value)| format!("{}={}", name, value))
                        .collect();
                    println!(
                        "{} {} {}",
                        reading.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        reading.instrument,
                        values.join(" ")
                    );
                }
                Err(e) => warn!("Failed to parse reading on {}: {}", key, e),
            }
        } else if key.ends_with("/health") {
            match serde_json::from_slice::<RuntimeHealth>(&payload) {
                Ok(RuntimeHealth::Ok) => {}
                Ok(health) => warn!("{}: {:?}", key, health),
                Err(e) => warn!("Failed to parse health on {}: {}", key, e),
            }
        } else {
            info!("{}: {}", key, String::from_utf8_lossy(&payload));
        }
    }

    Ok(())
}
