//! Minimal end-to-end exercise of the client against an in-memory-only
//! engine (no L2/L3 configured) -- run with:
//!
//! ```sh
//! cargo run -p nuvex-client --example quickstart
//! ```

use nuvex_client::Client;
use nuvex_core::{EngineConfig, GetOptions, PostgresConfig, SetOptions};
use serde_json::json;

#[tokio::main]
async fn main() {
    let config = EngineConfig {
        postgres: PostgresConfig { host: String::new(), ..PostgresConfig::default() },
        ..EngineConfig::default()
    };
    let client = Client::create(config).await.expect("in-memory engine should always connect");

    client
        .set("session:42", &json!({"user": "ada", "role": "admin"}), &SetOptions::default())
        .await
        .expect("set should succeed");

    let value = client.get("session:42", &GetOptions::none()).await.expect("get should succeed");
    println!("session:42 = {value:?}");

    let hits = client.increment("session:42:views", 1, None).await.expect("increment should succeed");
    println!("session:42:views = {hits}");

    client.shutdown().await;
}
