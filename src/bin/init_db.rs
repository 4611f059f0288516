// Checks that the database is reachable and creates tables and indexes.
// Usage: DATABASE_PATH=data/mention_tracker.db cargo run --bin init_db

use anyhow::Context;
use mention_tracker::store::{database_path, Store};
use mention_tracker::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let path = database_path();
    let store = Store::open(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    store.ping().await.context("connectivity check")?;
    store.migrate().await.context("creating schema")?;

    let items = store.count_items().await?;
    println!("database ready at {} ({items} items)", path.display());
    Ok(())
}
