//! Connection manager walkthrough.
//!
//! Runs the manager against the in-memory mock driver, so no database is
//! needed: statements are recorded instead of executed, and one connection
//! is killed halfway through to show checkout validation replacing it.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=sqlpool=debug cargo run -p sqlpool-manager --example connection_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use sqlpool::Value;
use sqlpool_manager::{ConnectionManager, ManagerError, StoreConfig};
use sqlpool_testing::MockDriver;

const CONFIG: &str = r#"
[store]
host = "127.0.0.1"
port = 3306
username = "tutor"
password = "secret"
db = "classroom"

[pool]
max_connections = 4
min_cached = 2
max_cached = 3
blocking = true
connection_timeout_secs = 5
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Connection Manager Example ===\n");

    let config = StoreConfig::from_toml_str(CONFIG)?.apply_env_overrides();
    let driver = MockDriver::new();
    driver.with_rows(
        "SELECT id, text FROM hints WHERE question_id = ?",
        &["id", "text"],
        vec![
            vec![Value::Int(1), Value::from("Try halves")],
            vec![Value::Int(2), Value::from("Draw the number line")],
        ],
    );

    let manager = Arc::new(ConnectionManager::connect(driver.clone(), &config).await?);
    println!("Connected to {}:{} as {}", manager.host(), manager.port(), manager.username());
    print_status(&manager);

    // Single insert
    let id = manager
        .execute(
            "INSERT INTO hints (question_id, text) VALUES (?, ?)",
            &[Value::Int(7), Value::from("Try halves")],
        )
        .await?;
    println!("\nInserted hint with id {id:?}");

    // Batch insert
    let rows: Vec<Vec<Value>> = (1..=3)
        .map(|step| vec![Value::Int(7), Value::Int(step)])
        .collect();
    let last = manager
        .execute_many("INSERT INTO steps (question_id, step) VALUES (?, ?)", &rows)
        .await?;
    println!("Inserted {} steps, last id {last:?}", rows.len());

    // Query
    let hints = manager
        .query("SELECT id, text FROM hints WHERE question_id = ?", &[Value::Int(7)])
        .await?;
    for row in &hints {
        println!(
            "  hint {:?}: {:?}",
            row.get_by_name("id"),
            row.get_by_name("text").and_then(Value::as_str)
        );
    }

    // Concurrent callers share the pool
    println!("\nRunning 10 concurrent writers...");
    let tasks: Vec<_> = (0..10)
        .map(|n| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .execute("INSERT INTO attempts (n) VALUES (?)", &[Value::Int(n)])
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await??;
    }
    print_status(&manager);

    // A dead idle connection is replaced on checkout
    driver.kill_all();
    manager.execute("UPDATE progress SET solved = 1", &[]).await?;
    println!("\nRecovered from dead connections, {} opened in total", driver.connect_count());

    // Failed statements are rolled back and reported
    driver.fail_statements_containing("missing_table");
    match manager.query("SELECT * FROM missing_table", &[]).await {
        Err(ManagerError::Statement { operation, source, .. }) => {
            println!("\n{operation} rolled back: {source}");
        }
        other => println!("\nunexpected result: {other:?}"),
    }

    manager.close().await;
    println!("\nPool closed, {} connections still open", driver.open_count());

    Ok(())
}

fn print_status(manager: &ConnectionManager<MockDriver>) {
    let status = manager.status();
    println!(
        "Pool: {} idle, {} in use, {}/{} allocated",
        status.available, status.in_use, status.total, status.max
    );
}
