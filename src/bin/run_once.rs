// Executes one pipeline run and exits 0 on success, 1 on failure.
// Usage: cargo run --bin run_once

use std::process::ExitCode;

use mention_tracker::{bootstrap, telemetry};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let rt = match bootstrap().await {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("startup failed: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let summary = rt.pipeline.run_now().await;
    match serde_json::to_string_pretty(&summary) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("could not render summary: {e}"),
    }

    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
