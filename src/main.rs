//! Binary entry point.
//!
//! `adm_workbench --worker` runs the worker receive loop; the supervisor
//! spawns this same binary with that flag. Without `--worker`, a small demo
//! drives one decision through the full out-of-process path, which doubles
//! as a smoke test of a fresh checkout.

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use serde_json::json;

use adm_workbench::{ConfigurationSnapshot, DecisionClient, ExecSettings};

fn main() {
    if std::env::args().any(|arg| arg == "--worker") {
        adm_workbench::worker::run_worker();
    }

    init_logging();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    let exit_code = runtime.block_on(run_demo());
    std::process::exit(exit_code);
}

fn init_logging() {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {m}{n}",
        )))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(LevelFilter::Info))
        .expect("invalid logging config");

    log4rs::init_config(config).expect("failed to initialize logging");
}

/// One full round trip: spawn the worker, run a decision against the
/// baseline backend, show the cache taking effect, shut down.
async fn run_demo() -> i32 {
    let client = DecisionClient::new(ExecSettings::default());

    let snapshot = ConfigurationSnapshot {
        scenario_input: json!({
            "probe_id": "demo-probe",
            "unstructured": "Two casualties, one med kit.",
            "characters": [
                {"name": "Alpha", "unstructured": "stable"},
                {"name": "Bravo", "unstructured": "critical"},
            ],
            "choices": [
                {"unstructured": "Treat Alpha", "kdma_association": {"urgency": 0.2}},
                {"unstructured": "Treat Bravo", "kdma_association": {"urgency": 0.9}},
            ],
        }),
        alignment_target: json!({
            "id": "high-urgency",
            "kdma_values": [{"kdma": "urgency", "value": 0.9}],
        }),
        resolved_config: json!({
            "model_path_keys": ["model_name"],
            "llm_backbone": {"model_name": "kdma-baseline"},
            "instance": {"_target_": "kdma_baseline"},
        }),
    };

    let resolved_config = snapshot.resolved_config.clone();
    log::info!(
        "model cached before first run: {}",
        client.is_model_cached(&resolved_config).await
    );

    let code = match client.get_decision(snapshot).await {
        Ok(result) => {
            log::info!("decision: {}", result.decision.unstructured);
            log::info!("justification: {}", result.decision.justification);
            log::info!(
                "model cached after run: {}",
                client.is_model_cached(&resolved_config).await
            );
            match serde_json::to_string_pretty(&result) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => log::error!("failed to render result: {e}"),
            }
            0
        }
        Err(e) => {
            log::error!("decision failed: {e}");
            1
        }
    };

    client.close().await;
    code
}
