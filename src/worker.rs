//! Worker process receive loop.
//!
//! Runs as a child process spawned by the supervisor. Reads JSON requests
//! from stdin, runs decisions against cached models, and writes JSON
//! responses to stdout. All log output goes to stderr (inherited by the
//! parent).
//!
//! This loop is the only place models are instantiated and torn down. It has
//! to live in its own OS process: backends may hold non-shareable accelerator
//! state, and a hard crash here must not take down the host application.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::cache_key::derive_cache_key;
use crate::decider::{BackendRegistry, ModelCache};
use crate::ipc::{ConfigurationSnapshot, WorkerRequest, WorkerResponse, UNKNOWN_REQUEST_ID};
use crate::transport::{
    JsonLinesWriter, MessageReceiver, MessageSender, Received, ThreadedReceiver,
};

/// Worker process entry point. Blocks until shutdown, then exits the process.
pub fn run_worker() -> ! {
    eprintln!(
        "[WORKER] Starting decision worker process (pid={})",
        std::process::id()
    );

    let registry = BackendRegistry::default();
    // A dedicated thread feeds stdin lines into a channel; the loop below
    // blocks on that channel and observes EOF as a normal close.
    let requests: ThreadedReceiver<WorkerRequest> = ThreadedReceiver::spawn(io::stdin());
    let responses = JsonLinesWriter::new(io::stdout());

    let mut cache = ModelCache::new();
    serve(requests, responses, &registry, &mut cache);

    eprintln!("[WORKER] Exiting");
    std::process::exit(0);
}

/// The receive-compute-reply loop. Returns when a shutdown request arrives or
/// the request stream closes; the cache's teardown has run by then.
pub fn serve<R, S>(mut requests: R, mut responses: S, registry: &BackendRegistry, cache: &mut ModelCache)
where
    R: MessageReceiver<WorkerRequest>,
    S: MessageSender<WorkerResponse>,
{
    eprintln!("[WORKER] Ready, waiting for requests...");

    loop {
        match requests.receive() {
            Received::Closed => {
                eprintln!("[WORKER] Request stream closed, shutting down");
                cache.shutdown();
                break;
            }
            Received::Malformed(error) => {
                eprintln!("[WORKER] Failed to parse request: {error}");
                let response = WorkerResponse::error(UNKNOWN_REQUEST_ID, error);
                if responses.send(&response).is_err() {
                    break;
                }
            }
            Received::Message(WorkerRequest::Shutdown { request_id }) => {
                eprintln!("[WORKER] Shutdown requested (request_id={request_id})");
                cache.shutdown();
                break;
            }
            Received::Message(WorkerRequest::Run { request_id, config }) => {
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| handle_run(cache, registry, &config)));
                let response = match outcome {
                    Ok(Ok(result)) => WorkerResponse::ok(request_id, result),
                    Ok(Err(error)) => {
                        eprintln!("[WORKER] Decision failed: {error:#}");
                        // anyhow's debug form carries the chain and, when
                        // RUST_BACKTRACE is set, the capture site trace.
                        WorkerResponse::error(request_id, format!("{error:?}"))
                    }
                    Err(panic) => {
                        let message = panic_message(panic);
                        eprintln!("[WORKER] Decision panicked: {message}");
                        WorkerResponse::error(request_id, format!("decision panicked: {message}"))
                    }
                };
                if responses.send(&response).is_err() {
                    eprintln!("[WORKER] Response stream closed, shutting down");
                    cache.shutdown();
                    break;
                }
            }
        }
    }
}

/// Resolve the cache key, reuse or instantiate the model, run one decision.
fn handle_run(
    cache: &mut ModelCache,
    registry: &BackendRegistry,
    config: &ConfigurationSnapshot,
) -> anyhow::Result<crate::ipc::DecisionResult> {
    let key = derive_cache_key(&config.resolved_config);
    if cache.contains(&key) {
        eprintln!("[WORKER] Model cache hit: {key}");
    } else {
        eprintln!("[WORKER] Loading model for cache key: {key}");
    }
    let model = cache.entry_or_instantiate(&key, registry, &config.resolved_config)?;
    model.compute(config)
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic in decision handler".to_string()
    }
}
