use axum::Json;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::{Router, routing::get};
use chainkv::chain::handlers;
use chainkv::chain::node::ChainNode;
use chainkv::chain::types::NeighborPos;
use chainkv::coordinator::client::register;
use chainkv::storage::memory::MemStore;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 5 {
        eprintln!(
            "Usage: {} --bind <addr:port> --coordinator <addr:port>",
            args[0]
        );
        eprintln!(
            "Example: {} --bind 127.0.0.1:6001 --coordinator 127.0.0.1:5000",
            args[0]
        );
        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut coordinator_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--coordinator" => {
                coordinator_path = Some(args[i + 1].clone());
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.expect("--bind is required");
    let coordinator_path = coordinator_path.expect("--coordinator is required");

    tracing::info!("Starting chain node on {}", bind_addr);
    tracing::info!("Coordinator at {}", coordinator_path);

    let request_timeout_ms = std::env::var("REQUEST_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(3000);
    let write_timeout_ms = std::env::var("WRITE_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(5000);
    let max_body_bytes = std::env::var("MAX_BODY_BYTES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(4 * 1024 * 1024);

    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(request_timeout_ms))
        .build()?;

    // 1. Storage and node core:
    let store = Arc::new(MemStore::new());
    let node = Arc::new(ChainNode::new(
        &bind_addr.to_string(),
        store,
        http.clone(),
        Duration::from_millis(write_timeout_ms),
    )?);

    // 2. HTTP router:
    let app = Router::new()
        .route("/health/routes", get(handle_routes))
        .route("/health/stats", get(handle_stats))
        .merge(handlers::router(node.clone()))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(Extension(node.clone()));

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    // 3. Serve and announce concurrently. Losing the coordinator at startup
    //    is fatal: the first error tears both down and the process exits.
    tokio::try_join!(
        async {
            axum::serve(listener, app).await?;
            Ok::<(), anyhow::Error>(())
        },
        async {
            register(node.as_ref(), &coordinator_path, http.clone()).await?;
            Ok::<(), anyhow::Error>(())
        },
    )?;

    Ok(())
}

#[derive(Serialize)]
struct RoutesResponse {
    routes: Vec<&'static str>,
}

#[derive(Serialize)]
struct NodeStatsResponse {
    path: String,
    role: String,
    predecessor: Option<String>,
    successor: Option<String>,
    tail: Option<String>,
    tracked_keys: usize,
    dirty_items: usize,
    committed_items: usize,
    cpu_usage: f32,
    mem_used_mb: u64,
    mem_total_mb: u64,
}

async fn handle_routes() -> Json<RoutesResponse> {
    Json(RoutesResponse {
        routes: vec![
            "/health/routes",
            "/health/stats",
            "/write",
            "/read/:key",
            "/internal/forward",
            "/internal/commit",
            "/internal/latest",
            "/internal/item",
            "/internal/fwd_propagate",
            "/internal/back_propagate",
            "/internal/neighbor",
        ],
    })
}

async fn handle_stats(
    Extension(node): Extension<Arc<ChainNode>>,
) -> Json<NodeStatsResponse> {
    let topo = node.topology().await;
    let neighbor_path =
        |pos: NeighborPos| topo.neighbor(pos).map(|nbr| nbr.path.clone());

    let dirty_items = node.store().all_dirty().map(|items| items.len()).unwrap_or(0);
    let committed_items = node
        .store()
        .all_committed()
        .map(|items| items.len())
        .unwrap_or(0);

    let mut sys = System::new_all();
    sys.refresh_cpu();
    sys.refresh_memory();
    let cpu_usage = sys.global_cpu_info().cpu_usage();
    // sysinfo returns bytes for memory values.
    let mem_total_mb = sys.total_memory() / (1024 * 1024);
    let mem_used_mb = sys.used_memory() / (1024 * 1024);

    Json(NodeStatsResponse {
        path: node.path().to_string(),
        role: format!("{:?}", topo.role()),
        predecessor: neighbor_path(NeighborPos::Predecessor),
        successor: neighbor_path(NeighborPos::Successor),
        tail: neighbor_path(NeighborPos::Tail),
        tracked_keys: node.tracked_keys(),
        dirty_items,
        committed_items,
        cpu_usage,
        mem_used_mb,
        mem_total_mb,
    })
}
