use anyhow::Result;
use axum::extract::{Extension, Query};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use meshcache::group;
use meshcache::peers::server::Server;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut port: u16 = 8001;
    let mut api = false;
    let mut peers: Vec<String> = vec![];

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                port = args[i + 1].parse()?;
                i += 2;
            }
            "--api" => {
                api = true;
                i += 1;
            }
            "--peer" => {
                peers.push(args[i + 1].clone());
                i += 2;
            }
            "--help" | "-h" => {
                eprintln!("Usage: {} [--port <port>] [--api] [--peer <addr:port>]...", args[0]);
                eprintln!("Example: {} --port 8001 --api --peer 127.0.0.1:8002", args[0]);
                return Ok(());
            }
            _ => {
                i += 1;
            }
        }
    }

    let addr = format!("127.0.0.1:{}", port);
    if !peers.contains(&addr) {
        peers.push(addr.clone());
    }

    tracing::info!("starting cache node on {}", addr);
    tracing::info!("fleet members: {:?}", peers);

    // Mock source of truth the scores group falls back to on a miss.
    let db: HashMap<&'static str, &'static str> =
        HashMap::from([("Tom", "630"), ("Jack", "589"), ("Sam", "567")]);

    let group = group::new_group(
        "scores",
        2 << 10,
        Duration::from_secs(1),
        move |key: String| {
            let db = db.clone();
            async move {
                tracing::info!("[SlowDB] search key {}", key);
                match db.get(key.as_str()) {
                    Some(value) => Ok(value.as_bytes().to_vec()),
                    None => Err(anyhow::anyhow!("{} not exist", key)),
                }
            }
        },
    );

    let server = Server::new(&addr)?;
    server.set_peers(&peers)?;
    group.register_peers(server.clone());
    server.start().await?;

    if api {
        let api_addr = "127.0.0.1:9999";
        let app = Router::new()
            .route("/api", get(handle_api))
            .route("/api/stats", get(handle_stats))
            .layer(Extension(server.clone()));

        let listener = tokio::net::TcpListener::bind(api_addr).await?;
        tracing::info!("api server listening on http://{}", api_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("api server failed: {}", e);
            }
        });
    }

    tracing::info!("press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;

    server.stop();
    group::destroy_group("scores");
    tracing::info!("node on {} shut down cleanly", addr);
    Ok(())
}

/// User-facing lookup: `GET /api?key=<k>` against the scores group.
async fn handle_api(Query(params): Query<HashMap<String, String>>) -> Response {
    let Some(key) = params.get("key") else {
        return (StatusCode::BAD_REQUEST, "key is required").into_response();
    };

    let Some(group) = group::get_group("scores") else {
        return (StatusCode::NOT_FOUND, "group scores not found").into_response();
    };

    match group.get(key).await {
        Ok(view) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            view.to_vec(),
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response(),
    }
}

#[derive(Serialize)]
struct NodeStatsResponse {
    addr: String,
    running: bool,
    cached_entries: usize,
    cpu_usage: f32,
    mem_used_mb: u64,
    mem_total_mb: u64,
}

async fn handle_stats(Extension(server): Extension<Arc<Server>>) -> Json<NodeStatsResponse> {
    let mut sys = System::new_all();
    sys.refresh_cpu();
    sys.refresh_memory();
    let cpu_usage = sys.global_cpu_info().cpu_usage();
    // sysinfo returns bytes for memory values.
    let mem_total_mb = sys.total_memory() / (1024 * 1024);
    let mem_used_mb = sys.used_memory() / (1024 * 1024);

    let cached_entries = group::get_group("scores")
        .map(|g| g.cached_entries())
        .unwrap_or(0);

    Json(NodeStatsResponse {
        addr: server.addr().to_string(),
        running: server.is_running(),
        cached_entries,
        cpu_usage,
        mem_used_mb,
        mem_total_mb,
    })
}
