use std::{net::SocketAddr, thread};

use axum::Router;
use axum::http::header;
use axum::routing::get;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

use crate::engine::live_reload_script;

/// Path the live-reload client is served from.
pub const LIVE_SCRIPT_ROUTE: &str = "/__kumitate/live.js";

/// Serves the dev output on port 8080 from a background thread.
pub fn start(root: Utf8PathBuf, ws_port: u16) -> thread::JoinHandle<Result<(), anyhow::Error>> {
    let port = 8080;

    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

    thread::spawn(move || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(serve(port, root, ws_port))
    })
}

async fn serve(port: u16, root: Utf8PathBuf, ws_port: u16) -> Result<(), anyhow::Error> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let address = tokio::net::TcpListener::bind(address).await?;

    let script = live_reload_script(ws_port);

    let router = Router::new()
        .route(
            LIVE_SCRIPT_ROUTE,
            get(move || {
                let script = script.clone();
                async move { ([(header::CONTENT_TYPE, "text/javascript")], script) }
            }),
        )
        .fallback_service(ServeDir::new(root));

    axum::serve(address, router).await?;

    Ok(())
}
