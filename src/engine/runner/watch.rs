//! Watch mode is implemented as a three-part system:
//!
//! 1. **File watcher**: Uses the `notify` crate to monitor the static roots of
//!    every watch binding. Events are debounced and handed to the
//!    [`DevLoop`](crate::engine::DevLoop), which decides what to rebuild.
//! 2. **WebSocket server**: Spawns a dedicated thread using `tungstenite`
//!    to maintain persistent connections with open browser tabs.
//! 3. **Client script**: Served next to the dev output, connects to the
//!    WebSocket server and reloads the page or its stylesheets.
//!
//! Batches that arrive while a rebuild is running queue up in the channel and
//! are merged into a single trigger before the next run.

use std::collections::HashSet;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tungstenite::WebSocket;

use crate::Pipeline;
use crate::engine::{DevLoop, FileChange, Notification};
use crate::error::WatchError;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

pub(crate) fn watch(pipeline: &Pipeline) -> Result<(), WatchError> {
    let (tcp, port) = reserve_port()?;
    tracing::info!(port, "live-reload socket listening");

    tracing::info!("running initial build...");
    match pipeline.run("dev") {
        Ok(diagnostics) => tracing::info!("initial build completed, {} tasks", diagnostics.completed()),
        Err(e) => tracing::error!("initial build failed, watching anyway:\n{e}"),
    }

    let clients = Arc::new(Mutex::new(vec![]));

    let _thread_i = new_thread_ws_incoming(tcp, clients.clone());
    let (tx_reload, _thread_o) = new_thread_ws_reload(clients.clone());

    let (tx, rx) = channel();
    let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx)?;

    let root = &pipeline.env.paths.root;
    let mut watched = HashSet::new();
    for binding in &pipeline.bindings {
        match watch_root(&root.join(&binding.pattern)) {
            Ok(path) => {
                watched.insert(path);
            }
            Err(e) => tracing::warn!("not watching {}: {e}", binding.pattern),
        }
    }

    // Collapse watched paths to reduce the number of watches
    for path in collapse_watch_paths(watched) {
        tracing::info!("watching {}", path);
        debouncer.watch(&path, RecursiveMode::Recursive)?;
    }

    #[cfg(feature = "server")]
    let _thread_http = super::http::start(pipeline.env.paths.dev.clone(), port);

    let mut devloop = DevLoop::new(pipeline, tx_reload);

    loop {
        let batch = rx.recv()?;
        absorb(&mut devloop, batch);

        // coalesce whatever queued up during the previous run
        while let Ok(batch) = rx.try_recv() {
            absorb(&mut devloop, batch);
        }

        devloop.run_pending();
    }
}

fn absorb(devloop: &mut DevLoop, batch: DebounceEventResult) {
    let events = match batch {
        Ok(events) => events,
        Err(errors) => {
            for e in errors {
                tracing::error!("watch error: {e:?}");
            }
            return;
        }
    };

    for de in events {
        for path in &de.event.paths {
            let Some(path) = Utf8Path::from_path(path) else {
                continue;
            };

            if let Some(change) = classify(&de.event.kind, path) {
                devloop.observe(&change);
            }
        }
    }
}

fn classify(kind: &EventKind, path: &Utf8Path) -> Option<FileChange> {
    let path = path.to_owned();
    match kind {
        EventKind::Create(_) => Some(FileChange::Created(path)),
        EventKind::Remove(_) => Some(FileChange::Removed(path)),
        // renames report the old name as a modification
        EventKind::Modify(_) if !path.exists() => Some(FileChange::Removed(path)),
        EventKind::Modify(_) => Some(FileChange::Modified(path)),
        _ => None,
    }
}

fn reserve_port() -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind("127.0.0.1:1337") {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("live-reload connection failed: {e}");
                    continue;
                }
            };

            match tungstenite::accept(stream) {
                Ok(socket) => clients
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(socket),
                Err(e) => tracing::warn!("live-reload handshake failed: {e}"),
            }
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<Notification>, JoinHandle<()>) {
    let (tx, rx) = channel();
    let thread = std::thread::spawn(move || broadcast(rx, clients));
    (tx, thread)
}

fn broadcast(rx: Receiver<Notification>, clients: Clients) {
    while let Ok(notification) = rx.recv() {
        let message = match notification.to_json() {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("couldn't encode notification: {e}");
                continue;
            }
        };

        let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
        let mut broken = vec![];

        for (i, socket) in clients.iter_mut().enumerate() {
            match socket.send(message.as_str().into()) {
                Ok(_) => {}
                Err(tungstenite::error::Error::Io(e)) => {
                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        broken.push(i);
                    }
                }
                Err(e) => {
                    tracing::error!("Error: {e:?}");
                }
            }
        }

        for i in broken.into_iter().rev() {
            clients.remove(i);
        }

        // Close all but the last 10 connections
        let len = clients.len();
        if len > 10 {
            for mut socket in clients.drain(0..len - 10) {
                socket.close(None).ok();
            }
        }
    }
}

/// The static, wildcard-free prefix of an absolute glob, canonicalized. A
/// concrete file is watched through its parent so that atomic saves, which
/// replace the file, are still seen.
fn watch_root(glob: &Utf8Path) -> anyhow::Result<Utf8PathBuf> {
    let components: Vec<_> = glob.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let absolute_root = root_part.canonicalize_utf8()?;

    if split_idx == components.len() && absolute_root.is_file() {
        let parent = absolute_root.parent().unwrap_or(&absolute_root);
        return Ok(parent.to_path_buf());
    }

    Ok(absolute_root)
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
