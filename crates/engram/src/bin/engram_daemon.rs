//! The store daemon: sole owner of the canonical record store
//!
//! Listens on a unix socket for line-delimited JSON requests and answers
//! every one of them, including the malformed ones. All other environments
//! reach the store exclusively through this process, which is what makes
//! concurrent access safe: the store's lock lives here and nowhere else.

use std::env;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use engram::embed::{EmbeddingProvider, LocalEmbedder, SocketEmbedder};
use engram::protocol::{decode_request, Response};
use engram::router::{Capabilities, LocalExecutor, Router};
use engram::store::RecordStore;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[tokio::main]
async fn main() -> Result<()> {
  let base = engram::base_dir()?;
  tokio::fs::create_dir_all(&base).await?;

  let socket_path = engram::socket_path(&base);
  if socket_path.exists() {
    // A live daemon still answers on the socket; a stale file from a crash
    // does not and is safe to remove.
    if UnixStream::connect(&socket_path).await.is_ok() {
      return Err(anyhow!("daemon already running on {}", socket_path.display()));
    }
    quill::warn!("removing stale socket from a previous run");
    tokio::fs::remove_file(&socket_path).await?;
  }

  let store = Arc::new(RecordStore::open(&base).await?);

  let embedder: Arc<dyn EmbeddingProvider> = match env::var("ENGRAM_EMBED_SOCKET") {
    Ok(path) => {
      quill::info!("using embedding service at {path}");
      Arc::new(SocketEmbedder::new(path.into()))
    }
    Err(_) => {
      quill::info!("no embedding service configured, using the built-in embedder");
      Arc::new(LocalEmbedder)
    }
  };

  let router = Arc::new(Router::with_local(
    Capabilities::daemon(),
    LocalExecutor::new(store, embedder),
    socket_path.clone(),
  ));

  let listener = UnixListener::bind(&socket_path)?;
  quill::success!("daemon listening on {}", socket_path.display());

  let accept_loop = {
    let router = router.clone();
    async move {
      loop {
        match listener.accept().await {
          Ok((stream, _)) => {
            quill::event!("connection accepted");
            tokio::spawn(handle_connection(stream, router.clone()));
          }
          Err(e) => quill::error!("failed to accept connection: {e}"),
        }
      }
    }
  };

  tokio::select! {
    _ = accept_loop => {}
    _ = tokio::signal::ctrl_c() => {
      quill::info!("shutting down");
      let _ = tokio::fs::remove_file(&socket_path).await;
    }
  }

  Ok(())
}

async fn handle_connection(stream: UnixStream, router: Arc<Router>) {
  let (read_half, mut write_half) = stream.into_split();
  let mut lines = BufReader::new(read_half).lines();

  while let Ok(Some(line)) = lines.next_line().await {
    if line.trim().is_empty() {
      continue;
    }

    let response = match decode_request(&line) {
      Ok(envelope) => router.respond(envelope).await,
      Err(failure) => {
        quill::warn!("rejecting request: {}", failure.message);
        Response::failure(failure.id, failure.message)
      }
    };

    let mut out = match serde_json::to_string(&response) {
      Ok(out) => out,
      Err(e) => {
        quill::error!("failed to encode response: {e}");
        continue;
      }
    };
    out.push('\n');

    if let Err(e) = write_half.write_all(out.as_bytes()).await {
      quill::verbose!("client went away mid-response: {e}");
      break;
    }
  }
}
