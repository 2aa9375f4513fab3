//! Message router: one dispatch seam for every environment
//!
//! Callers hand the router a [`Request`] and always get exactly one
//! [`Response`] back. Whether the operation runs in-process or is forwarded
//! over the daemon socket is decided by the environment's declared
//! capabilities, never by sniffing the runtime. A missing socket is reported
//! as an unavailable environment, not a hang.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use uuid::Uuid;

use crate::embed::EmbeddingProvider;
use crate::error::{EngramError, Result};
use crate::protocol::{Envelope, Request, Response};
use crate::store::RecordStore;

/// What this environment is allowed to do in-process. Declared up front by
/// whoever builds the router; everything undeclared is forwarded.
#[derive(Debug, Clone)]
pub struct Capabilities {
  /// Label used in logs and error messages
  pub environment: String,
  pub owns_store: bool,
  pub can_embed: bool,
}

impl Capabilities {
  /// The daemon: sole owner of the store and the embedding path
  pub fn daemon() -> Self {
    Self { environment: "daemon".into(), owns_store: true, can_embed: true }
  }

  /// A client environment that forwards everything to the daemon
  pub fn client(environment: &str) -> Self {
    Self { environment: environment.into(), owns_store: false, can_embed: false }
  }
}

/// Runs store and embed operations against in-process collaborators
pub struct LocalExecutor {
  store: Arc<RecordStore>,
  embedder: Arc<dyn EmbeddingProvider>,
}

impl LocalExecutor {
  pub fn new(store: Arc<RecordStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
    Self { store, embedder }
  }

  async fn execute(&self, request: Request) -> Result<serde_json::Value> {
    match request {
      Request::AddNote(draft) => to_value(self.store.add_note(draft).await?),
      Request::UpdateNote { id, patch } => to_value(self.store.update_note(&id, patch).await?),
      Request::DeleteNote { id } => to_value(self.store.delete_note(&id).await?),
      Request::GetNote { id } => match self.store.get_note(&id).await {
        Some(note) => to_value(note),
        None => Err(EngramError::NotFound(format!("note {id}"))),
      },
      Request::ListNotes => to_value(self.store.list_notes().await),
      Request::SearchByVector { vector, limit } => {
        to_value(self.store.search_by_vector(&vector, limit).await)
      }
      Request::SearchByTitle { query } => to_value(self.store.search_by_title(&query).await),
      Request::ListCategories => to_value(self.store.list_categories().await),
      Request::Statistics => to_value(self.store.statistics().await),
      Request::AddPersona(draft) => to_value(self.store.add_persona(draft).await?),
      Request::UpdatePersona { id, patch } => {
        to_value(self.store.update_persona(&id, patch).await?)
      }
      Request::DeletePersona { id } => to_value(self.store.delete_persona(&id).await?),
      Request::GetPersona { id } => match self.store.get_persona(&id).await {
        Some(persona) => to_value(persona),
        None => Err(EngramError::NotFound(format!("persona {id}"))),
      },
      Request::ListPersonas => to_value(self.store.list_personas().await),
      Request::GetActivePersona => to_value(self.store.get_active_persona().await),
      Request::SetActivePersona { id } => to_value(self.store.set_active_persona(&id).await?),
      Request::EmbedText { text } => to_value(self.embedder.embed(&text).await?),
    }
  }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<serde_json::Value> {
  serde_json::to_value(value).map_err(|e| EngramError::StoreFailed(format!("serialization: {e}")))
}

pub struct Router {
  caps: Capabilities,
  local: Option<LocalExecutor>,
  socket_path: PathBuf,
  timeout: Duration,
}

impl Router {
  /// Router for the store-owning environment
  pub fn with_local(caps: Capabilities, executor: LocalExecutor, socket_path: PathBuf) -> Self {
    Self { caps, local: Some(executor), socket_path, timeout: Duration::from_secs(30) }
  }

  /// Router for an environment that forwards everything over the socket
  pub fn remote(caps: Capabilities, socket_path: PathBuf) -> Self {
    Self { caps, local: None, socket_path, timeout: Duration::from_secs(30) }
  }

  fn can_execute(&self, request: &Request) -> bool {
    if self.local.is_none() {
      return false;
    }
    if request.touches_store() {
      self.caps.owns_store
    } else {
      self.caps.can_embed
    }
  }

  /// Dispatch a request from this environment, generating a fresh
  /// correlation id. Always resolves to exactly one response.
  pub async fn dispatch(&self, request: Request) -> Response {
    self.respond(Envelope { id: Uuid::new_v4().to_string(), request }).await
  }

  /// Resolve an already-enveloped request, preserving the caller's id.
  /// This is the daemon-side entry point for requests read off the socket.
  pub async fn respond(&self, envelope: Envelope) -> Response {
    let Envelope { id, request } = envelope;

    let executor = match &self.local {
      Some(executor) if self.can_execute(&request) => executor,
      _ => return self.forward(Envelope { id, request }).await,
    };

    quill::verbose!("[{}] executing {}", self.caps.environment, request.operation());

    match executor.execute(request).await {
      Ok(data) => Response::ok(id, data),
      Err(e) => Response::failure(id, e.to_string()),
    }
  }

  /// Dispatch and decode the response data, turning a failure response back
  /// into a typed error
  pub async fn call<T: serde::de::DeserializeOwned>(&self, request: Request) -> Result<T> {
    let operation = request.operation();
    let response = self.dispatch(request).await;

    if !response.success {
      let message = response.error.unwrap_or_else(|| "unexplained failure".into());
      return Err(error_from_message(message));
    }

    let data = response.data.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(data)
      .map_err(|e| EngramError::StoreFailed(format!("bad response for {operation}: {e}")))
  }

  async fn forward(&self, envelope: Envelope) -> Response {
    let id = envelope.id.clone();
    let operation = envelope.request.operation();

    // A missing socket means the owning environment is down. Fail fast and
    // deterministically instead of letting connect semantics decide.
    if !self.socket_path.exists() {
      return Response::failure(
        id,
        EngramError::EnvironmentUnavailable(format!(
          "store daemon is not running (no socket at {})",
          self.socket_path.display()
        ))
        .to_string(),
      );
    }

    quill::verbose!("[{}] forwarding {}", self.caps.environment, operation);

    match tokio::time::timeout(self.timeout, self.round_trip(&envelope)).await {
      Ok(Ok(response)) if response.id == id => response,
      Ok(Ok(_)) => Response::failure(id, "response does not correlate with request".to_string()),
      Ok(Err(e)) => Response::failure(id, e.to_string()),
      Err(_) => Response::failure(
        id,
        format!("{operation} timed out after {}s; request abandoned", self.timeout.as_secs()),
      ),
    }
  }

  async fn round_trip(&self, envelope: &Envelope) -> Result<Response> {
    let unavailable =
      |e: std::io::Error| EngramError::EnvironmentUnavailable(format!("store daemon: {e}"));

    let mut stream = UnixStream::connect(&self.socket_path).await.map_err(unavailable)?;

    let mut line = serde_json::to_string(envelope)
      .map_err(|e| EngramError::StoreFailed(format!("failed to encode request: {e}")))?;
    line.push('\n');
    stream.write_all(line.as_bytes()).await.map_err(unavailable)?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    let read = reader.read_line(&mut response_line).await.map_err(unavailable)?;
    if read == 0 {
      return Err(EngramError::EnvironmentUnavailable(
        "store daemon closed the connection without responding".into(),
      ));
    }

    serde_json::from_str(response_line.trim())
      .map_err(|e| EngramError::StoreFailed(format!("invalid response: {e}")))
  }
}

/// Recover the error category from a wire error string so routed calls fail
/// with the same variants local ones do
fn error_from_message(message: String) -> EngramError {
  if let Some(rest) = message.strip_prefix("not found: ") {
    EngramError::NotFound(rest.to_string())
  } else if let Some(rest) = message.strip_prefix("environment unavailable: ") {
    EngramError::EnvironmentUnavailable(rest.to_string())
  } else if let Some(rest) = message.strip_prefix("unknown operation: ") {
    EngramError::UnknownOperation(rest.to_string())
  } else if let Some(rest) = message.strip_prefix("embedding failed: ") {
    EngramError::EmbeddingFailed(rest.to_string())
  } else if let Some(rest) = message.strip_prefix("encryption failed: ") {
    EngramError::EncryptionFailed(rest.to_string())
  } else {
    EngramError::StoreFailed(message)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::embed::testing::FixedEmbedder;
  use crate::model::{Note, NoteDraft, ScoredNote};
  use crate::protocol::decode_request;
  use tempfile::TempDir;

  fn draft(title: &str, embedding: Vec<f32>) -> NoteDraft {
    NoteDraft {
      title: title.into(),
      category: None,
      content: vec![1, 2, 3],
      embedding,
      source_url: None,
    }
  }

  async fn local_router(dir: &TempDir) -> Router {
    let store = Arc::new(RecordStore::open(dir.path()).await.unwrap());
    let embedder = Arc::new(FixedEmbedder::new(vec![0.1; 8]));
    Router::with_local(
      Capabilities::daemon(),
      LocalExecutor::new(store, embedder),
      dir.path().join("engram.sock"),
    )
  }

  #[tokio::test]
  async fn test_local_dispatch_executes_store_ops() {
    let dir = TempDir::new().unwrap();
    let router = local_router(&dir).await;

    let added: Note = router.call(Request::AddNote(draft("routed", vec![0.1; 8]))).await.unwrap();
    let fetched: Note = router.call(Request::GetNote { id: added.id.clone() }).await.unwrap();

    assert_eq!(fetched.title, "routed");
  }

  #[tokio::test]
  async fn test_absent_note_fails_with_not_found() {
    let dir = TempDir::new().unwrap();
    let router = local_router(&dir).await;

    let err =
      router.call::<Note>(Request::GetNote { id: "ghost".into() }).await.unwrap_err();

    assert!(matches!(err, EngramError::NotFound(_)));
  }

  #[tokio::test]
  async fn test_embed_runs_through_the_same_seam() {
    let dir = TempDir::new().unwrap();
    let router = local_router(&dir).await;

    let vector: Vec<f32> =
      router.call(Request::EmbedText { text: "hello".into() }).await.unwrap();

    assert_eq!(vector, vec![0.1; 8]);
  }

  #[tokio::test]
  async fn test_missing_socket_is_environment_unavailable() {
    let dir = TempDir::new().unwrap();
    let router =
      Router::remote(Capabilities::client("cli"), dir.path().join("never-created.sock"));

    let response = router.dispatch(Request::ListNotes).await;

    assert!(!response.success);
    assert!(response.error.unwrap().contains("environment unavailable"));
  }

  #[tokio::test]
  async fn test_forwarded_calls_reach_the_owning_environment() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("engram.sock");

    let store = Arc::new(RecordStore::open(dir.path()).await.unwrap());
    let embedder = Arc::new(FixedEmbedder::new(vec![1.0, 0.0]));
    let server = Arc::new(Router::with_local(
      Capabilities::daemon(),
      LocalExecutor::new(store, embedder),
      socket.clone(),
    ));

    let listener = tokio::net::UnixListener::bind(&socket).unwrap();
    let server_task = tokio::spawn({
      let server = server.clone();
      async move {
        loop {
          let (stream, _) = listener.accept().await.unwrap();
          let server = server.clone();
          tokio::spawn(async move {
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
              let response = match decode_request(&line) {
                Ok(envelope) => server.respond(envelope).await,
                Err(failure) => Response::failure(failure.id, failure.message),
              };
              let mut out = serde_json::to_string(&response).unwrap();
              out.push('\n');
              write_half.write_all(out.as_bytes()).await.unwrap();
            }
          });
        }
      }
    });

    let client = Router::remote(Capabilities::client("cli"), socket);

    let east: Note =
      client.call(Request::AddNote(draft("east", vec![1.0, 0.0]))).await.unwrap();
    let _north: Note =
      client.call(Request::AddNote(draft("north", vec![0.0, 1.0]))).await.unwrap();

    let results: Vec<ScoredNote> = client
      .call(Request::SearchByVector { vector: vec![1.0, 0.0], limit: 10 })
      .await
      .unwrap();

    assert_eq!(results[0].note.id, east.id);
    assert!(results[0].similarity > results[1].similarity);

    server_task.abort();
  }

  #[tokio::test]
  async fn test_uncorrelated_response_is_rejected() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("engram.sock");

    let listener = tokio::net::UnixListener::bind(&socket).unwrap();
    let server_task = tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      let (read_half, mut write_half) = stream.into_split();
      let mut lines = BufReader::new(read_half).lines();
      if let Ok(Some(_)) = lines.next_line().await {
        let rogue = Response::ok("some-other-id", serde_json::json!([]));
        let mut out = serde_json::to_string(&rogue).unwrap();
        out.push('\n');
        write_half.write_all(out.as_bytes()).await.unwrap();
      }
    });

    let client = Router::remote(Capabilities::client("cli"), socket);
    let response = client.dispatch(Request::ListNotes).await;

    assert!(!response.success);
    assert!(response.error.unwrap().contains("correlate"));

    server_task.abort();
  }

  #[test]
  fn test_wire_errors_map_back_to_variants() {
    assert!(matches!(error_from_message("not found: note n-1".into()), EngramError::NotFound(_)));
    assert!(matches!(
      error_from_message("environment unavailable: daemon down".into()),
      EngramError::EnvironmentUnavailable(_)
    ));
    assert!(matches!(
      error_from_message("embedding failed: offline".into()),
      EngramError::EmbeddingFailed(_)
    ));
    assert!(matches!(error_from_message("anything else".into()), EngramError::StoreFailed(_)));
  }
}
