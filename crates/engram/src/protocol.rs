//! Line-delimited JSON request/response protocol
//!
//! Requests are a closed set of operations; anything outside it gets a
//! structured failure, never a dropped connection. Every request carries a
//! caller-generated id and the matching response echoes it back, so a client
//! multiplexing calls can pair them up again.

use serde::{Deserialize, Serialize};

use crate::model::{NoteDraft, NotePatch, PersonaDraft, PersonaPatch};

/// Every operation the router understands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", content = "payload")]
pub enum Request {
  #[serde(rename = "STORE_ADD_NOTE")]
  AddNote(NoteDraft),
  #[serde(rename = "STORE_UPDATE_NOTE")]
  UpdateNote { id: String, patch: NotePatch },
  #[serde(rename = "STORE_DELETE_NOTE")]
  DeleteNote { id: String },
  #[serde(rename = "STORE_GET_NOTE")]
  GetNote { id: String },
  #[serde(rename = "STORE_LIST_NOTES")]
  ListNotes,
  #[serde(rename = "STORE_SEARCH_BY_VECTOR")]
  SearchByVector { vector: Vec<f32>, limit: usize },
  #[serde(rename = "STORE_SEARCH_BY_TITLE")]
  SearchByTitle { query: String },
  #[serde(rename = "STORE_LIST_CATEGORIES")]
  ListCategories,
  #[serde(rename = "STORE_STATISTICS")]
  Statistics,
  #[serde(rename = "STORE_ADD_PERSONA")]
  AddPersona(PersonaDraft),
  #[serde(rename = "STORE_UPDATE_PERSONA")]
  UpdatePersona { id: String, patch: PersonaPatch },
  #[serde(rename = "STORE_DELETE_PERSONA")]
  DeletePersona { id: String },
  #[serde(rename = "STORE_GET_PERSONA")]
  GetPersona { id: String },
  #[serde(rename = "STORE_LIST_PERSONAS")]
  ListPersonas,
  #[serde(rename = "STORE_GET_ACTIVE_PERSONA")]
  GetActivePersona,
  #[serde(rename = "STORE_SET_ACTIVE_PERSONA")]
  SetActivePersona { id: String },
  #[serde(rename = "EMBED_TEXT")]
  EmbedText { text: String },
}

impl Request {
  /// The wire name of this operation
  pub fn operation(&self) -> &'static str {
    match self {
      Request::AddNote(_) => "STORE_ADD_NOTE",
      Request::UpdateNote { .. } => "STORE_UPDATE_NOTE",
      Request::DeleteNote { .. } => "STORE_DELETE_NOTE",
      Request::GetNote { .. } => "STORE_GET_NOTE",
      Request::ListNotes => "STORE_LIST_NOTES",
      Request::SearchByVector { .. } => "STORE_SEARCH_BY_VECTOR",
      Request::SearchByTitle { .. } => "STORE_SEARCH_BY_TITLE",
      Request::ListCategories => "STORE_LIST_CATEGORIES",
      Request::Statistics => "STORE_STATISTICS",
      Request::AddPersona(_) => "STORE_ADD_PERSONA",
      Request::UpdatePersona { .. } => "STORE_UPDATE_PERSONA",
      Request::DeletePersona { .. } => "STORE_DELETE_PERSONA",
      Request::GetPersona { .. } => "STORE_GET_PERSONA",
      Request::ListPersonas => "STORE_LIST_PERSONAS",
      Request::GetActivePersona => "STORE_GET_ACTIVE_PERSONA",
      Request::SetActivePersona { .. } => "STORE_SET_ACTIVE_PERSONA",
      Request::EmbedText { .. } => "EMBED_TEXT",
    }
  }

  /// True for operations that read or write the record store
  pub fn touches_store(&self) -> bool {
    !matches!(self, Request::EmbedText { .. })
  }
}

/// A request plus its correlation id, as sent over the socket
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
  pub id: String,
  #[serde(flatten)]
  pub request: Request,
}

/// Response shape for every call, success or failure
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
  pub id: String,
  pub success: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl Response {
  pub fn ok(id: impl Into<String>, data: serde_json::Value) -> Self {
    Self { id: id.into(), success: true, data: Some(data), error: None }
  }

  pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
    Self { id: id.into(), success: false, data: None, error: Some(error.into()) }
  }
}

/// Why a request line could not be decoded into an [`Envelope`]
#[derive(Debug)]
pub struct DecodeFailure {
  /// Correlation id salvaged from the line, empty when unrecoverable
  pub id: String,
  pub message: String,
}

/// Decode one request line. Failures keep whatever id could be salvaged so
/// the failure response still correlates.
pub fn decode_request(line: &str) -> Result<Envelope, DecodeFailure> {
  let value: serde_json::Value = serde_json::from_str(line)
    .map_err(|e| DecodeFailure { id: String::new(), message: format!("malformed request: {e}") })?;

  let id = value.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();

  match serde_json::from_value::<Envelope>(value.clone()) {
    Ok(envelope) => Ok(envelope),
    Err(e) => {
      let message = match value.get("operation").and_then(|v| v.as_str()) {
        Some(op) if !KNOWN_OPERATIONS.contains(&op) => format!("unknown operation: {op}"),
        Some(op) => format!("invalid payload for {op}: {e}"),
        None => "missing operation field".to_string(),
      };
      Err(DecodeFailure { id, message })
    }
  }
}

const KNOWN_OPERATIONS: &[&str] = &[
  "STORE_ADD_NOTE",
  "STORE_UPDATE_NOTE",
  "STORE_DELETE_NOTE",
  "STORE_GET_NOTE",
  "STORE_LIST_NOTES",
  "STORE_SEARCH_BY_VECTOR",
  "STORE_SEARCH_BY_TITLE",
  "STORE_LIST_CATEGORIES",
  "STORE_STATISTICS",
  "STORE_ADD_PERSONA",
  "STORE_UPDATE_PERSONA",
  "STORE_DELETE_PERSONA",
  "STORE_GET_PERSONA",
  "STORE_LIST_PERSONAS",
  "STORE_GET_ACTIVE_PERSONA",
  "STORE_SET_ACTIVE_PERSONA",
  "EMBED_TEXT",
];
