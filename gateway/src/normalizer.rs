//! Turns a loosely-shaped client body into the ordered backend payloads.
//!
//! Nothing here fails: the backend's real schema is unknown, so every
//! missing or oddly-typed field degrades to a default instead.

use crate::config::{Encoding, NormalizerConfig};
use crate::session::SessionHandle;
use serde_json::{Map, Value, json};

/// Client body as an untyped key/value map.
pub type InboundRequest = Map<String, Value>;

/// A complete backend request body and the encoding it was built under.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidatePayload {
    encoding: Encoding,
    body: Value,
}

impl CandidatePayload {
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// Output of normalization for a single inbound request.
#[derive(Clone, Debug)]
pub struct Normalized {
    /// The one session handle minted for this request
    pub session: SessionHandle,
    /// Payloads in configured encoding order
    pub payloads: Vec<CandidatePayload>,
}

impl Normalized {
    pub fn payload(&self, encoding: Encoding) -> Option<&CandidatePayload> {
        self.payloads.iter().find(|p| p.encoding == encoding)
    }
}

/// Coerces any parsed JSON body into an `InboundRequest`.
///
/// Objects are used as-is, a top-level array becomes the positional `data`
/// list and a top-level string becomes `text`. Anything else is empty.
pub fn inbound_from_json(value: Value) -> InboundRequest {
    match value {
        Value::Object(map) => map,
        Value::Array(items) => Map::from_iter([("data".to_string(), Value::Array(items))]),
        Value::String(text) => Map::from_iter([("text".to_string(), Value::String(text))]),
        _ => Map::new(),
    }
}

/// Primary text: `data[0]`, then `text`, then `message`, then "".
pub fn primary_text(request: &InboundRequest) -> String {
    let positional = request
        .get("data")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(Value::as_str);

    positional
        .or_else(|| request.get("text").and_then(Value::as_str))
        .or_else(|| request.get("message").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

fn first_string<'a>(request: &'a InboundRequest, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| request.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn history(request: &InboundRequest) -> Value {
    ["history", "messages"]
        .iter()
        .find_map(|key| request.get(*key).filter(|v| v.is_array()))
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()))
}

#[derive(Clone, Debug)]
pub struct Normalizer {
    config: NormalizerConfig,
    encodings: Vec<Encoding>,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig, encodings: Vec<Encoding>) -> Self {
        Self { config, encodings }
    }

    pub fn normalize(&self, request: &InboundRequest) -> Normalized {
        let session = SessionHandle::generate();
        let text = primary_text(request);

        let payloads = self
            .encodings
            .iter()
            .map(|encoding| {
                let body = match encoding {
                    Encoding::Keyed => self.keyed(request, &text),
                    Encoding::Positional => self.positional(request, &text, &session),
                };
                CandidatePayload {
                    encoding: *encoding,
                    body,
                }
            })
            .collect();

        Normalized { session, payloads }
    }

    fn keyed(&self, request: &InboundRequest, text: &str) -> Value {
        let mut body = Map::new();
        body.insert("text".to_string(), json!(text));
        body.insert("history".to_string(), history(request));

        if let Some(image) = first_string(request, &["image", "image_base64"]) {
            body.insert("image".to_string(), json!(image));
        }
        if let Some(audio) = first_string(request, &["audio", "audio_base64"]) {
            body.insert("audio".to_string(), json!(audio));
        }

        Value::Object(body)
    }

    fn positional(&self, request: &InboundRequest, text: &str, session: &SessionHandle) -> Value {
        let fn_index = request
            .get("fn_index")
            .and_then(Value::as_i64)
            .unwrap_or(self.config.fn_index);

        let mut data = Vec::with_capacity(self.config.placeholder_slots + 1);
        data.push(json!(text));
        data.extend(std::iter::repeat_n(Value::Null, self.config.placeholder_slots));

        json!({
            "data": data,
            "fn_index": fn_index,
            "session_hash": session.as_str(),
        })
    }
}
