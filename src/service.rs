//! Corpus service handlers
//!
//! Maps already-parsed HTTP requests onto named corpora. Each corpus has its
//! own [`ModelManager`]; there is no listener here, a web framework only has
//! to build a [`ServiceRequest`] and send back the [`ServiceResponse`].
//!
//! | Route | Effect |
//! |---|---|
//! | `GET /{corpus}/` | corpus summary |
//! | `POST /{corpus}/` | train on the body, 202 with the token count |
//! | `GET /{corpus}/predict/{tok}/{tok}..` | continuations of the path tokens |
//! | `POST /{corpus}/predict` | continuations of the body source |
//! | `GET /{corpus}/xentropy?s=..` | cross-entropy of `s` |
//! | `POST /{corpus}/xentropy` | cross-entropy of the body source |

use crate::config::{corpus_file, is_valid_corpus_name};
use crate::lexer::{lex, Lexeme};
use crate::model::{EngineSettings, ModelError, ModelManager};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Language every corpus is lexed as
pub const LANGUAGE: &str = "python";

#[derive(Debug, Clone, Default)]
pub struct ServiceRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Option<String>,
}

impl ServiceRequest {
    pub fn get(path: &str) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    pub fn post(path: &str, body: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            path: path.to_string(),
            body: Some(body.into()),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    pub status: u16,
    pub body: Value,
}

impl ServiceResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }
}

impl From<ModelError> for ServiceResponse {
    fn from(e: ModelError) -> Self {
        match &e {
            ModelError::CorpusMissing(_) | ModelError::CorpusBlank(_) => {
                ServiceResponse::error(409, e.to_string())
            }
            ModelError::Protocol(_) => ServiceResponse::error(502, e.to_string()),
            _ => {
                warn!("Engine failure: {}", e);
                ServiceResponse::error(503, e.to_string())
            }
        }
    }
}

struct Entry {
    description: String,
    model: ModelManager,
}

/// Named corpora under one data directory
pub struct CorpusService {
    data_dir: PathBuf,
    settings: EngineSettings,
    corpora: BTreeMap<String, Entry>,
}

impl CorpusService {
    pub fn new(data_dir: impl Into<PathBuf>, settings: EngineSettings) -> Self {
        Self {
            data_dir: data_dir.into(),
            settings,
            corpora: BTreeMap::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Serve `name`, backed by its corpus file in the data directory.
    /// Returns false for names that cannot be used as a file name.
    pub fn register(&mut self, name: &str, description: &str) -> bool {
        if !is_valid_corpus_name(name) {
            return false;
        }
        let model = ModelManager::open(corpus_file(&self.data_dir, name), self.settings.clone());
        self.corpora.insert(
            name.to_string(),
            Entry {
                description: description.to_string(),
                model,
            },
        );
        true
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.corpora.keys().map(String::as_str)
    }

    pub fn handle(&mut self, request: &ServiceRequest) -> ServiceResponse {
        let segments: Vec<&str> = request
            .path
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        let Some((&name, rest)) = segments.split_first() else {
            return ServiceResponse::error(404, "no corpus named in path");
        };
        let method = request.method.to_ascii_uppercase();
        let Some(entry) = self.corpora.get_mut(name) else {
            return ServiceResponse::error(404, format!("unknown corpus {:?}", name));
        };

        match (method.as_str(), rest.first().copied()) {
            ("GET", None) => summary(name, entry, &self.settings),
            ("POST", None) => train(entry, request),
            ("GET", Some("predict")) => {
                let tokens: Vec<String> = rest[1..].iter().map(|s| s.to_string()).collect();
                predict(entry, tokens)
            }
            ("POST", Some("predict")) => match body_source(request) {
                Some(text) => predict(entry, context_tokens(&text)),
                None => ServiceResponse::error(400, "request body is required"),
            },
            ("GET", Some("xentropy")) => match request.query.get("s").filter(|s| !s.is_empty()) {
                Some(text) => cross_entropy(entry, text),
                None => ServiceResponse::error(400, "query parameter 's' is required"),
            },
            ("POST", Some("xentropy")) => match body_source(request) {
                Some(text) => cross_entropy(entry, &text),
                None => ServiceResponse::error(400, "request body is required"),
            },
            (_, None) | (_, Some("predict")) | (_, Some("xentropy")) => {
                ServiceResponse::error(405, format!("{} not allowed here", method))
            }
            _ => ServiceResponse::error(404, format!("no route for {}", request.path)),
        }
    }

    /// Stop every engine
    pub fn release(&mut self) {
        for (name, entry) in self.corpora.iter_mut() {
            if let Err(e) = entry.model.release() {
                warn!("Failed to release corpus {}: {}", name, e);
            }
        }
    }
}

fn body_source(request: &ServiceRequest) -> Option<String> {
    request.body.clone().filter(|b| !b.trim().is_empty())
}

fn summary(name: &str, entry: &Entry, settings: &EngineSettings) -> ServiceResponse {
    let last_updated = entry
        .model
        .corpus()
        .summary()
        .ok()
        .and_then(|s| s.last_updated);
    ServiceResponse::ok(json!({
        "name": name,
        "description": entry.description,
        "language": LANGUAGE,
        "order": settings.order,
        "smoothing": settings.smoothing.name(),
        "last_updated": last_updated,
    }))
}

fn train(entry: &mut Entry, request: &ServiceRequest) -> ServiceResponse {
    let Some(text) = body_source(request) else {
        return ServiceResponse::error(400, "request body is required");
    };
    let source = lex(&text).scrub();
    if let Err(e) = entry.model.train(source.lexemes()) {
        return e.into();
    }
    info!("Trained {} tokens via service", source.len());
    ServiceResponse {
        status: 202,
        body: json!({ "tokens": source.len() }),
    }
}

/// Display tokens of `text` up to its last real token
fn context_tokens(text: &str) -> Vec<String> {
    let source = lex(text).scrub();
    let lexemes = source.lexemes();
    let end = lexemes
        .iter()
        .rposition(|l| !l.is_zero_width())
        .map_or(0, |i| i + 1);
    lexemes[..end].iter().map(Lexeme::display).collect()
}

fn predict(entry: &mut Entry, tokens: Vec<String>) -> ServiceResponse {
    match entry.model.predict_tokens(tokens) {
        Ok(predictions) => ServiceResponse::ok(json!({
            "suggestions": predictions
                .iter()
                .map(|p| json!({ "score": p.score, "tokens": p.tokens }))
                .collect::<Vec<_>>(),
        })),
        Err(e) => e.into(),
    }
}

fn cross_entropy(entry: &mut Entry, text: &str) -> ServiceResponse {
    let source = lex(text).scrub();
    match entry.model.query(source.lexemes()) {
        Ok(xent) => ServiceResponse::ok(json!({ "cross_entropy": xent })),
        Err(e) => e.into(),
    }
}
