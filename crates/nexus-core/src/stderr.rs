//! Classification of agent stderr into user-facing errors.
//!
//! Agents print runtime failures to stderr in a loose `<Type>Error: ... data: {...}`
//! shape. [`StderrMonitor`] accumulates the stream and asks an
//! [`ErrorClassifier`] whether a complete error has arrived.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

pub const STDERR_CAP_CHARS: usize = 10_000;
pub const STDERR_RETAIN_CHARS: usize = 5_000;

static ERROR_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\w+Error):\s*(\w+)?\s*\n?\s*data:\s*\{([^}]+)\}")
        .expect("stderr error pattern is valid")
});
static PROVIDER_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"providerID:\s*"([^"]+)""#).expect("provider pattern is valid"));
static MODEL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"modelID:\s*"([^"]+)""#).expect("model pattern is valid"));

/// A runtime error recognised in agent stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentErrorReport {
    ModelNotFound { provider: String, model: String },
    Agent { error_type: String },
}

impl fmt::Display for AgentErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelNotFound { provider, model } => {
                write!(f, "Model not found: {}/{}", provider, model)
            }
            Self::Agent { error_type } => write!(f, "Agent error: {}", error_type),
        }
    }
}

/// Recognises agent errors in accumulated stderr text.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, buffer: &str) -> Option<AgentErrorReport>;
}

/// Best-effort pattern matcher for the `<Type>Error ... data: {...}` format.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexErrorClassifier;

impl ErrorClassifier for RegexErrorClassifier {
    fn classify(&self, buffer: &str) -> Option<AgentErrorReport> {
        let captures = ERROR_BLOCK.captures(buffer)?;
        let error_type = captures.get(1)?.as_str().to_string();
        let data = captures.get(3).map(|m| m.as_str()).unwrap_or_default();

        let provider = PROVIDER_ID.captures(data).and_then(|c| c.get(1));
        let model = MODEL_ID.captures(data).and_then(|c| c.get(1));
        match (provider, model) {
            (Some(provider), Some(model)) => Some(AgentErrorReport::ModelNotFound {
                provider: provider.as_str().to_string(),
                model: model.as_str().to_string(),
            }),
            _ => Some(AgentErrorReport::Agent { error_type }),
        }
    }
}

/// Per-session stderr tail with one-shot classification.
pub struct StderrMonitor {
    buffer: String,
    cap: usize,
    retain: usize,
    classifier: Arc<dyn ErrorClassifier>,
}

impl StderrMonitor {
    pub fn new(classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self::with_limits(classifier, STDERR_CAP_CHARS, STDERR_RETAIN_CHARS)
    }

    pub fn with_limits(classifier: Arc<dyn ErrorClassifier>, cap: usize, retain: usize) -> Self {
        Self {
            buffer: String::new(),
            cap,
            retain: retain.min(cap),
            classifier,
        }
    }

    /// Appends stderr text and returns an error report if one just completed.
    ///
    /// The buffer is emptied after a report so an error is raised once. Past
    /// the cap only the trailing `retain` characters are kept.
    pub fn append(&mut self, text: &str) -> Option<AgentErrorReport> {
        self.buffer.push_str(text);

        let report = self.classifier.classify(&self.buffer);
        if report.is_some() {
            self.buffer.clear();
        }

        if self.buffer.chars().count() > self.cap {
            self.keep_tail();
        }
        report
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn contents(&self) -> &str {
        &self.buffer
    }

    fn keep_tail(&mut self) {
        let total = self.buffer.chars().count();
        let skip = total.saturating_sub(self.retain);
        let start = self
            .buffer
            .char_indices()
            .nth(skip)
            .map(|(idx, _)| idx)
            .unwrap_or(self.buffer.len());
        self.buffer.drain(..start);
    }
}

impl fmt::Debug for StderrMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StderrMonitor")
            .field("len", &self.buffer.len())
            .field("cap", &self.cap)
            .field("retain", &self.retain)
            .finish()
    }
}
