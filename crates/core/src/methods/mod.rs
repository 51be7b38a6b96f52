//! Extraction methods: independent strategies turning raw markup into article text.
//!
//! A method's [`name`](ExtractionMethod::name) is a durable key in statistics
//! and preferences; renaming one orphans its history. Methods are synchronous
//! and side-effect free, so each can be exercised in isolation.
//!
//! # Example
//!
//! ```rust
//! use gleaner_core::methods::{ExtractionOutcome, MethodRegistry};
//!
//! let registry = MethodRegistry::with_defaults();
//! assert_eq!(registry.names(), vec!["structured", "readability", "markup_heuristic", "advanced"]);
//!
//! let advanced = registry.get("advanced").unwrap();
//! assert!(matches!(advanced.extract("<p>hi</p>"), ExtractionOutcome::Error { .. }));
//! ```

mod advanced;
mod heuristic;
mod readability;
mod structured;

pub use advanced::AdvancedPlaceholder;
pub use heuristic::MarkupHeuristic;
pub use readability::Readability;
pub use structured::StructuredContent;

use std::sync::Arc;

use crate::model::AttemptStatus;
use crate::{GleanerError, Result};

/// Minimum characters a method needs before it reports text rather than `TooShort`.
pub const DEFAULT_METHOD_FLOOR: usize = 50;

/// Result of running one method over a document.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// Text found. `confidence_signal` is the method's own estimate in `[0, 1]`.
    Success { text: String, confidence_signal: f64 },
    /// Nothing usable found.
    TooShort { text_length: usize },
    /// The method failed internally.
    Error { reason: String },
}

impl ExtractionOutcome {
    /// Wraps extracted text, reporting `TooShort` below `floor` characters.
    pub fn from_text(text: String, confidence_signal: f64, floor: usize) -> Self {
        let text = text.trim().to_string();
        let text_length = text.chars().count();
        if text_length == 0 || text_length < floor {
            ExtractionOutcome::TooShort { text_length }
        } else {
            ExtractionOutcome::Success { text, confidence_signal: confidence_signal.clamp(0.0, 1.0) }
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        ExtractionOutcome::Error { reason: reason.into() }
    }

    /// Character count of the produced text.
    pub fn text_length(&self) -> usize {
        match self {
            ExtractionOutcome::Success { text, .. } => text.chars().count(),
            ExtractionOutcome::TooShort { text_length } => *text_length,
            ExtractionOutcome::Error { .. } => 0,
        }
    }

    /// Audit status before the accept policy is applied.
    pub fn status(&self) -> AttemptStatus {
        match self {
            ExtractionOutcome::Success { .. } => AttemptStatus::Success,
            ExtractionOutcome::TooShort { .. } => AttemptStatus::TooShort,
            ExtractionOutcome::Error { .. } => AttemptStatus::Error,
        }
    }
}

/// One extraction strategy.
pub trait ExtractionMethod: Send + Sync {
    /// Stable, never-renamed identifier.
    fn name(&self) -> &str;

    fn extract(&self, raw_html: &str) -> ExtractionOutcome;
}

/// Ordered mapping from stable method name to implementation.
///
/// Registration order is the default attempt order for domains without
/// learned preferences.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: Vec<Arc<dyn ExtractionMethod>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard method set.
    pub fn with_defaults() -> Self {
        Self {
            methods: vec![
                Arc::new(StructuredContent::default()),
                Arc::new(Readability::default()),
                Arc::new(MarkupHeuristic::default()),
                Arc::new(AdvancedPlaceholder),
            ],
        }
    }

    /// Adds a method at the end of the order.
    ///
    /// # Errors
    ///
    /// Returns [`GleanerError::Config`] if the name is already registered.
    pub fn register(&mut self, method: Arc<dyn ExtractionMethod>) -> Result<()> {
        if self.get(method.name()).is_some() {
            return Err(GleanerError::Config(format!("duplicate extraction method: {}", method.name())));
        }
        self.methods.push(method);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ExtractionMethod>> {
        self.methods.iter().find(|m| m.name() == name)
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.methods.iter().map(|m| m.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ExtractionMethod>> {
        self.methods.iter()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
