use super::{ExtractionMethod, ExtractionOutcome};

/// Adapter slot for an external extractor that is not available in this build.
///
/// It stays registered so its name keeps a place in statistics and ordering,
/// and always reports `not_configured`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdvancedPlaceholder;

impl ExtractionMethod for AdvancedPlaceholder {
    fn name(&self) -> &str {
        "advanced"
    }

    fn extract(&self, _raw_html: &str) -> ExtractionOutcome {
        ExtractionOutcome::error("not_configured")
    }
}
