//! Language extractor registry.
//!
//! Central registration point for all language extractors, keyed by file
//! extension. The registry is initialized once and provides thread-safe
//! access; adding a language means registering one more boxed extractor.

use std::path::Path;
use std::sync::OnceLock;

use super::LanguageExtractor;

/// Global registry instance.
static REGISTRY: OnceLock<ExtractorRegistry> = OnceLock::new();

/// Get the global extractor registry.
pub fn global_registry() -> &'static ExtractorRegistry {
    REGISTRY.get_or_init(ExtractorRegistry::new)
}

/// Registry of language extractors.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn LanguageExtractor>>,
}

impl ExtractorRegistry {
    fn new() -> Self {
        let extractors: Vec<Box<dyn LanguageExtractor>> =
            vec![Box::new(super::languages::java::JavaExtractor::new())];
        Self { extractors }
    }

    /// Find the extractor responsible for a path, if any.
    pub fn for_path(&self, file_path: &Path) -> Option<&dyn LanguageExtractor> {
        self.extractors
            .iter()
            .find(|e| e.supports(file_path))
            .map(|e| e.as_ref())
    }

    /// Whether any registered extractor handles the path.
    pub fn is_supported(&self, file_path: &Path) -> bool {
        self.for_path(file_path).is_some()
    }

    /// All extensions with a registered extractor.
    pub fn supported_extensions(&self) -> Vec<&'static str> {
        self.extractors
            .iter()
            .flat_map(|e| e.extensions().iter().copied())
            .collect()
    }
}
