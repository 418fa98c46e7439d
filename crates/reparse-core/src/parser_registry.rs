use dashmap::DashMap;
use std::sync::Arc;

use crate::parser::{Parser, ParserFactory};

/// Registry of parser factories keyed by mime type.
///
/// Sources resolve their parser through this registry and cache the result
/// until their mime type changes. Lookups and registrations may race freely;
/// the maps are sharded.
///
/// # Examples
///
/// ```no_run
/// use reparse_core::ParserRegistry;
///
/// let registry = ParserRegistry::new();
/// // registry.register(Arc::new(JavaParserFactory::new()));
///
/// if let Some(parser) = registry.parser_for_mime("text/x-java") {
///     // parse snapshots with `parser`
/// }
/// ```
pub struct ParserRegistry {
    /// Factory ID to implementation
    factories: DashMap<&'static str, Arc<dyn ParserFactory>>,
    /// Mime type to factory ID
    mime_map: DashMap<String, &'static str>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            mime_map: DashMap::new(),
        }
    }

    /// Registers a factory for every mime type it declares.
    ///
    /// A later registration for the same mime type wins. Returns the mime
    /// types whose mapping changed so callers can notify parser listeners.
    pub fn register(&self, factory: Arc<dyn ParserFactory>) -> Vec<String> {
        let id = factory.id();
        let mimes: Vec<String> = factory
            .mime_types()
            .iter()
            .map(|mime| (*mime).to_string())
            .collect();

        self.factories.insert(id, factory);
        for mime in &mimes {
            if let Some(previous) = self.mime_map.insert(mime.clone(), id)
                && previous != id
            {
                tracing::debug!("Parser for {} replaced: {} -> {}", mime, previous, id);
            }
        }

        tracing::debug!("Registered parser factory {} for {:?}", id, mimes);
        mimes
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ParserFactory>> {
        self.factories.get(id).map(|f| Arc::clone(&f))
    }

    pub fn get_for_mime(&self, mime_type: &str) -> Option<Arc<dyn ParserFactory>> {
        let id = *self.mime_map.get(mime_type)?;
        self.get(id)
    }

    /// Creates a fresh parser for the mime type, if any factory handles it.
    pub fn parser_for_mime(&self, mime_type: &str) -> Option<Arc<dyn Parser>> {
        self.get_for_mime(mime_type).map(|f| f.create_parser())
    }

    pub fn factory_ids(&self) -> Vec<&'static str> {
        self.factories.iter().map(|f| *f.key()).collect()
    }

    pub fn mime_types(&self) -> Vec<String> {
        self.mime_map.iter().map(|m| m.key().clone()).collect()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}
