// In: src/codecs/registry.rs

//! Maps MIME types onto codecs.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::codecs::{ArrowFileCodec, ArrowStreamCodec, Codec, CsvCodec, JsonCodec};
use crate::error::BatchlineError;

/// A read-only lookup table once built; share it behind an `Arc` across workers.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn Codec>>,
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut mimes: Vec<&String> = self.codecs.keys().collect();
        mimes.sort();
        f.debug_struct("CodecRegistry").field("mime_types", &mimes).finish()
    }
}

impl CodecRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the four built-in formats.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CsvCodec));
        registry.register(Arc::new(JsonCodec));
        registry.register(Arc::new(ArrowStreamCodec));
        registry.register(Arc::new(ArrowFileCodec));
        registry
    }

    /// Registers `codec` under its MIME type, replacing any previous entry.
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        let mime = normalize(codec.mime_type());
        if self.codecs.insert(mime.clone(), codec).is_some() {
            log::debug!("codec for '{}' replaced", mime);
        }
    }

    /// Looks up a codec. Parameters such as `; charset=utf-8` and letter case are ignored.
    pub fn resolve(&self, mime: &str) -> Result<Arc<dyn Codec>, BatchlineError> {
        self.codecs
            .get(&normalize(mime))
            .cloned()
            .ok_or_else(|| BatchlineError::UnknownFormat(mime.to_string()))
    }

    pub fn mime_types(&self) -> Vec<&str> {
        let mut mimes: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        mimes.sort_unstable();
        mimes
    }
}

fn normalize(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::{ARROW_FILE_MIME, CSV_MIME, JSON_MIME};

    #[test]
    fn test_resolve_ignores_parameters_and_case() {
        let registry = CodecRegistry::with_defaults();
        assert_eq!(registry.mime_types().len(), 4);
        let codec = registry.resolve("Text/CSV; charset=utf-8").unwrap();
        assert_eq!(codec.mime_type(), CSV_MIME);
        assert_eq!(codec.default_file_extension(), "csv");
        assert_eq!(
            registry.resolve(ARROW_FILE_MIME).unwrap().default_file_extension(),
            "arrow"
        );
        assert_eq!(registry.resolve(JSON_MIME).unwrap().mime_type(), JSON_MIME);
    }

    #[test]
    fn test_unknown_format() {
        let registry = CodecRegistry::with_defaults();
        let err = registry.resolve("application/xml").err().unwrap();
        assert!(matches!(err, BatchlineError::UnknownFormat(ref m) if m == "application/xml"));
        assert!(CodecRegistry::new().resolve(CSV_MIME).is_err());
    }
}
