// In: src/config.rs

//! The single source of truth for all batchline engine configuration.
//!
//! Configuration is owned by the calling service. It is created once at the
//! application boundary (typically deserialized from JSON) and then shared with
//! every codec and pipeline of a run through a read-only `Arc<CodecOptions>`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BatchlineError;

//==================================================================================
// I. Per-Format Options
//==================================================================================

/// Options for the delimited-text codec.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CsvOptions {
    /// Field delimiter. Must be a single ASCII byte.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Quote character. Must be a single ASCII byte distinct from the delimiter.
    #[serde(default = "default_quote")]
    pub quote: char,

    /// If true, the first record names the columns. Decoders map columns onto
    /// schema fields by these names; encoders write them.
    #[serde(default = "default_true")]
    pub has_header: bool,

    /// The textual marker for a null cell. Defaults to the empty field, which
    /// means empty strings cannot be told apart from nulls.
    #[serde(default)]
    pub null_value: String,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            quote: default_quote(),
            has_header: true,
            null_value: String::new(),
        }
    }
}

impl CsvOptions {
    pub(crate) fn delimiter_byte(&self) -> u8 {
        self.delimiter as u8
    }

    pub(crate) fn quote_byte(&self) -> u8 {
        self.quote as u8
    }
}

/// Options for the JSON codec.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct JsonOptions {
    /// Collapse framing to exactly one top-level object with no enclosing array.
    #[serde(default)]
    pub single_record: bool,

    /// Write one record per line.
    #[serde(default)]
    pub pretty: bool,
}

//==================================================================================
// II. Options bound into a codec instance
//==================================================================================

/// Everything a `Codec` needs besides the schema when binding a decoder or encoder.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CodecOptions {
    /// **The number of rows per in-memory batch.** Text decoders flip the context
    /// whenever the back buffer reaches this many rows.
    #[serde(default = "default_batch_capacity")]
    pub batch_capacity: usize,

    #[serde(default)]
    pub csv: CsvOptions,

    #[serde(default)]
    pub json: JsonOptions,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            batch_capacity: default_batch_capacity(),
            csv: CsvOptions::default(),
            json: JsonOptions::default(),
        }
    }
}

impl CodecOptions {
    pub fn with_batch_capacity(mut self, batch_capacity: usize) -> Self {
        self.batch_capacity = batch_capacity;
        self
    }

    pub fn with_single_record(mut self, single_record: bool) -> Self {
        self.json.single_record = single_record;
        self
    }

    pub fn with_csv(mut self, csv: CsvOptions) -> Self {
        self.csv = csv;
        self
    }

    /// Checks the invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), BatchlineError> {
        if self.batch_capacity == 0 {
            return Err(BatchlineError::Config(
                "batch_capacity must be greater than zero".to_string(),
            ));
        }
        for (name, c) in [("delimiter", self.csv.delimiter), ("quote", self.csv.quote)] {
            if !c.is_ascii() {
                return Err(BatchlineError::Config(format!(
                    "csv {} must be a single ASCII character, got {:?}",
                    name, c
                )));
            }
        }
        if self.csv.delimiter == self.csv.quote {
            return Err(BatchlineError::Config(
                "csv delimiter and quote must differ".to_string(),
            ));
        }
        Ok(())
    }
}

//==================================================================================
// III. The Unified EngineConfig
//==================================================================================

/// The configuration of one engine instance as handed over by the hosting service.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Codec options applied to every pipeline run.
    #[serde(flatten)]
    pub codec: CodecOptions,

    /// How many source chunks are pulled between two cancellation checks.
    /// `0` (the default) checks before every chunk.
    #[serde(default)]
    pub cancel_check_interval: usize,
}

impl EngineConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, BatchlineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.codec.validate()?;
        Ok(config)
    }

    /// The codec options, ready to be shared across a run.
    pub fn codec_options(&self) -> Arc<CodecOptions> {
        Arc::new(self.codec.clone())
    }
}

/// Helper for `serde` to default a boolean field to true.
fn default_true() -> bool {
    true
}

fn default_delimiter() -> char {
    ','
}

fn default_quote() -> char {
    '"'
}

/// Helper for `serde` to provide a default for `batch_capacity`.
fn default_batch_capacity() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.codec.batch_capacity, 1024);
        assert!(config.codec.csv.has_header);
    }

    #[test]
    fn test_nested_options_are_parsed() {
        let config = EngineConfig::from_json_str(
            r#"{"batch_capacity": 16, "csv": {"delimiter": ";", "null_value": "\\N"},
                "json": {"single_record": true}}"#,
        )
        .unwrap();
        assert_eq!(config.codec.batch_capacity, 16);
        assert_eq!(config.codec.csv.delimiter, ';');
        assert_eq!(config.codec.csv.null_value, "\\N");
        assert!(config.codec.json.single_record);
    }

    #[test]
    fn test_invalid_configurations_are_rejected() {
        let zero = EngineConfig::from_json_str(r#"{"batch_capacity": 0}"#);
        assert!(matches!(zero, Err(BatchlineError::Config(_))));

        let clash = EngineConfig::from_json_str(r#"{"csv": {"delimiter": "\"", "quote": "\""}}"#);
        assert!(matches!(clash, Err(BatchlineError::Config(_))));

        let wide = EngineConfig::from_json_str(r#"{"csv": {"delimiter": "§"}}"#);
        assert!(matches!(wide, Err(BatchlineError::Config(_))));

        let garbage = EngineConfig::from_json_str("not json");
        assert!(matches!(garbage, Err(BatchlineError::SerdeJson(_))));
    }
}
