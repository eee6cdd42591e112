// In: src/codecs/json.rs

//! The JSON codec: a top-level array of objects, or exactly one object in
//! single-record mode.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;

use crate::codecs::{Codec, Decoder, Encoder, JSON_MIME, SINGLE_RECORD_METADATA_KEY};
use crate::config::CodecOptions;
use crate::error::BatchlineError;
use crate::text::{TextDecoder, TextEncoder, TextFormat};

const NAME: &str = "json";

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Single-record framing is on when the options or the schema metadata ask for it.
    pub fn single_record(schema: &SchemaRef, options: &CodecOptions) -> bool {
        options.json.single_record
            || schema
                .metadata()
                .get(SINGLE_RECORD_METADATA_KEY)
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

impl Codec for JsonCodec {
    fn mime_type(&self) -> &'static str {
        JSON_MIME
    }

    fn default_file_extension(&self) -> &'static str {
        "json"
    }

    fn decoder(
        &self,
        target_schema: SchemaRef,
        options: Arc<CodecOptions>,
    ) -> Result<Box<dyn Decoder>, BatchlineError> {
        options.validate()?;
        let format = TextFormat::Json {
            single_record: Self::single_record(&target_schema, &options),
        };
        Ok(Box::new(TextDecoder::new(NAME, target_schema, format)?))
    }

    fn encoder(
        &self,
        source_schema: SchemaRef,
        options: Arc<CodecOptions>,
    ) -> Result<Box<dyn Encoder>, BatchlineError> {
        options.validate()?;
        let format = TextFormat::Json {
            single_record: Self::single_record(&source_schema, &options),
        };
        Ok(Box::new(TextEncoder::new(
            NAME,
            source_schema,
            format,
            &options,
        )?))
    }
}
