// In: src/codecs/csv.rs

//! The delimited-text codec. Only flat schemas can be expressed: every column must
//! be primitive or a dictionary of primitives.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;

use crate::codecs::{Codec, Decoder, Encoder, CSV_MIME};
use crate::config::CodecOptions;
use crate::error::BatchlineError;
use crate::text::{TextDecoder, TextEncoder, TextFormat};
use crate::types::{compile_schema, ColumnType};

const NAME: &str = "csv";

#[derive(Debug, Default, Clone, Copy)]
pub struct CsvCodec;

impl CsvCodec {
    fn check_schema(schema: &SchemaRef) -> Result<(), BatchlineError> {
        for column in compile_schema(schema)? {
            match &column.column_type {
                ColumnType::List(..) | ColumnType::Struct(..) => {
                    return Err(BatchlineError::UnsupportedType(format!(
                        "CSV cannot express column '{}' of type {}",
                        column.name, column.column_type
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Codec for CsvCodec {
    fn mime_type(&self) -> &'static str {
        CSV_MIME
    }

    fn default_file_extension(&self) -> &'static str {
        "csv"
    }

    fn decoder(
        &self,
        target_schema: SchemaRef,
        options: Arc<CodecOptions>,
    ) -> Result<Box<dyn Decoder>, BatchlineError> {
        options.validate()?;
        Self::check_schema(&target_schema)?;
        let format = TextFormat::Csv(options.csv.clone());
        Ok(Box::new(TextDecoder::new(NAME, target_schema, format)?))
    }

    fn encoder(
        &self,
        source_schema: SchemaRef,
        options: Arc<CodecOptions>,
    ) -> Result<Box<dyn Encoder>, BatchlineError> {
        options.validate()?;
        Self::check_schema(&source_schema)?;
        let format = TextFormat::Csv(options.csv.clone());
        Ok(Box::new(TextEncoder::new(
            NAME,
            source_schema,
            format,
            &options,
        )?))
    }
}
