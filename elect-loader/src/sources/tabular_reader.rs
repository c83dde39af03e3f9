//! Row cursor over delimited text
//!
//! Rows may have different field counts; only an out-of-range access fails.
//! The input is decoded from its legacy encoding up front, then split with
//! quoting disabled so every delimiter is a field boundary.

use encoding_rs::Encoding;
use std::io::Cursor;
use std::path::Path;

use crate::error::ReaderError;

/// Delimiter and character encoding of a delimited source
#[derive(Debug, Clone, Copy)]
pub struct TabularOptions {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
}

impl Default for TabularOptions {
    fn default() -> Self {
        Self {
            delimiter: b';',
            encoding: encoding_rs::WINDOWS_1251,
        }
    }
}

impl TabularOptions {
    /// Build options from configuration values, falling back to defaults
    ///
    /// Fails when the delimiter is not a single byte or the encoding label is
    /// not a WHATWG label.
    pub fn from_settings(delimiter: Option<char>, encoding: Option<&str>) -> Result<Self, String> {
        let mut options = Self::default();

        if let Some(c) = delimiter {
            if !c.is_ascii() {
                return Err(format!("Delimiter '{}' is not a single-byte character", c));
            }
            options.delimiter = c as u8;
        }

        if let Some(label) = encoding {
            options.encoding = Encoding::for_label(label.as_bytes())
                .ok_or_else(|| format!("Unknown encoding label '{}'", label))?;
        }

        Ok(options)
    }
}

/// Forward-only cursor over the rows of a delimited source
pub struct TabularRecordReader {
    reader: csv::Reader<Cursor<Vec<u8>>>,
    current: Option<csv::StringRecord>,
    row_index: Option<usize>,
    finished: bool,
}

impl TabularRecordReader {
    /// Decode raw bytes and position the cursor before the first row
    pub fn from_bytes(bytes: &[u8], options: TabularOptions) -> Self {
        let (text, _, had_errors) = options.encoding.decode(bytes);
        if had_errors {
            tracing::warn!(
                encoding = options.encoding.name(),
                "Input contained malformed sequences, replaced with U+FFFD"
            );
        }

        let reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(Cursor::new(text.into_owned().into_bytes()));

        Self {
            reader,
            current: None,
            row_index: None,
            finished: false,
        }
    }

    pub fn open(path: &Path, options: TabularOptions) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self::from_bytes(&bytes, options))
    }

    /// Move to the next row
    ///
    /// Returns false at end of stream. The row index advances on every call.
    pub fn advance(&mut self) -> Result<bool, ReaderError> {
        self.row_index = Some(self.row_index.map_or(0, |i| i + 1));

        if self.finished {
            self.current = None;
            return Ok(false);
        }

        let mut record = csv::StringRecord::new();
        if self.reader.read_record(&mut record)? {
            self.current = Some(record);
            Ok(true)
        } else {
            self.current = None;
            self.finished = true;
            Ok(false)
        }
    }

    /// Field `index` of the current row
    pub fn field(&self, index: usize) -> Result<&str, ReaderError> {
        let row = self.current.as_ref().ok_or(ReaderError::InvalidState)?;
        row.get(index).ok_or(ReaderError::OutOfRange {
            index,
            row: self.row_index.unwrap_or(0),
            len: row.len(),
        })
    }

    /// Number of fields in the current row
    pub fn field_count(&self) -> Result<usize, ReaderError> {
        self.current
            .as_ref()
            .map(|r| r.len())
            .ok_or(ReaderError::InvalidState)
    }

    /// Zero-based index of the current row, None before the first advance
    pub fn current_row_index(&self) -> Option<usize> {
        self.row_index
    }
}
