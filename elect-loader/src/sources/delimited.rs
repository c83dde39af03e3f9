//! Delimited-file source
//!
//! Any row that does not parse is fatal for the run: first-party files are
//! expected to be well formed.

use std::collections::HashSet;
use std::path::Path;

use super::tabular_reader::{TabularOptions, TabularRecordReader};
use crate::error::{ImportError, ReaderError};
use crate::models::{ProtocolImage, ProtocolRecord, RECORD_VALUES};
use crate::services::resolver::RegionResolver;

/// Column mapping of one delimited file layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimitedLayout {
    pub region_column: usize,
    pub commission_column: usize,
    /// First of the 25 value columns
    pub first_value_column: usize,
    /// First image URI column; None when the layout carries no images
    pub first_image_column: Option<usize>,
}

impl DelimitedLayout {
    /// Region, commission, 25 values, then image URIs
    pub const RUELECT: DelimitedLayout = DelimitedLayout {
        region_column: 0,
        commission_column: 1,
        first_value_column: 2,
        first_image_column: Some(27),
    };

    /// Three metadata columns, region, commission, 25 values, no images
    pub const COMPACT: DelimitedLayout = DelimitedLayout {
        region_column: 3,
        commission_column: 4,
        first_value_column: 5,
        first_image_column: None,
    };
}

/// Forward-only producer of records from a delimited file
///
/// Not restartable: once the end of the input is reached the source stays
/// exhausted.
pub struct DelimitedSource {
    reader: TabularRecordReader,
    layout: DelimitedLayout,
    exhausted: bool,
}

impl DelimitedSource {
    pub fn new(reader: TabularRecordReader, layout: DelimitedLayout) -> Self {
        Self {
            reader,
            layout,
            exhausted: false,
        }
    }

    pub fn open(path: &Path, layout: DelimitedLayout, options: TabularOptions) -> std::io::Result<Self> {
        Ok(Self::new(TabularRecordReader::open(path, options)?, layout))
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Produce the next record, or None at end of input
    pub fn next_record(
        &mut self,
        resolver: &dyn RegionResolver,
    ) -> Result<Option<ProtocolRecord>, ImportError> {
        if !self.advance()? {
            return Ok(None);
        }

        let row = self.row();
        let region = resolver.resolve_or_create(self.field(self.layout.region_column, row)?);

        let commission = parse_int(self.field(self.layout.commission_column, row)?, row)?;

        let mut values = [0i32; RECORD_VALUES];
        for (offset, slot) in values.iter_mut().enumerate() {
            *slot = parse_int(self.field(self.layout.first_value_column + offset, row)?, row)?;
        }

        let mut images = Vec::new();
        if let Some(first) = self.layout.first_image_column {
            let count = self.reader.field_count()?;
            for column in first..count {
                let raw = self.reader.field(column)?.trim();
                if raw.is_empty() {
                    break;
                }
                if url::Url::parse(raw).is_err() {
                    return Err(ImportError::malformed(
                        row,
                        format!("'{}' in column {} is not an absolute URI", raw, column),
                    ));
                }
                images.push(ProtocolImage::from_uri(raw, images.len() as i32));
            }
        }

        Ok(Some(ProtocolRecord {
            region,
            commission,
            values,
            images,
        }))
    }

    /// Lazy sequence of records; stops after the first error
    pub fn records<'a>(
        &'a mut self,
        resolver: &'a dyn RegionResolver,
    ) -> impl Iterator<Item = Result<ProtocolRecord, ImportError>> + Send + 'a {
        let mut failed = false;
        std::iter::from_fn(move || {
            if failed {
                return None;
            }
            match self.next_record(resolver) {
                Ok(Some(record)) => Some(Ok(record)),
                Ok(None) => None,
                Err(e) => {
                    failed = true;
                    Some(Err(e))
                }
            }
        })
    }

    /// Distinct region names, in first-seen order
    pub fn collect_region_names(&mut self) -> Result<Vec<String>, ImportError> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        while self.advance()? {
            let name = self.field(self.layout.region_column, self.row())?;
            if seen.insert(name.to_string()) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Distinct region names the resolver does not know
    pub fn check_regions(&mut self, resolver: &dyn RegionResolver) -> Result<Vec<String>, ImportError> {
        Ok(self
            .collect_region_names()?
            .into_iter()
            .filter(|name| !resolver.contains(name))
            .collect())
    }

    fn advance(&mut self) -> Result<bool, ImportError> {
        if self.exhausted {
            return Ok(false);
        }
        let more = self.reader.advance()?;
        if !more {
            self.exhausted = true;
        }
        Ok(more)
    }

    fn row(&self) -> usize {
        self.reader.current_row_index().unwrap_or(0)
    }

    /// Field of the current row; a row too short for the layout is malformed
    fn field(&self, column: usize, row: usize) -> Result<&str, ImportError> {
        self.reader.field(column).map_err(|e| match e {
            ReaderError::OutOfRange { .. } => ImportError::malformed(row, e.to_string()),
            other => other.into(),
        })
    }
}

fn parse_int(raw: &str, row: usize) -> Result<i32, ImportError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| ImportError::malformed(row, format!("Can't parse '{}' as integer", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::resolver::RegionIndex;

    fn source(text: &str, layout: DelimitedLayout) -> DelimitedSource {
        let reader = TabularRecordReader::from_bytes(
            text.as_bytes(),
            TabularOptions {
                delimiter: b';',
                encoding: encoding_rs::UTF_8,
            },
        );
        DelimitedSource::new(reader, layout)
    }

    fn values_row(first: i32) -> String {
        (0..RECORD_VALUES as i32)
            .map(|i| (first + i).to_string())
            .collect::<Vec<_>>()
            .join(";")
    }

    #[test]
    fn test_ruelect_row_with_images() {
        let text = format!(
            "Республика Тыва;1;{};http://ruelect.com/p/1.jpg;http://ruelect.com/p/2.jpg; ;http://ignored/3.jpg\n",
            values_row(100)
        );
        let mut src = source(&text, DelimitedLayout::RUELECT);
        let index = RegionIndex::default();

        let record = src.next_record(&index).unwrap().unwrap();
        assert_eq!(record.region.name, "Республика Тыва");
        assert!(record.region.is_new);
        assert_eq!(record.commission, 1);
        assert_eq!(record.values[0], 100);
        assert_eq!(record.values[24], 124);
        assert_eq!(record.images.len(), 2);
        assert_eq!(record.images[1].index, 1);
        assert_eq!(record.images[1].uri.as_deref(), Some("http://ruelect.com/p/2.jpg"));

        assert!(src.next_record(&index).unwrap().is_none());
        assert!(src.is_exhausted());
        assert!(src.next_record(&index).unwrap().is_none());
    }

    #[test]
    fn test_compact_layout_skips_metadata_columns() {
        let text = format!("x;y;z;Город Москва;6;{}\n", values_row(1));
        let mut src = source(&text, DelimitedLayout::COMPACT);

        let record = src.next_record(&RegionIndex::default()).unwrap().unwrap();
        assert_eq!(record.region.name, "Город Москва");
        assert_eq!(record.commission, 6);
        assert_eq!(record.values[0], 1);
        assert!(record.images.is_empty());
    }

    #[test]
    fn test_bad_commission_is_malformed_with_row() {
        let text = format!("A;1;{}\nA;one;{}\n", values_row(0), values_row(0));
        let mut src = source(&text, DelimitedLayout::RUELECT);
        let index = RegionIndex::default();

        let results: Vec<_> = src.records(&index).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(ImportError::MalformedRecord { row, .. }) => assert_eq!(*row, 1),
            other => panic!("expected MalformedRecord, got {:?}", other),
        }
    }

    #[test]
    fn test_relative_image_uri_rejected() {
        let text = format!("A;1;{};photos/1.jpg\n", values_row(0));
        let mut src = source(&text, DelimitedLayout::RUELECT);

        let err = src.next_record(&RegionIndex::default()).unwrap_err();
        assert!(matches!(err, ImportError::MalformedRecord { row: 0, .. }));
    }

    #[test]
    fn test_short_row_is_malformed_with_row() {
        let text = format!("A;1;{}\nA;2;3;4\n", values_row(0));
        let mut src = source(&text, DelimitedLayout::RUELECT);
        let index = RegionIndex::default();

        assert!(src.next_record(&index).unwrap().is_some());
        match src.next_record(&index).unwrap_err() {
            ImportError::MalformedRecord { row, message } => {
                assert_eq!(row, 1);
                assert!(message.contains("out of range"), "{}", message);
            }
            other => panic!("expected MalformedRecord, got {:?}", other),
        }
    }

    #[test]
    fn test_region_name_passed_through_untrimmed() {
        let text = format!(" Город Москва ;1;{}\n", values_row(0));
        let mut src = source(&text, DelimitedLayout::RUELECT);
        let index = RegionIndex::new(vec![crate::models::Region::existing(
            uuid::Uuid::new_v4(),
            "Город Москва",
        )]);

        let record = src.next_record(&index).unwrap().unwrap();
        assert_eq!(record.region.name, " Город Москва ");
        assert!(record.region.is_new);
    }

    #[test]
    fn test_check_regions_reports_unknown_names_once() {
        let text = format!(
            "Known;1;{v}\nNew one;2;{v}\nNew one;3;{v}\nNew two;1;{v}\n",
            v = values_row(0)
        );
        let mut src = source(&text, DelimitedLayout::RUELECT);
        let index = RegionIndex::new(vec![crate::models::Region::existing(
            uuid::Uuid::new_v4(),
            "Known",
        )]);

        let unknown = src.check_regions(&index).unwrap();
        assert_eq!(unknown, vec!["New one".to_string(), "New two".to_string()]);
        // Pre-flight has no side effects on the resolver
        assert!(!index.contains("New one"));
    }
}
