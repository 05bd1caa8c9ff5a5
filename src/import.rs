use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::constants::import::BATCH_SIZE;
use crate::data::{FloodId, FloodRecord, Row};
use crate::geo::{greek_grid_to_wgs84, within_greece};
use crate::source::TableSource;
use crate::types::TableName;

/// Outcome of a bulk import.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Records accepted by the source.
    pub inserted: usize,
    /// Records in batches the source rejected.
    pub failed: usize,
    /// Insert requests issued.
    pub batches: usize,
    /// Records with no usable position or a position outside Greece.
    pub skipped: usize,
    /// Records whose coordinates were derived from Greek Grid values.
    pub converted: usize,
}

impl ImportSummary {
    /// Whether every prepared record was inserted.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Loads flood records into the flood table in fixed-size batches.
pub struct BatchImporter {
    source: Arc<dyn TableSource>,
    table: TableName,
    batch_size: usize,
}

impl BatchImporter {
    /// Importer writing to the configured flood table.
    pub fn new(source: Arc<dyn TableSource>, config: &ClientConfig) -> Self {
        Self {
            source,
            table: config.floods_table.clone(),
            batch_size: BATCH_SIZE,
        }
    }

    /// Override the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Insert `records`, continuing past failed batches.
    pub fn import(&self, records: Vec<FloodRecord>) -> ImportSummary {
        let mut summary = ImportSummary::default();
        let mut rows: Vec<Row> = Vec::with_capacity(records.len());
        for record in records {
            match locate(record) {
                Located::Ready(record) => rows.push(record.to_row()),
                Located::Converted(record) => {
                    summary.converted += 1;
                    rows.push(record.to_row());
                }
                Located::Skipped(id) => {
                    debug!(flood_id = id, "record skipped: no position inside Greece");
                    summary.skipped += 1;
                }
            }
        }

        let total_batches = rows.len().div_ceil(self.batch_size);
        for (idx, batch) in rows.chunks(self.batch_size).enumerate() {
            summary.batches += 1;
            match self.source.insert(&self.table, batch) {
                Ok(()) => {
                    summary.inserted += batch.len();
                    info!(
                        table = %self.table,
                        batch = idx + 1,
                        total_batches,
                        rows = batch.len(),
                        "import batch inserted"
                    );
                }
                Err(err) => {
                    summary.failed += batch.len();
                    warn!(
                        table = %self.table,
                        batch = idx + 1,
                        total_batches,
                        error = %err,
                        "import batch failed"
                    );
                }
            }
        }
        summary
    }
}

enum Located {
    Ready(FloodRecord),
    Converted(FloodRecord),
    Skipped(FloodId),
}

fn locate(mut record: FloodRecord) -> Located {
    if let (Some(lat), Some(lon)) = (record.latitude, record.longitude)
        && record.has_coordinates()
    {
        return if within_greece(lat, lon) {
            Located::Ready(record)
        } else {
            Located::Skipped(record.id)
        };
    }
    match (record.x_original, record.y_original) {
        (Some(x), Some(y)) if x.is_finite() && y.is_finite() => {
            let (lat, lon) = greek_grid_to_wgs84(x, y);
            if !within_greece(lat, lon) {
                return Located::Skipped(record.id);
            }
            record.latitude = Some(lat);
            record.longitude = Some(lon);
            Located::Converted(record)
        }
        _ => Located::Skipped(record.id),
    }
}
