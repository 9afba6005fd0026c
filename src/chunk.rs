use crate::error::OffprintError;
use crate::insights::DailyMetric;

/// Rows per tabular report page. Matches the row capacity of the fixed
/// page geometry in [`crate::pages`].
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// One page worth of daily metric rows, annotated with its position in
/// the full sequence so page templates can render a position indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsChunk {
    /// 1-based position of this chunk.
    pub page_number: usize,
    /// Total number of chunks produced from the same input.
    pub total_pages: usize,
    pub records: Vec<DailyMetric>,
}

/// Splits `records` into consecutive chunks of at most `size` rows,
/// preserving input order. The final chunk may be shorter. An empty
/// input yields no chunks.
pub fn chunk_daily_metrics(
    records: &[DailyMetric],
    size: usize,
) -> Result<Vec<MetricsChunk>, OffprintError> {
    if size == 0 {
        return Err(OffprintError::InvalidConfiguration(
            "chunk size must be at least 1".to_string(),
        ));
    }
    if records.is_empty() {
        return Ok(Vec::new());
    }
    let total_pages = records.len().div_ceil(size);
    let chunks = records
        .chunks(size)
        .enumerate()
        .map(|(index, rows)| MetricsChunk {
            page_number: index + 1,
            total_pages,
            records: rows.to_vec(),
        })
        .collect();
    Ok(chunks)
}
