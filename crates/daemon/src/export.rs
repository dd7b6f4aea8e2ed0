//! CSV rendering of the in-memory channel buffers.

use std::string::FromUtf8Error;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV rendering failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("export payload was not valid UTF-8: {0}")]
    Encoding(#[from] FromUtf8Error),
}

/// Renders up to `max_rows` rows of the channel buffers as CSV, one column
/// per channel, row `i` holding the `i`-th sample of every channel. Channels
/// of unequal length truncate to the shortest.
pub fn render_csv(buffers: &[Vec<f64>], max_rows: usize) -> Result<String, ExportError> {
    if buffers.is_empty() {
        return Ok(String::new());
    }
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record((1..=buffers.len()).map(|i| format!("Channel{i}")))?;

    let rows = buffers.iter().map(Vec::len).min().unwrap_or(0).min(max_rows);
    for row in 0..rows {
        writer.write_record(buffers.iter().map(|channel| channel[row].to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.into_error().into()))?;
    Ok(String::from_utf8(bytes)?)
}
