//! Row-oriented output sink
//!
//! Metrics emit their results through [`RowSink`]: an append-only stream of
//! rows, one cell at a time. The CSV implementation quotes string cells,
//! leaves scalar cells bare, appends the separator after **every** cell
//! (so each row ends with the separator) and terminates rows with a
//! newline. No column-count bookkeeping is done here; each metric is
//! responsible for the shape of its own table.
//!
//! Sinks are written from the caller thread only — they are not shared with
//! parallel worker bodies.

#![forbid(unsafe_code)]

use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;

/// Append-only, row-oriented result sink.
pub trait RowSink {
    /// Append a string cell (quoted in the CSV implementation).
    fn write_text(&mut self, value: &str) -> Result<()>;
    /// Append a scalar cell, formatted with its `Display` impl.
    fn write_value(&mut self, value: &dyn Display) -> Result<()>;
    /// Terminate the current row.
    fn end_row(&mut self) -> Result<()>;
    /// Flush buffered rows to the backing store.
    fn flush(&mut self) -> Result<()>;
}

/// CSV implementation of [`RowSink`] over any writer.
pub struct CsvSink<W: Write> {
    out: W,
    separator: char,
}

impl CsvSink<BufWriter<File>> {
    /// Open (and truncate) `path` as the backing file.
    pub fn create(path: &Path, separator: char) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self { out: BufWriter::new(file), separator })
    }
}

impl<W: Write> CsvSink<W> {
    /// Wrap an arbitrary writer, mainly for tests and in-memory capture.
    pub fn from_writer(out: W, separator: char) -> Self {
        Self { out, separator }
    }

    /// Consume the sink and hand back the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RowSink for CsvSink<W> {
    fn write_text(&mut self, value: &str) -> Result<()> {
        write!(self.out, "\"{}\"{}", value, self.separator)?;
        Ok(())
    }

    fn write_value(&mut self, value: &dyn Display) -> Result<()> {
        write!(self.out, "{}{}", value, self.separator)?;
        Ok(())
    }

    fn end_row(&mut self) -> Result<()> {
        writeln!(self.out)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
