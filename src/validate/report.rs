//! CSV reports
//!
//! Rows are flushed as they are written so a long run that dies midway
//! still leaves every finished trial on disk.

use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// One mutation trial
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailRow {
    pub file: String,
    pub mutation: String,
    /// Mutated line
    pub line: usize,
    /// 1-based rank of the first window covering `line`; empty if none does
    pub rank: Option<usize>,
    /// Line the sandbox reported the failure on
    pub observed_line: Option<usize>,
    pub exception: String,
    pub online: bool,
    /// Running count of failed trials for the file
    pub errors: u32,
    /// Running count of mutations for the file
    pub mutations: u32,
    pub line_mutations: u32,
    pub line_errors: u32,
    pub charm: f64,
    pub delta: f64,
    pub token_type: String,
    pub token_value: String,
    pub failure_file: String,
    pub failure_function: String,
}

/// Per-line estimate after a sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub file: String,
    pub line: usize,
    pub mutations: u32,
    pub errors: u32,
    pub charm: f64,
    pub delta: f64,
}

/// Header-first CSV writer that flushes after each row
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl ReportWriter<File> {
    pub fn create(path: &Path) -> csv::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> ReportWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new().has_headers(true).from_writer(inner),
            rows: 0,
        }
    }

    pub fn write<R: Serialize>(&mut self, row: &R) -> csv::Result<()> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> csv::Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_header_and_empty_rank() {
        let mut writer = ReportWriter::new(Vec::new());
        writer
            .write(&DetailRow {
                file: "a.py".to_string(),
                mutation: "delete-token".to_string(),
                line: 3,
                rank: None,
                observed_line: Some(3),
                exception: "SyntaxError".to_string(),
                online: true,
                errors: 1,
                mutations: 1,
                line_mutations: 1,
                line_errors: 1,
                charm: 0.0,
                delta: 1.5,
                token_type: "NAME".to_string(),
                token_value: "x".to_string(),
                failure_file: "a.py".to_string(),
                failure_function: String::new(),
            })
            .unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "file,mutation,line,rank,observed_line,exception,online,errors,mutations,\
             line_mutations,line_errors,charm,delta,token_type,token_value,failure_file,\
             failure_function"
        );
        assert_eq!(
            lines.next().unwrap(),
            "a.py,delete-token,3,,3,SyntaxError,true,1,1,1,1,0.0,1.5,NAME,x,a.py,"
        );
    }

    #[test]
    fn test_summary_rows_counted() {
        let mut writer = ReportWriter::new(Vec::new());
        for line in 1..=3 {
            writer
                .write(&SummaryRow {
                    file: "a.py".to_string(),
                    line,
                    mutations: 2,
                    errors: 1,
                    charm: -0.5,
                    delta: 0.7,
                })
                .unwrap();
        }
        assert_eq!(writer.rows(), 3);
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.starts_with("file,line,mutations,errors,charm,delta\n"));
    }
}
