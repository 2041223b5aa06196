use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use super::{EventSource, IngestError, SourceRecord};

/// One JSON record per line. Blank lines are skipped.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    name: String,
    line_no: u64,
    committed: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            lines: reader.lines(),
            name: name.into(),
            line_no: 0,
            committed: 0,
        }
    }

    /// Last line number marked as processed.
    pub fn committed_line(&self) -> u64 {
        self.committed
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventSource for JsonLinesSource<R> {
    async fn next_record(&mut self) -> Result<Option<SourceRecord>, IngestError> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(SourceRecord {
                payload: line.into_bytes(),
                position: format!("{}:{}", self.name, self.line_no),
            }));
        }
        Ok(None)
    }

    async fn commit(&mut self) -> Result<(), IngestError> {
        self.committed = self.line_no;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json-lines {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_blank_lines_and_tracks_position() {
        let input = b"{\"a\":1}\n\n   \n{\"a\":2}\n" as &[u8];
        let mut src = JsonLinesSource::new(input, "mem");

        let first = src.next_record().await.unwrap().unwrap();
        assert_eq!(first.position, "mem:1");
        let second = src.next_record().await.unwrap().unwrap();
        assert_eq!(second.payload, b"{\"a\":2}");
        assert_eq!(second.position, "mem:4");
        assert!(src.next_record().await.unwrap().is_none());

        src.commit().await.unwrap();
        assert_eq!(src.committed_line(), 4);
    }
}
