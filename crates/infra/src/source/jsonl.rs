//! Newline-delimited JSON row source.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{RowSource, RowStream, SourceError};

/// Reads one JSON object per line; blank lines are skipped.
#[derive(Debug, Clone)]
pub struct JsonlRowSource {
    path: PathBuf,
}

impl JsonlRowSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RowSource for JsonlRowSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn open(&self) -> Result<RowStream<'_>, SourceError> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| SourceError::InvalidReference(format!("{}: {e}", self.path.display())))?;
        let lines = BufReader::new(file).lines();

        let stream = futures::stream::unfold((lines, 0usize), |(mut lines, line_no)| async move {
            let mut line_no = line_no;
            loop {
                line_no += 1;
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        let item = serde_json::from_str::<Value>(&line).map_err(|e| SourceError::Malformed {
                            location: format!("line {line_no}"),
                            message: e.to_string(),
                        });
                        return Some((item, (lines, line_no)));
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        return Some((Err(SourceError::Read(e.to_string())), (lines, line_no)));
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn reads_objects_and_flags_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        std::fs::write(
            &path,
            "{\"client_id\":\"a\"}\n\n{not json}\n{\"client_id\":\"b\"}\n",
        )
        .unwrap();

        let items: Vec<Result<Value, SourceError>> =
            JsonlRowSource::new(&path).open().await.unwrap().collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), &json!({"client_id": "a"}));
        assert!(matches!(
            &items[1],
            Err(SourceError::Malformed { location, .. }) if location == "line 3"
        ));
        assert_eq!(items[2].as_ref().unwrap(), &json!({"client_id": "b"}));
    }

    #[tokio::test]
    async fn missing_file_is_an_invalid_reference() {
        let err = JsonlRowSource::new("/definitely/not/here.jsonl")
            .open()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::InvalidReference(_)));
    }
}
