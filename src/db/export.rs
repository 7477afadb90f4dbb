use crate::models::{BatchItemResult, BatchRun};
use std::io::Write;

const HEADER: [&str; 6] = ["position", "access_key", "status", "invoice_id", "error_kind", "detail"];

/// 批处理结果写成 CSV, 每张发票一行 (保持提交顺序)
pub fn write_batch_csv<W: Write>(run: &BatchRun, writer: W) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(HEADER)?;

    for outcome in &run.outcomes {
        let access_key = outcome.access_key.clone().unwrap_or_default();
        let record = match &outcome.result {
            BatchItemResult::Succeeded { invoice } => [
                outcome.position.to_string(),
                access_key,
                "succeeded".to_string(),
                invoice.id.to_string(),
                String::new(),
                format!("{} items, {} linked", invoice.item_count, invoice.linked_count),
            ],
            BatchItemResult::Failed { kind, reason } => [
                outcome.position.to_string(),
                access_key,
                "failed".to_string(),
                String::new(),
                format!("{:?}", kind).to_lowercase(),
                reason.clone(),
            ],
            BatchItemResult::Skipped => [
                outcome.position.to_string(),
                access_key,
                "skipped".to_string(),
                String::new(),
                String::new(),
                String::new(),
            ],
        };
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// 导出为内存中的字节 (HTTP 下载用)
pub fn batch_csv_bytes(run: &BatchRun) -> Result<Vec<u8>, csv::Error> {
    let mut buffer = Vec::new();
    write_batch_csv(run, &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::BatchOutcome;
    use chrono::Utc;

    #[test]
    fn one_row_per_outcome_in_order() {
        let now = Utc::now();
        let run = BatchRun {
            id: 1,
            started_at: now,
            finished_at: now,
            total: 2,
            succeeded: 0,
            failed: 1,
            skipped: 1,
            outcomes: vec![
                BatchOutcome {
                    position: 0,
                    access_key: None,
                    result: BatchItemResult::Failed {
                        kind: ErrorKind::Validation,
                        reason: "access_key: is required".into(),
                    },
                },
                BatchOutcome {
                    position: 1,
                    access_key: Some("k".into()),
                    result: BatchItemResult::Skipped,
                },
            ],
        };

        let bytes = batch_csv_bytes(&run).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "position,access_key,status,invoice_id,error_kind,detail");
        assert_eq!(lines[1], "0,,failed,,validation,access_key: is required");
        assert_eq!(lines[2], "1,k,skipped,,,");
    }
}
