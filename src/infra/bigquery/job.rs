//! Request bodies and response parsing for the BigQuery REST API.

use crate::services::warehouse::{RowRejection, TableRef, WriteDisposition};
use crate::table::Field;
use serde_json::{Value, json};

/// Boundary for multipart/related load-job uploads. Must not occur in the
/// NDJSON payload; JSON string escaping guarantees no raw `--` line prefix.
pub const MULTIPART_BOUNDARY: &str = "taxi_star_etl_boundary_7c1f0e";
pub const MULTIPART_CONTENT_TYPE: &str =
    "multipart/related; boundary=taxi_star_etl_boundary_7c1f0e";

pub fn table_reference(table: &TableRef) -> Value {
    json!({
        "projectId": table.project,
        "datasetId": table.dataset,
        "tableId": table.table,
    })
}

pub fn table_resource(table: &TableRef, schema: &[Field]) -> Value {
    json!({
        "tableReference": table_reference(table),
        "schema": { "fields": schema },
    })
}

pub fn dataset_resource(project: &str, dataset: &str, location: &str) -> Value {
    json!({
        "datasetReference": { "projectId": project, "datasetId": dataset },
        "location": location,
    })
}

/// Job resource for a newline-delimited JSON load into `table`.
pub fn load_job(
    table: &TableRef,
    schema: &[Field],
    disposition: WriteDisposition,
    job_id: &str,
) -> Value {
    json!({
        "jobReference": { "projectId": table.project, "jobId": job_id },
        "configuration": {
            "load": {
                "destinationTable": table_reference(table),
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "createDisposition": "CREATE_IF_NEEDED",
                "writeDisposition": disposition.as_bigquery(),
                "schema": { "fields": schema },
            }
        }
    })
}

/// Assembles a `multipart/related` body: job metadata, then the data.
pub fn multipart_body(metadata: &Value, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 512);
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{MULTIPART_BOUNDARY}\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

/// Body of a `tabledata.insertAll` call.
pub fn insert_all_request(rows: &[Value]) -> Value {
    let rows: Vec<Value> = rows.iter().map(|row| json!({ "json": row })).collect();
    json!({ "rows": rows, "skipInvalidRows": false, "ignoreUnknownValues": false })
}

/// Rows listed under `insertErrors`. Rows that only failed because another
/// row in the request was invalid (`stopped`) are not counted.
pub fn insert_errors(response: &Value) -> Vec<RowRejection> {
    let Some(errors) = response["insertErrors"].as_array() else {
        return Vec::new();
    };

    errors
        .iter()
        .filter_map(|entry| {
            let index = entry["index"].as_u64()? as usize;
            let reasons = entry["errors"].as_array()?;
            if reasons.iter().all(|e| e["reason"] == "stopped") {
                return None;
            }
            let message = reasons
                .iter()
                .filter(|e| e["reason"] != "stopped")
                .map(|e| {
                    let reason = e["reason"].as_str().unwrap_or("unknown");
                    let message = e["message"].as_str().unwrap_or("");
                    format!("{reason}: {message}")
                })
                .collect::<Vec<_>>()
                .join("; ");
            Some(RowRejection { index, message })
        })
        .collect()
}

/// Where a load job stands, as read from a job resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Done { output_rows: Option<u64> },
    Failed { message: String },
}

impl JobState {
    pub fn from_job(job: &Value) -> Self {
        let status = &job["status"];
        if status["state"] != "DONE" {
            return JobState::Pending;
        }

        if let Some(error) = status.get("errorResult").filter(|e| !e.is_null()) {
            let mut message = error["message"]
                .as_str()
                .unwrap_or("load job failed")
                .to_string();
            let details: Vec<&str> = status["errors"]
                .as_array()
                .map(|errs| errs.iter().filter_map(|e| e["message"].as_str()).collect())
                .unwrap_or_default();
            if !details.is_empty() {
                message = format!("{message} ({})", details.join("; "));
            }
            return JobState::Failed { message };
        }

        // int64 values arrive as JSON strings.
        let output_rows = job["statistics"]["load"]["outputRows"]
            .as_str()
            .and_then(|s| s.parse().ok());
        JobState::Done { output_rows }
    }
}

/// Message carried by a Google API error body, or the raw body.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::FieldType;

    fn table() -> TableRef {
        TableRef {
            project: "proj".into(),
            dataset: "taxi".into(),
            table: "dim_vendor".into(),
        }
    }

    #[test]
    fn test_load_job_configuration() {
        let schema = vec![Field::required("vendor_key", FieldType::Integer)];
        let job = load_job(&table(), &schema, WriteDisposition::Replace, "job-1");

        let load = &job["configuration"]["load"];
        assert_eq!(load["writeDisposition"], "WRITE_TRUNCATE");
        assert_eq!(load["sourceFormat"], "NEWLINE_DELIMITED_JSON");
        assert_eq!(load["destinationTable"]["tableId"], "dim_vendor");
        assert_eq!(load["schema"]["fields"][0]["type"], "INTEGER");
        assert_eq!(job["jobReference"]["jobId"], "job-1");
    }

    #[test]
    fn test_multipart_body_layout() {
        let body = multipart_body(&json!({"a": 1}), b"{\"x\":1}\n");
        let text = String::from_utf8(body).unwrap();

        assert!(text.starts_with(&format!("--{MULTIPART_BOUNDARY}\r\n")));
        assert!(text.contains("\r\n\r\n{\"a\":1}\r\n"));
        assert!(text.contains("application/octet-stream\r\n\r\n{\"x\":1}\n"));
        assert!(text.ends_with(&format!("--{MULTIPART_BOUNDARY}--\r\n")));
    }

    #[test]
    fn test_content_type_names_boundary() {
        assert!(MULTIPART_CONTENT_TYPE.ends_with(&format!("boundary={MULTIPART_BOUNDARY}")));
    }

    #[test]
    fn test_insert_errors_skip_stopped_rows() {
        let response = json!({
            "insertErrors": [
                {"index": 0, "errors": [{"reason": "stopped", "message": ""}]},
                {"index": 3, "errors": [{"reason": "invalid", "message": "no such field: foo"}]}
            ]
        });
        let rejected = insert_errors(&response);

        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].index, 3);
        assert_eq!(rejected[0].message, "invalid: no such field: foo");
    }

    #[test]
    fn test_insert_errors_absent() {
        assert!(insert_errors(&json!({"kind": "bigquery#tableDataInsertAllResponse"})).is_empty());
    }

    #[test]
    fn test_job_state() {
        assert_eq!(
            JobState::from_job(&json!({"status": {"state": "RUNNING"}})),
            JobState::Pending
        );
        assert_eq!(
            JobState::from_job(&json!({
                "status": {"state": "DONE"},
                "statistics": {"load": {"outputRows": "42"}}
            })),
            JobState::Done {
                output_rows: Some(42)
            }
        );
        assert_eq!(
            JobState::from_job(&json!({
                "status": {
                    "state": "DONE",
                    "errorResult": {"reason": "invalid", "message": "Error while reading data"},
                    "errors": [{"message": "row 3: bad value"}]
                }
            })),
            JobState::Failed {
                message: "Error while reading data (row 3: bad value)".into()
            }
        );
    }

    #[test]
    fn test_error_message_from_google_body() {
        let body = r#"{"error": {"code": 404, "message": "Not found: Dataset proj:taxi"}}"#;
        assert_eq!(error_message(body), "Not found: Dataset proj:taxi");
        assert_eq!(error_message("plain"), "plain");
    }
}
