use super::auth::{AuthError, BIGQUERY_SCOPE, ServiceAccountKey, fetch_access_token};
use super::job::{
    JobState, MULTIPART_CONTENT_TYPE, dataset_resource, error_message, insert_all_request,
    insert_errors, load_job, multipart_body, table_resource,
};
use crate::error::LoadError;
use crate::http::auth::Bearer;
use crate::http::{BasicClient, HttpClient, RawResponse, build_request, send};
use crate::services::warehouse::{
    DatasetRef, RowRejection, TableInfo, TableRef, Warehouse, WriteDisposition,
};
use crate::table::{Field, TablePayload};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const UPLOAD_BASE: &str = "https://bigquery.googleapis.com/upload/bigquery/v2";
/// Stop using a token this long before it lapses.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// BigQuery over its REST API.
pub struct BigQueryClient<C> {
    http: C,
    api_base: String,
    upload_base: String,
    poll_interval: Duration,
    job_timeout: Duration,
    /// When the bearer token stops being usable. The token is never refreshed.
    token_deadline: Option<Instant>,
}

impl BigQueryClient<Bearer<BasicClient>> {
    /// Authenticates with a service-account key and returns a ready client.
    pub async fn from_service_account(key: &ServiceAccountKey) -> Result<Self, AuthError> {
        let issued = Instant::now();
        let token = fetch_access_token(key, BIGQUERY_SCOPE).await?;
        let http = BasicClient::with_timeouts(Duration::from_secs(300), Duration::from_secs(10))?;
        let http = Bearer::new(http, &token.token)?;
        let deadline = issued + token.lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN);
        Ok(Self::new(http).with_token_deadline(deadline))
    }
}

impl<C: HttpClient> BigQueryClient<C> {
    pub fn new(http: C) -> Self {
        Self {
            http,
            api_base: API_BASE.to_string(),
            upload_base: UPLOAD_BASE.to_string(),
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(600),
            token_deadline: None,
        }
    }

    pub fn with_token_deadline(mut self, deadline: Instant) -> Self {
        self.token_deadline = Some(deadline);
        self
    }

    /// Points the client at another endpoint, e.g. a local emulator.
    pub fn with_base_urls(mut self, api_base: &str, upload_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.upload_base = upload_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_job_polling(mut self, poll_interval: Duration, job_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.job_timeout = job_timeout;
        self
    }

    fn url(&self, base: &str, path: &str) -> Result<Url, LoadError> {
        let url = format!("{base}{path}");
        Url::parse(&url).map_err(|e| LoadError::InvalidUrl {
            url,
            message: e.to_string(),
        })
    }

    async fn call(
        &self,
        table: &str,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<RawResponse, LoadError> {
        let body = body.map(|v| ("application/json", v.to_string().into_bytes()));
        let req = build_request(method, url, body);
        send(&self.http, req).await.map_err(|source| LoadError::Http {
            table: table.to_string(),
            source,
        })
    }

    async fn get_job(
        &self,
        project: &str,
        job_id: &str,
        location: Option<&str>,
        table: &str,
    ) -> Result<Value, LoadError> {
        let mut url = self.url(&self.api_base, &format!("/projects/{project}/jobs/{job_id}"))?;
        if let Some(location) = location {
            url.query_pairs_mut().append_pair("location", location);
        }
        let resp = self.call(table, Method::GET, url, None).await?;
        if !resp.status.is_success() {
            return Err(rejected(table, 0, &resp));
        }
        let job = resp.json();
        if job["status"].is_null() {
            return Err(malformed_job(table, 0, &resp));
        }
        Ok(job)
    }
}

fn malformed_job(table: &str, attempted: usize, resp: &RawResponse) -> LoadError {
    LoadError::Rejected {
        table: table.to_string(),
        attempted,
        message: format!("unexpected load job response: {}", resp.body),
    }
}

fn rejected(table: &str, attempted: usize, resp: &RawResponse) -> LoadError {
    LoadError::Rejected {
        table: table.to_string(),
        attempted,
        message: format!("HTTP {}: {}", resp.status.as_u16(), error_message(&resp.body)),
    }
}

#[async_trait]
impl<C: HttpClient> Warehouse for BigQueryClient<C> {
    #[tracing::instrument(skip(self), fields(dataset = %dataset.dataset))]
    async fn ensure_dataset(&self, dataset: &DatasetRef) -> Result<(), LoadError> {
        let name = format!("{}.{}", dataset.project, dataset.dataset);
        let url = self.url(
            &self.api_base,
            &format!("/projects/{}/datasets/{}", dataset.project, dataset.dataset),
        )?;
        let resp = self.call(&name, Method::GET, url, None).await?;

        match resp.status {
            s if s.is_success() => {
                debug!("Dataset already exists");
                return Ok(());
            }
            StatusCode::NOT_FOUND => {}
            _ => return Err(rejected(&name, 0, &resp)),
        }

        let url = self.url(&self.api_base, &format!("/projects/{}/datasets", dataset.project))?;
        let body = dataset_resource(&dataset.project, &dataset.dataset, &dataset.location);
        let resp = self.call(&name, Method::POST, url, Some(&body)).await?;

        match resp.status {
            s if s.is_success() => {
                info!(location = %dataset.location, "Created dataset");
                Ok(())
            }
            StatusCode::CONFLICT => Ok(()),
            _ => Err(rejected(&name, 0, &resp)),
        }
    }

    async fn create_table_if_absent(
        &self,
        table: &TableRef,
        schema: &[Field],
    ) -> Result<(), LoadError> {
        let name = table.to_string();
        let url = self.url(
            &self.api_base,
            &format!("/projects/{}/datasets/{}/tables", table.project, table.dataset),
        )?;
        let body = table_resource(table, schema);
        let resp = self.call(&name, Method::POST, url, Some(&body)).await?;

        match resp.status {
            s if s.is_success() => {
                info!(table = %name, "Created table");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(table = %name, "Table already exists");
                Ok(())
            }
            _ => Err(rejected(&name, 0, &resp)),
        }
    }

    async fn load_batch(
        &self,
        table: &TableRef,
        payload: &TablePayload,
        disposition: WriteDisposition,
    ) -> Result<u64, LoadError> {
        let name = table.to_string();
        let attempted = payload.len();
        let data = payload.to_ndjson().map_err(|e| LoadError::Rejected {
            table: name.clone(),
            attempted,
            message: e.to_string(),
        })?;

        let job_id = format!(
            "taxi_star_etl_{}_{}",
            table.table,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        let metadata = load_job(table, &payload.schema, disposition, &job_id);

        let mut url = self.url(
            &self.upload_base,
            &format!("/projects/{}/jobs", table.project),
        )?;
        url.query_pairs_mut().append_pair("uploadType", "multipart");

        let req = build_request(
            Method::POST,
            url,
            Some((MULTIPART_CONTENT_TYPE, multipart_body(&metadata, &data))),
        );

        debug!(table = %name, job_id = %job_id, bytes = data.len(), "Submitting load job");
        let resp = send(&self.http, req)
            .await
            .map_err(|source| LoadError::Http {
                table: name.clone(),
                source,
            })?;
        if !resp.status.is_success() {
            return Err(rejected(&name, attempted, &resp));
        }

        let mut job = resp.json();
        if job["jobReference"].is_null() {
            return Err(malformed_job(&name, attempted, &resp));
        }
        let location = job["jobReference"]["location"].as_str().map(str::to_string);
        let started = Instant::now();

        loop {
            match JobState::from_job(&job) {
                JobState::Done { output_rows } => {
                    return Ok(output_rows.unwrap_or(attempted as u64));
                }
                JobState::Failed { message } => {
                    return Err(LoadError::Rejected {
                        table: name,
                        attempted,
                        message,
                    });
                }
                JobState::Pending => {}
            }

            if self.token_deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(LoadError::TokenExpired {
                    table: name,
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            if started.elapsed() >= self.job_timeout {
                return Err(LoadError::Timeout {
                    table: name,
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
            job = self
                .get_job(&table.project, &job_id, location.as_deref(), &name)
                .await?;
        }
    }

    async fn insert_rows(
        &self,
        table: &TableRef,
        _schema: &[Field],
        rows: &[Value],
    ) -> Result<Vec<RowRejection>, LoadError> {
        let name = table.to_string();
        let url = self.url(
            &self.api_base,
            &format!(
                "/projects/{}/datasets/{}/tables/{}/insertAll",
                table.project, table.dataset, table.table
            ),
        )?;
        let body = insert_all_request(rows);
        let resp = self.call(&name, Method::POST, url, Some(&body)).await?;

        if !resp.status.is_success() {
            return Err(rejected(&name, rows.len(), &resp));
        }
        Ok(insert_errors(&resp.json()))
    }

    async fn table_info(&self, table: &TableRef) -> Result<TableInfo, LoadError> {
        let name = table.to_string();
        let url = self.url(
            &self.api_base,
            &format!(
                "/projects/{}/datasets/{}/tables/{}",
                table.project, table.dataset, table.table
            ),
        )?;
        let resp = self.call(&name, Method::GET, url, None).await?;
        if !resp.status.is_success() {
            return Err(rejected(&name, 0, &resp));
        }

        let body = resp.json();
        Ok(TableInfo {
            num_rows: body["numRows"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            num_columns: body["schema"]["fields"]
                .as_array()
                .map(Vec::len)
                .unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::FieldType;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records every request.
    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<(u16, String)>>,
        seen: Mutex<Vec<(Method, String, String)>>,
    }

    impl Scripted {
        fn reply(self, status: u16, body: Value) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push_back((status, body.to_string()));
            self
        }

        fn seen(&self) -> Vec<(Method, String, String)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for Scripted {
        async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            let body = req
                .body()
                .and_then(|b| b.as_bytes())
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            self.seen
                .lock()
                .unwrap()
                .push((req.method().clone(), req.url().to_string(), body));

            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected request");
            let resp = http::Response::builder()
                .status(status)
                .body(body)
                .unwrap();
            Ok(reqwest::Response::from(resp))
        }
    }

    fn dataset() -> DatasetRef {
        DatasetRef {
            project: "proj".into(),
            dataset: "taxi".into(),
            location: "EU".into(),
        }
    }

    fn payload() -> TablePayload {
        TablePayload {
            name: "dim_vendor".into(),
            schema: vec![Field::required("vendor_key", FieldType::Integer)],
            rows: vec![json!({"vendor_key": 1}), json!({"vendor_key": 2})],
        }
    }

    fn client(http: Scripted) -> BigQueryClient<Scripted> {
        BigQueryClient::new(http).with_job_polling(Duration::ZERO, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_existing_dataset_is_left_alone() {
        let bq = client(Scripted::default().reply(200, json!({"id": "proj:taxi"})));
        bq.ensure_dataset(&dataset()).await.unwrap();

        let seen = bq.http.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, Method::GET);
        assert!(seen[0].1.ends_with("/projects/proj/datasets/taxi"));
    }

    #[tokio::test]
    async fn test_missing_dataset_is_created_in_location() {
        let bq = client(
            Scripted::default()
                .reply(404, json!({"error": {"message": "Not found"}}))
                .reply(200, json!({})),
        );
        bq.ensure_dataset(&dataset()).await.unwrap();

        let seen = bq.http.seen();
        assert_eq!(seen[1].0, Method::POST);
        let body: Value = serde_json::from_str(&seen[1].2).unwrap();
        assert_eq!(body["location"], "EU");
        assert_eq!(body["datasetReference"]["datasetId"], "taxi");
    }

    #[tokio::test]
    async fn test_existing_table_is_not_an_error() {
        let bq = client(Scripted::default().reply(409, json!({"error": {"message": "Already Exists"}})));
        let table = dataset().table("dim_vendor");
        bq.create_table_if_absent(&table, &payload().schema)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_batch_load_polls_until_done() {
        let bq = client(
            Scripted::default()
                .reply(
                    200,
                    json!({"jobReference": {"location": "EU"}, "status": {"state": "RUNNING"}}),
                )
                .reply(200, json!({"status": {"state": "RUNNING"}}))
                .reply(
                    200,
                    json!({"status": {"state": "DONE"}, "statistics": {"load": {"outputRows": "2"}}}),
                ),
        );
        let table = dataset().table("dim_vendor");
        let written = bq
            .load_batch(&table, &payload(), WriteDisposition::Replace)
            .await
            .unwrap();

        assert_eq!(written, 2);
        let seen = bq.http.seen();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].1.contains("/upload/bigquery/v2/projects/proj/jobs?uploadType=multipart"));
        assert!(seen[0].2.contains("WRITE_TRUNCATE"));
        assert!(seen[0].2.contains("{\"vendor_key\":1}\n{\"vendor_key\":2}\n"));
        assert!(seen[1].1.contains("location=EU"));
    }

    #[tokio::test]
    async fn test_failed_job_is_rejected_with_counts() {
        let bq = client(Scripted::default().reply(
            200,
            json!({
                "jobReference": {"jobId": "j1", "location": "EU"},
                "status": {"state": "DONE", "errorResult": {"message": "Invalid schema"}}
            }),
        ));
        let table = dataset().table("dim_vendor");
        let err = bq
            .load_batch(&table, &payload(), WriteDisposition::Fail)
            .await
            .unwrap_err();

        match err {
            LoadError::Rejected {
                table,
                attempted,
                message,
            } => {
                assert_eq!(table, "proj.taxi.dim_vendor");
                assert_eq!(attempted, 2);
                assert_eq!(message, "Invalid schema");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparsable_job_response_is_rejected() {
        let http = Scripted::default();
        http.responses
            .lock()
            .unwrap()
            .push_back((200, "<html>proxy error</html>".to_string()));
        let bq = client(http);
        let table = dataset().table("dim_vendor");
        let err = bq
            .load_batch(&table, &payload(), WriteDisposition::Replace)
            .await
            .unwrap_err();

        match err {
            LoadError::Rejected { message, .. } => assert!(message.contains("proxy error")),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(bq.http.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_polled_job_without_status_is_rejected() {
        let bq = client(
            Scripted::default()
                .reply(
                    200,
                    json!({"jobReference": {"location": "EU"}, "status": {"state": "PENDING"}}),
                )
                .reply(200, json!({})),
        );
        let table = dataset().table("dim_vendor");
        let err = bq
            .load_batch(&table, &payload(), WriteDisposition::Replace)
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_polling_stops_when_token_lapses() {
        let bq = client(Scripted::default().reply(
            200,
            json!({"jobReference": {"location": "EU"}, "status": {"state": "RUNNING"}}),
        ))
        .with_token_deadline(Instant::now());
        let table = dataset().table("dim_vendor");
        let err = bq
            .load_batch(&table, &payload(), WriteDisposition::Replace)
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::TokenExpired { .. }));
        // No poll was sent with the lapsed token.
        assert_eq!(bq.http.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_rows_reports_rejections() {
        let bq = client(Scripted::default().reply(
            200,
            json!({"insertErrors": [{"index": 1, "errors": [{"reason": "invalid", "message": "bad"}]}]}),
        ));
        let table = dataset().table("dim_vendor");
        let p = payload();
        let rejected = bq.insert_rows(&table, &p.schema, &p.rows).await.unwrap();

        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].index, 1);
        let seen = bq.http.seen();
        assert!(seen[0].1.ends_with("/tables/dim_vendor/insertAll"));
    }

    #[tokio::test]
    async fn test_table_info_reads_counts() {
        let bq = client(Scripted::default().reply(
            200,
            json!({"numRows": "7", "schema": {"fields": [{"name": "a"}, {"name": "b"}]}}),
        ));
        let info = bq.table_info(&dataset().table("dim_vendor")).await.unwrap();
        assert_eq!(
            info,
            TableInfo {
                num_rows: 7,
                num_columns: 2
            }
        );
    }

    #[tokio::test]
    async fn test_http_error_surfaces_message() {
        let bq = client(Scripted::default().reply(
            403,
            json!({"error": {"message": "Access Denied: Dataset proj:taxi"}}),
        ));
        let err = bq.ensure_dataset(&dataset()).await.unwrap_err();
        assert!(err.to_string().contains("Access Denied"));
    }
}
