//! Qlue feed contract: wire schema, page parsing, and page sources.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qlue_core::{GeoPoint, Report};
use qlue_storage::{FetchError, HttpFetcher};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "qlue-adapters";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Transport(#[from] FetchError),
    #[error("response body is not valid JSON: {0}")]
    InvalidBody(#[source] serde_json::Error),
    #[error("response has no results")]
    NoResults,
    #[error("malformed result list: {0}")]
    MalformedResults(String),
    #[error("reading fixture {path}: {source}")]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One page of the feed, newest contribution first.
#[async_trait]
pub trait FeedSource: Send + Sync {
    fn source_id(&self) -> &str;

    /// Pages are 1-based; higher pages hold older contributions.
    async fn fetch_page(&self, page: u32) -> Result<Vec<Report>, FeedError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireContribution {
    contribution_id: i64,
    date: WireDates,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    files: Option<WireFiles>,
    location: WireLocation,
    user: WireUser,
}

#[derive(Debug, Clone, Deserialize)]
struct WireDates {
    create: WireSeconds,
    #[serde(default)]
    update: Option<WireSeconds>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct WireSeconds {
    sec: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WireFiles {
    #[serde(default)]
    photo: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireLocation {
    geospatial: WireGeospatial,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct WireGeospatial {
    longitude: f64,
    latitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct WireUser {
    creator: WireCreator,
}

#[derive(Debug, Clone, Deserialize)]
struct WireCreator {
    id: JsonValue,
}

fn timestamp(sec: i64, contribution_id: i64) -> Result<DateTime<Utc>, FeedError> {
    DateTime::from_timestamp(sec, 0).ok_or_else(|| {
        FeedError::MalformedResults(format!(
            "contribution {contribution_id} has out-of-range timestamp {sec}"
        ))
    })
}

fn author_token(id: &JsonValue, contribution_id: i64) -> Result<String, FeedError> {
    match id {
        JsonValue::String(s) if !s.is_empty() => Ok(s.clone()),
        JsonValue::Number(n) => Ok(n.to_string()),
        other => Err(FeedError::MalformedResults(format!(
            "contribution {contribution_id} has unusable creator id {other}"
        ))),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn wire_to_report(wire: WireContribution) -> Result<Report, FeedError> {
    let id = wire.contribution_id;
    Ok(Report {
        id,
        created_at: timestamp(wire.date.create.sec, id)?,
        updated_at: wire
            .date
            .update
            .map(|u| timestamp(u.sec, id))
            .transpose()?,
        content: wire.content.unwrap_or_default(),
        title: wire.title.unwrap_or_default(),
        photo: non_empty(wire.files.unwrap_or_default().photo),
        location: GeoPoint::new(wire.location.geospatial.longitude, wire.location.geospatial.latitude),
        author: author_token(&wire.user.creator.id, id)?,
    })
}

/// Parses one response body. A missing, null, or empty `result` list is end-of-data.
pub fn parse_feed_page(body: &[u8]) -> Result<Vec<Report>, FeedError> {
    let envelope: JsonValue = serde_json::from_slice(body).map_err(FeedError::InvalidBody)?;
    let results = match envelope.get("result") {
        None | Some(JsonValue::Null) => return Err(FeedError::NoResults),
        Some(JsonValue::Array(items)) if items.is_empty() => return Err(FeedError::NoResults),
        Some(JsonValue::Array(items)) => items,
        Some(other) => {
            return Err(FeedError::MalformedResults(format!(
                "expected `result` to be a list, found {}",
                json_kind(other)
            )))
        }
    };

    results
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let wire: WireContribution = serde_json::from_value(item.clone()).map_err(|e| {
                FeedError::MalformedResults(format!("result[{index}]: {e}"))
            })?;
            wire_to_report(wire)
        })
        .collect()
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "an object",
    }
}

/// Live feed over HTTP; the page number is sent as the `page` query parameter.
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    http: HttpFetcher,
    service_url: String,
}

impl HttpFeedSource {
    pub fn new(http: HttpFetcher, service_url: impl Into<String>) -> Self {
        Self {
            http,
            service_url: service_url.into(),
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    fn source_id(&self) -> &str {
        "qlue"
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<Report>, FeedError> {
        let response = self
            .http
            .fetch_bytes(&self.service_url, &[("page", page.to_string())])
            .await?;
        debug!(
            page,
            status = %response.status,
            url = %response.final_url,
            bytes = response.body.len(),
            "fetched feed page"
        );
        parse_feed_page(&response.body)
    }
}

/// Serves `page_<n>.json` files from a directory; a missing page is end-of-data.
#[derive(Debug, Clone)]
pub struct FixtureFeedSource {
    dir: PathBuf,
}

impl FixtureFeedSource {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn page_path(&self, page: u32) -> PathBuf {
        self.dir.join(format!("page_{page}.json"))
    }
}

#[async_trait]
impl FeedSource for FixtureFeedSource {
    fn source_id(&self) -> &str {
        "qlue-fixtures"
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<Report>, FeedError> {
        let path = self.page_path(page);
        let body = match std::fs::read(&path) {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(FeedError::NoResults)
            }
            Err(source) => return Err(FeedError::Fixture { path, source }),
        };
        parse_feed_page(&body)
    }
}

/// Pre-recorded page responses served in call order, whatever page is asked for.
/// Once the script runs out every request is end-of-data.
#[derive(Debug, Default)]
pub struct ScriptedFeedSource {
    responses: Mutex<VecDeque<Result<Vec<Report>, FeedError>>>,
    requested: Mutex<Vec<u32>>,
}

impl ScriptedFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, reports: Vec<Report>) -> Self {
        self.push(Ok(reports));
        self
    }

    pub fn with_error(self, error: FeedError) -> Self {
        self.push(Err(error));
        self
    }

    pub fn push(&self, response: Result<Vec<Report>, FeedError>) {
        lock(&self.responses).push_back(response);
    }

    /// Page numbers requested so far, in order.
    pub fn requested_pages(&self) -> Vec<u32> {
        lock(&self.requested).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl FeedSource for ScriptedFeedSource {
    fn source_id(&self) -> &str {
        "qlue-scripted"
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<Report>, FeedError> {
        lock(&self.requested).push(page);
        lock(&self.responses)
            .pop_front()
            .unwrap_or(Err(FeedError::NoResults))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ONE_RESULT: &str = r#"{
        "result": [{
            "contributionId": 88231,
            "date": {"create": {"sec": 1772352000}, "update": {"sec": 1772352600}},
            "content": "Air masuk rumah",
            "title": "Banjir Kemang",
            "url": "https://qlue.example/c/88231",
            "files": {"photo": "https:\\/\\/cdn.example\\/p\\/88231.jpg"},
            "location": {"geospatial": {"longitude": 106.8136, "latitude": -6.2607}},
            "user": {"creator": {"id": "u-5521"}}
        }]
    }"#;

    #[test]
    fn parses_canonical_contribution() {
        let reports = parse_feed_page(ONE_RESULT.as_bytes()).unwrap();
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.id, 88231);
        assert_eq!(
            report.created_at,
            Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).single().unwrap()
        );
        assert_eq!(
            report.updated_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 8, 10, 0).single().unwrap())
        );
        assert_eq!(report.title, "Banjir Kemang");
        assert_eq!(report.location, GeoPoint::new(106.8136, -6.2607));
        assert_eq!(report.author, "u-5521");
        // Double-escaped slashes survive JSON decoding; the persister strips them.
        assert_eq!(report.photo.as_deref(), Some(r"https:\/\/cdn.example\/p\/88231.jpg"));
    }

    #[test]
    fn optional_fields_default() {
        let body = r#"{"result": [{
            "contributionId": 7,
            "date": {"create": {"sec": 1772352000}},
            "files": {"photo": null},
            "url": "",
            "location": {"geospatial": {"longitude": 0, "latitude": 0}},
            "user": {"creator": {"id": 991}}
        }]}"#;
        let reports = parse_feed_page(body.as_bytes()).unwrap();
        assert_eq!(reports[0].content, "");
        assert_eq!(reports[0].photo, None);
        assert_eq!(reports[0].updated_at, None);
        assert_eq!(reports[0].author, "991");
        assert!(!reports[0].has_location());
    }

    #[test]
    fn missing_or_empty_result_is_end_of_data() {
        assert!(matches!(parse_feed_page(b"{}"), Err(FeedError::NoResults)));
        assert!(matches!(parse_feed_page(br#"{"result": null}"#), Err(FeedError::NoResults)));
        assert!(matches!(parse_feed_page(br#"{"result": []}"#), Err(FeedError::NoResults)));
    }

    #[test]
    fn invalid_json_is_invalid_body() {
        assert!(matches!(
            parse_feed_page(b"<html>502 Bad Gateway</html>"),
            Err(FeedError::InvalidBody(_))
        ));
    }

    #[test]
    fn malformed_result_list_is_rejected() {
        let not_a_list = parse_feed_page(br#"{"result": {"contributionId": 1}}"#).unwrap_err();
        assert!(not_a_list.to_string().contains("found an object"));

        let missing_id = parse_feed_page(
            br#"{"result": [{"date": {"create": {"sec": 1}}, "location": {"geospatial": {"longitude": 1, "latitude": 1}}, "user": {"creator": {"id": "a"}}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(missing_id, FeedError::MalformedResults(ref m) if m.contains("result[0]")));

        let bad_author = parse_feed_page(
            br#"{"result": [{"contributionId": 3, "date": {"create": {"sec": 1}}, "location": {"geospatial": {"longitude": 1, "latitude": 1}}, "user": {"creator": {"id": null}}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(bad_author, FeedError::MalformedResults(_)));
    }

    #[tokio::test]
    async fn fixture_source_missing_page_is_end_of_data() {
        let source = FixtureFeedSource::from_dir("/nonexistent/qlue-fixtures");
        assert!(matches!(source.fetch_page(1).await, Err(FeedError::NoResults)));
        assert!(source.page_path(3).ends_with("page_3.json"));
    }
}
