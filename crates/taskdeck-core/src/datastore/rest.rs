use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::{ChangeEvent, ChangeFeed, ChangeKind, RemoteStore};
use crate::error::RemoteError;
use crate::task::{NewTask, Task, TaskId, TaskPatch};

const PREFER: &str = "prefer";
const RETURN_REPRESENTATION: &str = "return=representation";

#[derive(Debug, Clone)]
pub struct RestSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub table: String,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

/// Client for a PostgREST-compatible task table.
///
/// The change feed polls the table and reports an update whenever the set
/// of ids or their `updated_at` stamps differ from the previous poll.
#[derive(Debug, Clone)]
pub struct RestRemote {
    client: Client,
    table_url: Url,
    poll_interval: Duration,
}

impl RestRemote {
    #[instrument(skip(settings), fields(url = %settings.url, table = %settings.table))]
    pub fn new(settings: &RestSettings) -> anyhow::Result<Self> {
        let table_url = table_url(&settings.url, &settings.table)?;

        let mut headers = HeaderMap::new();
        if let Some(key) = settings.api_key.as_deref().filter(|key| !key.trim().is_empty()) {
            headers.insert(
                HeaderName::from_static("apikey"),
                HeaderValue::from_str(key).context("api key is not a valid header value")?,
            );
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .context("api key is not a valid header value")?,
            );
        } else {
            warn!("no api key configured; requests are sent anonymously");
        }

        let client = Client::builder()
            .timeout(settings.timeout)
            .default_headers(headers)
            .build()
            .context("failed building HTTP client for task datastore")?;

        info!(table_url = %table_url, "configured REST task datastore");
        Ok(Self {
            client,
            table_url,
            poll_interval: settings.poll_interval,
        })
    }

    fn list_url(&self) -> Url {
        let mut url = self.table_url.clone();
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("order", "created_at.desc");
        url
    }

    fn row_url(&self, id: &TaskId) -> Url {
        let mut url = self.table_url.clone();
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        url
    }

    async fn send_for_rows(&self, request: RequestBuilder) -> Result<Vec<Task>, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        decode_json(check_status(response).await?).await
    }

    async fn poll_changes(self, tx: mpsc::UnboundedSender<ChangeEvent>, baseline: Fingerprint) {
        let mut last = baseline;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if tx.is_closed() {
                debug!("change feed closed; stopping poller");
                return;
            }

            let rows = match self.fetch_all().await {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(error = %err, "failed polling task table for changes");
                    continue;
                }
            };

            let current = Fingerprint::of(&rows);
            if current == last {
                continue;
            }

            let kind = current.change_kind(&last);
            last = current;
            debug!(%kind, "detected task table change");
            if tx.send(ChangeEvent::new(kind, None)).is_err() {
                return;
            }
        }
    }
}

impl RemoteStore for RestRemote {
    #[instrument(skip(self))]
    async fn fetch_all(&self) -> Result<Vec<Task>, RemoteError> {
        let rows = self.send_for_rows(self.client.get(self.list_url())).await?;
        debug!(count = rows.len(), "fetched task rows");
        Ok(rows)
    }

    #[instrument(skip(self, task), fields(title_len = task.title.len()))]
    async fn insert(&self, task: &NewTask) -> Result<Task, RemoteError> {
        let request = self
            .client
            .post(self.table_url.clone())
            .header(PREFER, RETURN_REPRESENTATION)
            .json(task);
        self.send_for_rows(request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Decode("insert returned no row".to_string()))
    }

    #[instrument(skip(self, patch), fields(id = %id))]
    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<(), RemoteError> {
        let request = self
            .client
            .patch(self.row_url(id))
            .header(PREFER, RETURN_REPRESENTATION)
            .json(patch);
        let rows = self.send_for_rows(request).await?;
        if rows.is_empty() {
            return Err(RemoteError::NotFound(id.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn delete(&self, id: &TaskId) -> Result<(), RemoteError> {
        let request = self
            .client
            .delete(self.row_url(id))
            .header(PREFER, RETURN_REPRESENTATION);
        let rows = self.send_for_rows(request).await?;
        if rows.is_empty() {
            return Err(RemoteError::NotFound(id.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn subscribe(&self) -> Result<ChangeFeed, RemoteError> {
        let baseline = Fingerprint::of(&self.fetch_all().await?);
        let (tx, rx) = mpsc::unbounded_channel();
        let poller = tokio::spawn(self.clone().poll_changes(tx, baseline));
        info!(
            interval_ms = self.poll_interval.as_millis() as u64,
            "subscribed to task table changes"
        );
        Ok(ChangeFeed::with_producer(rx, poller))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint(Vec<(TaskId, DateTime<Utc>)>);

impl Fingerprint {
    fn of(rows: &[Task]) -> Self {
        let mut entries: Vec<_> = rows
            .iter()
            .map(|row| (row.id.clone(), row.updated_at))
            .collect();
        entries.sort();
        Self(entries)
    }

    fn change_kind(&self, previous: &Fingerprint) -> ChangeKind {
        match self.0.len().cmp(&previous.0.len()) {
            std::cmp::Ordering::Greater => ChangeKind::Insert,
            std::cmp::Ordering::Less => ChangeKind::Delete,
            std::cmp::Ordering::Equal => ChangeKind::Update,
        }
    }
}

fn table_url(base: &str, table: &str) -> anyhow::Result<Url> {
    let base = base.trim().trim_end_matches('/');
    if base.is_empty() {
        return Err(anyhow!("remote url is empty"));
    }
    let table = table.trim();
    if table.is_empty() || table.contains('/') {
        return Err(anyhow!("invalid table name: {table:?}"));
    }
    Url::parse(&format!("{base}/rest/v1/{table}"))
        .with_context(|| format!("invalid remote url: {base}"))
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %body, "remote request failed");
    Err(RemoteError::Http {
        status: status.as_u16(),
        body,
    })
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    response
        .json::<T>()
        .await
        .map_err(|err| RemoteError::Decode(err.to_string()))
}
