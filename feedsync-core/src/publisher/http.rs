use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;
use url::Url;

use super::Publisher;
use super::protocol::{
    Command, CreateEvent, DeleteEvent, ListGroups, PublisherCommand, Request, Response,
};
use crate::config::PublisherConfig;
use crate::error::{FeedSyncError, FeedSyncResult};
use crate::materialized::RemoteEventRef;
use crate::metadata::PublishedEvent;
use crate::source::GroupId;

/// Publisher reached over HTTP. Every command is POSTed to one endpoint.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    http: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
    timeout: Duration,
}

impl HttpPublisher {
    pub fn new(endpoint: Url, token: Option<String>, timeout: Duration) -> FeedSyncResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("feedsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedSyncError::Publisher(format!("Failed to build HTTP client: {e}")))?;

        Ok(HttpPublisher {
            http,
            endpoint,
            token,
            timeout,
        })
    }

    pub fn from_config(config: &PublisherConfig) -> FeedSyncResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| FeedSyncError::Config("publisher.url is not set".into()))?;
        let endpoint = Url::parse(url)
            .map_err(|e| FeedSyncError::Config(format!("Invalid publisher.url '{url}': {e}")))?;

        Self::new(endpoint, config.token.clone(), config.timeout)
    }

    /// Send a typed command; the response type comes from the command.
    pub async fn call<C: PublisherCommand>(&self, cmd: C) -> FeedSyncResult<C::Response> {
        timeout(self.timeout, self.call_raw(C::command(), cmd))
            .await
            .map_err(|_| FeedSyncError::PublisherTimeout(self.timeout.as_secs()))?
    }

    async fn call_raw<P: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        command: Command,
        params: P,
    ) -> FeedSyncResult<R> {
        let params =
            serde_json::to_value(params).map_err(|e| FeedSyncError::Serialization(e.to_string()))?;
        let request = Request { command, params };

        let mut builder = self.http.post(self.endpoint.clone()).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| FeedSyncError::Publisher(format!("Failed to reach publisher: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| FeedSyncError::Publisher(format!("Failed to read response: {e}")))?;

        // Error payloads may come with any status code
        match serde_json::from_str::<Response<R>>(&body) {
            Ok(response) => response.into_result().map_err(FeedSyncError::Publisher),
            Err(_) if !status.is_success() => Err(FeedSyncError::Publisher(format!(
                "Publisher returned HTTP {status}"
            ))),
            Err(e) => Err(FeedSyncError::Publisher(format!(
                "Failed to parse response: {e}"
            ))),
        }
    }
}

#[async_trait::async_trait]
impl Publisher for HttpPublisher {
    async fn list_groups(&self) -> FeedSyncResult<Vec<GroupId>> {
        let groups = self.call(ListGroups {}).await?;
        Ok(groups.into_iter().map(|g| g.id).collect())
    }

    async fn create_event(&self, event: &PublishedEvent) -> FeedSyncResult<RemoteEventRef> {
        self.call(CreateEvent { event }).await
    }

    async fn delete_event(&self, remote: &RemoteEventRef) -> FeedSyncResult<()> {
        self.call(DeleteEvent { remote }).await?;
        Ok(())
    }
}
