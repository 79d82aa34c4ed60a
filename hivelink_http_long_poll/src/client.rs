//! HTTP long-polling client implementation.
//!
//! [`LongPollClient`] wraps one endpoint call per method; the
//! [`SubscriptionManager`] in [`manager`] turns repeated polls into
//! continuous event streams.

mod manager;
mod poll_loop;

pub use manager::SubscriptionManager;

use std::collections::BTreeSet;
use std::time::Duration;

use hivelink_core::{
    CommandId, DeviceId, DeviceScope, Event, Timestamp, DEFAULT_WAIT_TIMEOUT_SECS,
};
use reqwest::{Client, StatusCode};
use url::Url;

use crate::{error::ClientError, REQUEST_TIMEOUT_GRACE_SECS};

/// Options for building a [`LongPollClient`].
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Server-side wait requested on every poll (seconds).
    pub wait_timeout_secs: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
        }
    }
}

/// A thin client over the long-poll HTTP surface.
#[derive(Debug, Clone)]
pub struct LongPollClient {
    http: Client,
    base_url: Url,
    wait: Duration,
}

impl LongPollClient {
    /// Create a client with default options.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: Url) -> Result<Self, ClientError> {
        Self::with_options(base_url, ClientOptions::default())
    }

    /// Create a client with custom options.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn with_options(base_url: Url, options: ClientOptions) -> Result<Self, ClientError> {
        let wait = Duration::from_secs(options.wait_timeout_secs);
        let http = Client::builder()
            .timeout(wait + Duration::from_secs(REQUEST_TIMEOUT_GRACE_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url,
            wait,
        })
    }

    /// The base URL of the server.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The wait requested on every poll.
    #[must_use]
    pub const fn wait(&self) -> Duration {
        self.wait
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))
    }

    fn apply_poll_query(
        url: &mut Url,
        wait: Duration,
        since: Option<Timestamp>,
        names: &BTreeSet<String>,
    ) {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("waitTimeout", &wait.as_secs().to_string());
        if let Some(since) = since {
            pairs.append_pair("timestamp", &since.as_millis().to_string());
        }
        if !names.is_empty() {
            let joined = names.iter().cloned().collect::<Vec<_>>().join(",");
            pairs.append_pair("names", &joined);
        }
    }

    async fn fail(response: reqwest::Response) -> ClientError {
        let status = response.status();
        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| body.get("error")?.as_str().map(ToString::to_string))
            .unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(message),
            StatusCode::BAD_REQUEST => ClientError::BadRequest(message),
            other => ClientError::UnexpectedStatus {
                status: other.as_u16(),
                message,
            },
        }
    }

    /// Poll for commands newer than `since`.
    ///
    /// A single-device scope uses the per-device endpoint; anything wider
    /// goes through `/device/command/poll`. An explicit scope naming no
    /// devices is rejected rather than widened to every device.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope is explicit but empty, the request
    /// fails, or any scoped device is unknown to the server.
    pub async fn poll_commands(
        &self,
        scope: &DeviceScope,
        names: &BTreeSet<String>,
        since: Option<Timestamp>,
    ) -> Result<Vec<Event>, ClientError> {
        let mut url = match scope {
            DeviceScope::Devices(devices) if devices.is_empty() => {
                return Err(ClientError::BadRequest(
                    "explicit device scope names no devices".to_string(),
                ));
            }
            DeviceScope::Devices(devices) if devices.len() == 1 => {
                let device = devices.iter().next().map(DeviceId::as_str).unwrap_or("");
                self.endpoint(&format!("/device/{device}/command/poll"))?
            }
            _ => self.endpoint("/device/command/poll")?,
        };
        Self::apply_poll_query(&mut url, self.wait, since, names);
        if let DeviceScope::Devices(devices) = scope {
            if devices.len() > 1 {
                let joined = devices
                    .iter()
                    .map(DeviceId::as_str)
                    .collect::<Vec<_>>()
                    .join(",");
                url.query_pairs_mut().append_pair("deviceGuids", &joined);
            }
        }

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        Ok(response.json().await?)
    }

    /// Poll for notifications from one device newer than `since`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the device is unknown.
    pub async fn poll_notifications(
        &self,
        device: &DeviceId,
        names: &BTreeSet<String>,
        since: Option<Timestamp>,
    ) -> Result<Vec<Event>, ClientError> {
        let mut url = self.endpoint(&format!("/device/{device}/notification/poll"))?;
        Self::apply_poll_query(&mut url, self.wait, since, names);

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        Ok(response.json().await?)
    }

    /// Poll for the update of a single command. `None` means the wait
    /// elapsed without one.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the device or command is
    /// unknown.
    pub async fn poll_command_update(
        &self,
        device: &DeviceId,
        command: CommandId,
    ) -> Result<Option<Event>, ClientError> {
        let mut url = self.endpoint(&format!("/device/{device}/command/{command}/poll"))?;
        url.query_pairs_mut()
            .append_pair("waitTimeout", &self.wait.as_secs().to_string());

        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        Ok(Some(response.json().await?))
    }

    /// Create a command for a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the device is unknown.
    pub async fn create_command(
        &self,
        device: &DeviceId,
        name: &str,
        parameters: serde_json::Value,
    ) -> Result<Event, ClientError> {
        let url = self.endpoint(&format!("/device/{device}/command"))?;
        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({ "name": name, "parameters": parameters }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        Ok(response.json().await?)
    }

    /// Report the outcome of a command.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the device or command is
    /// unknown.
    pub async fn update_command(
        &self,
        device: &DeviceId,
        command: CommandId,
        payload: serde_json::Value,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&format!("/device/{device}/command/{command}"))?;
        let response = self.http.put(url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        Ok(())
    }

    /// Post a notification from a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the device is unknown.
    pub async fn create_notification(
        &self,
        device: &DeviceId,
        name: &str,
        parameters: serde_json::Value,
    ) -> Result<Event, ClientError> {
        let url = self.endpoint(&format!("/device/{device}/notification"))?;
        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({ "name": name, "parameters": parameters }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_use_standard_wait() {
        assert_eq!(
            ClientOptions::default().wait_timeout_secs,
            DEFAULT_WAIT_TIMEOUT_SECS
        );
    }

    #[tokio::test]
    async fn empty_explicit_scope_is_rejected_before_sending() {
        let client =
            LongPollClient::new(Url::parse("http://127.0.0.1:1/").expect("url")).expect("client");
        let result = client
            .poll_commands(
                &DeviceScope::Devices(BTreeSet::new()),
                &BTreeSet::new(),
                None,
            )
            .await;
        assert!(matches!(result, Err(ClientError::BadRequest(_))));
    }

    #[test]
    fn poll_query_encodes_cursor_and_names() {
        let mut url = Url::parse("http://localhost/device/dev1/command/poll").expect("url");
        let names: BTreeSet<String> = ["reboot".to_string()].into();
        LongPollClient::apply_poll_query(
            &mut url,
            Duration::from_secs(30),
            Some(Timestamp::from_millis(1_000)),
            &names,
        );
        let query = url.query().expect("query");
        assert!(query.contains("waitTimeout=30"));
        assert!(query.contains("timestamp=1000"));
        assert!(query.contains("names=reboot"));
    }
}
