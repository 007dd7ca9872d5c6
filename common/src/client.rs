//! Thin typed HTTP clients over the HAL and State Machine network surfaces,
//! for intra-cluster use (dashboards, the monitor aggregator, other tools).
//! Mirrors `fridgeos.hal.HALClient` / `fridgeos.statemachine.StateMachineClient`
//! in the original Python implementation.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not reach {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .expect("reqwest client configuration is static and always valid")
}

async fn request_json<T: for<'de> Deserialize<'de>>(
    client: &reqwest::Client,
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<T, ClientError> {
    let response = request
        .send()
        .await
        .map_err(|source| ClientError::Connect {
            url: url.to_string(),
            source,
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            url: url.to_string(),
            status,
            body,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|source| ClientError::Decode {
            url: url.to_string(),
            source,
        })
}

#[derive(Debug, Serialize)]
struct HeaterValueRequest {
    value: f64,
}

/// Client for the HAL's HTTP surface.
#[derive(Clone)]
pub struct HalClient {
    base_url: String,
    http: reqwest::Client,
}

impl HalClient {
    pub fn new(host: &str, port: u16) -> Self {
        HalClient {
            base_url: format!("http://{host}:{port}"),
            http: build_http_client(),
        }
    }

    pub async fn get_temperatures(&self) -> Result<HashMap<String, Option<f64>>, ClientError> {
        let url = format!("{}/temperatures", self.base_url);
        request_json(&self.http, self.http.get(&url), &url).await
    }

    pub async fn get_temperature(&self, name: &str) -> Result<Option<f64>, ClientError> {
        let url = format!("{}/temperature/{}", self.base_url, name);
        let result: HashMap<String, Option<f64>> =
            request_json(&self.http, self.http.get(&url), &url).await?;
        Ok(result.get(name).copied().flatten())
    }

    pub async fn set_heater_value(&self, name: &str, value: f64) -> Result<f64, ClientError> {
        let url = format!("{}/heater/{}/value", self.base_url, name);
        let body = HeaterValueRequest { value };
        let result: HashMap<String, f64> =
            request_json(&self.http, self.http.put(&url).json(&body), &url).await?;
        Ok(result.get(name).copied().unwrap_or(value))
    }

    pub async fn get_heater_values(&self) -> Result<HashMap<String, f64>, ClientError> {
        let url = format!("{}/heaters/values", self.base_url);
        request_json(&self.http, self.http.get(&url), &url).await
    }

    pub async fn get_heater_value(&self, name: &str) -> Result<f64, ClientError> {
        let url = format!("{}/heater/{}/value", self.base_url, name);
        let result: HashMap<String, f64> =
            request_json(&self.http, self.http.get(&url), &url).await?;
        Ok(*result.get(name).unwrap_or(&0.0))
    }

    pub async fn get_heater_max_values(&self) -> Result<HashMap<String, f64>, ClientError> {
        let url = format!("{}/heaters/max_values", self.base_url);
        request_json(&self.http, self.http.get(&url), &url).await
    }

    pub async fn health_check(&self) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/health", self.base_url);
        request_json(&self.http, self.http.get(&url), &url).await
    }
}

#[derive(Debug, Serialize)]
struct StateChangeRequest<'a> {
    state: &'a str,
    password: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CurrentStateResponse {
    current_state: String,
}

/// Client for the State Machine's HTTP surface.
#[derive(Clone)]
pub struct StateMachineClient {
    base_url: String,
    http: reqwest::Client,
}

impl StateMachineClient {
    pub fn new(host: &str, port: u16) -> Self {
        StateMachineClient {
            base_url: format!("http://{host}:{port}"),
            http: build_http_client(),
        }
    }

    pub async fn get_state(&self) -> Result<String, ClientError> {
        let url = format!("{}/state", self.base_url);
        let result: CurrentStateResponse = request_json(&self.http, self.http.get(&url), &url).await?;
        Ok(result.current_state)
    }

    pub async fn set_state(
        &self,
        state: &str,
        password: Option<&str>,
    ) -> Result<(), ClientError> {
        let url = format!("{}/state", self.base_url);
        let body = StateChangeRequest { state, password };
        let _: serde_json::Value =
            request_json(&self.http, self.http.put(&url).json(&body), &url).await?;
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), ClientError> {
        let url = format!("{}/pause", self.base_url);
        let _: serde_json::Value = request_json(&self.http, self.http.post(&url), &url).await?;
        Ok(())
    }

    pub async fn resume(&self, target_state: Option<&str>) -> Result<(), ClientError> {
        let url = format!("{}/resume", self.base_url);
        let body = serde_json::json!({ "target_state": target_state });
        let _: serde_json::Value =
            request_json(&self.http, self.http.post(&url).json(&body), &url).await?;
        Ok(())
    }

    pub async fn get_temperatures(&self) -> Result<HashMap<String, Option<f64>>, ClientError> {
        let url = format!("{}/temperatures", self.base_url);
        request_json(&self.http, self.http.get(&url), &url).await
    }

    pub async fn get_heaters(&self) -> Result<HashMap<String, f64>, ClientError> {
        let url = format!("{}/heaters", self.base_url);
        request_json(&self.http, self.http.get(&url), &url).await
    }
}
