use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::fmt::Debug;
use tracing::{debug, instrument, warn};

use crate::{config::WeatherApiConfig, error::WeatherError};

/// Number of days requested from the provider: today and tomorrow.
pub const FORECAST_DAYS: &str = "2";

/// A JSON-over-HTTP API that only treats `200 OK` as success.
#[async_trait]
pub trait ApiConnector: Send + Sync + Debug {
    async fn perform_request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        params: &[(&str, &str)],
    ) -> Result<Value, WeatherError>;
}

/// Anything that can hand out a raw forecast payload for `"lat,lon"`.
#[async_trait]
pub trait ForecastSource: Send + Sync + Debug {
    async fn fetch_forecast(&self, coordinates: &str) -> Result<Value, WeatherError>;
}

/// Plain reqwest-backed [`ApiConnector`] rooted at a base URL.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    base_url: String,
    http: Client,
}

impl HttpConnector {
    pub fn new(base_url: impl Into<String>, config: &WeatherApiConfig) -> Result<Self, WeatherError> {
        let http = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { base_url: base_url.into(), http })
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ApiConnector for HttpConnector {
    #[instrument(skip(self, body, params), fields(base_url = %self.base_url))]
    async fn perform_request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        params: &[(&str, &str)],
    ) -> Result<Value, WeatherError> {
        let mut request = self.http.request(method, self.url(endpoint)).query(params);
        if let Some(body) = body {
            request = request.json(body);
        }

        let res = request.send().await?;
        let status = res.status();
        let text = res.text().await?;

        if status != StatusCode::OK {
            warn!(%status, "Provider request failed");
            return Err(WeatherError::from_status(status, truncate_body(&text)));
        }

        debug!(bytes = text.len(), "Provider request succeeded");
        serde_json::from_str(&text)
            .map_err(|e| WeatherError::MalformedResponse(format!("body is not valid JSON: {e}")))
    }
}

/// Connector for the WeatherAPI.com `forecast.json` endpoint.
#[derive(Debug, Clone)]
pub struct WeatherApiConnector {
    http: HttpConnector,
    api_key: String,
}

impl WeatherApiConnector {
    pub fn new(config: &WeatherApiConfig) -> Result<Self, WeatherError> {
        Ok(Self {
            http: HttpConnector::new(config.base_url.clone(), config)?,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ForecastSource for WeatherApiConnector {
    async fn fetch_forecast(&self, coordinates: &str) -> Result<Value, WeatherError> {
        let params = [
            ("key", self.api_key.as_str()),
            ("q", coordinates),
            ("days", FORECAST_DAYS),
        ];
        self.http.perform_request(Method::GET, "forecast.json", None, &params).await
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() > MAX {
        format!("{}...", body.chars().take(MAX).collect::<String>())
    } else {
        body.to_string()
    }
}
