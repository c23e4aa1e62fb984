use async_trait::async_trait;
use reqwest::{header::{HeaderMap, HeaderValue, USER_AGENT}, redirect::Policy};
use std::collections::BTreeMap;
use tracing::debug;

use super::{ActuationError, ActuationGateway};
use crate::config::{ActuationConfig, LoadsConfig};
use crate::domain::LoadId;

/// Blynk external-API client writing virtual pins
#[derive(Clone)]
pub struct BlynkGateway {
    base_url: String,
    token: String,
    pins: BTreeMap<LoadId, (String, Option<String>)>,
    client: reqwest::Client,
}

impl BlynkGateway {
    pub fn new(cfg: &ActuationConfig, loads: &LoadsConfig) -> Result<Self, ActuationError> {
        if cfg.auth_token.is_empty() {
            return Err(ActuationError::NotConfigured);
        }
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("solar-telemetry-hub/0.2"));
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .redirect(Policy::limited(cfg.max_redirects))
            .default_headers(headers)
            .build()?;
        let pins = loads
            .0
            .iter()
            .map(|(id, l)| (*id, (l.pin.clone(), l.status_pin.clone())))
            .collect();
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token: cfg.auth_token.clone(),
            pins,
            client,
        })
    }
}

#[async_trait]
impl ActuationGateway for BlynkGateway {
    async fn write(&self, load: LoadId, on: bool) -> Result<(), ActuationError> {
        let (pin, _) = self.pins.get(&load).ok_or(ActuationError::UnknownPin(load))?;
        let value = if on { "1" } else { "0" };
        let resp = self
            .client
            .get(format!("{}/update", self.base_url))
            .query(&[("token", self.token.as_str()), (pin.as_str(), value)])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ActuationError::Rejected(status.as_u16()));
        }
        debug!(%load, pin = %pin, on, "pin write acknowledged");
        Ok(())
    }

    async fn read(&self, load: LoadId) -> Result<Option<bool>, ActuationError> {
        let Some((_, Some(pin))) = self.pins.get(&load) else {
            return Ok(None);
        };
        let resp = self
            .client
            .get(format!("{}/get", self.base_url))
            .query(&[("token", self.token.as_str()), (pin.as_str(), "")])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ActuationError::Rejected(status.as_u16()));
        }
        let body = resp.text().await?;
        Ok(Some(body.trim().trim_matches(|c| c == '[' || c == ']' || c == '"') == "1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(base_url: String) -> BlynkGateway {
        let cfg = ActuationConfig {
            base_url,
            auth_token: "TOKEN".into(),
            ..Default::default()
        };
        BlynkGateway::new(&cfg, &LoadsConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_write_sets_configured_pin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/update"))
            .and(query_param("token", "TOKEN"))
            .and(query_param("V32", "1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        gateway(server.uri()).write(LoadId::Pump, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_follows_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/update"))
            .respond_with(
                ResponseTemplate::new(307).insert_header("Location", format!("{}/regional/update?token=TOKEN&V30=0", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/regional/update"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        gateway(server.uri()).write(LoadId::Light, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_rejection_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let err = gateway(server.uri()).write(LoadId::Fan, true).await.unwrap_err();
        assert!(matches!(err, ActuationError::Rejected(400)));
    }

    #[tokio::test]
    async fn test_read_parses_bracketed_value() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get"))
            .and(query_param("V2", ""))
            .respond_with(ResponseTemplate::new(200).set_body_string("[\"1\"]"))
            .mount(&server)
            .await;

        assert_eq!(gateway(server.uri()).read(LoadId::Pump).await.unwrap(), Some(true));
    }

    #[test]
    fn test_requires_token() {
        let cfg = ActuationConfig::default();
        assert!(matches!(
            BlynkGateway::new(&cfg, &LoadsConfig::default()),
            Err(ActuationError::NotConfigured)
        ));
    }
}
