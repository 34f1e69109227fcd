//! HTTP transport backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use tessel_core::{ExchangeRequest, ExchangeResponse, TemplatePayload};
use tessel_settings::TransportSettings;
use tracing::{debug, instrument};

use crate::Transport;
use crate::errors::{Result, TransportError};

/// [`Transport`] that posts exchanges to a single endpoint.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    static_base_url: String,
}

impl HttpTransport {
    /// Build a transport from settings.
    pub fn new(settings: &TransportSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .user_agent(concat!("tessel/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            static_base_url: settings.static_base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// The exchange endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn read_body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait(?Send)]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, components = request.components.len()))]
    async fn exchange(&self, request: &ExchangeRequest) -> Result<ExchangeResponse> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;
        let body = Self::read_body(response).await?;
        let parsed: ExchangeResponse =
            serde_json::from_str(&body).map_err(TransportError::Malformed)?;
        if !parsed.has_marker() {
            return Err(TransportError::MissingMarker);
        }
        debug!(
            components = parsed.components.len(),
            templates = parsed.templates.len(),
            "exchange complete"
        );
        Ok(parsed)
    }

    #[instrument(skip(self))]
    async fn fetch_static_template(&self, component: &str) -> Result<TemplatePayload> {
        if self.static_base_url.is_empty() {
            return Err(TransportError::NoStaticLocation);
        }
        let url = format!("{}/{component}.json", self.static_base_url);
        let response = self.client.get(&url).send().await?;
        let body = Self::read_body(response).await?;
        serde_json::from_str(&body).map_err(TransportError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tessel_core::{ComponentRef, Mode, TemplateProbe};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(server: &MockServer) -> HttpTransport {
        HttpTransport::new(&TransportSettings {
            endpoint: format!("{}/tessel", server.uri()),
            static_base_url: format!("{}/static/", server.uri()),
            timeout_ms: 5_000,
        })
        .unwrap()
    }

    fn counter_request() -> ExchangeRequest {
        ExchangeRequest::new(
            vec![ComponentRef::new(Mode::Server, "counter", None, Default::default())],
            vec![TemplateProbe {
                component: "counter".into(),
                version: String::new(),
            }],
        )
    }

    #[tokio::test]
    async fn exchange_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tessel"))
            .and(body_partial_json(json!({"type": "request"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "response",
                "components": [{"component": "counter", "id": null, "vars": {"count": 1}, "version": "v1"}],
                "templates": [{"component": "counter", "version": "v1", "htmlCode": "<p>{{$count}}</p>"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = transport_for(&server)
            .exchange(&counter_request())
            .await
            .unwrap();
        assert_eq!(response.component("counter").unwrap().vars["count"], 1);
        assert_eq!(response.templates[0].version, "v1");
    }

    #[tokio::test]
    async fn non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tessel"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = transport_for(&server)
            .exchange(&counter_request())
            .await
            .unwrap_err();
        assert_matches!(err, TransportError::Status { status: 500, ref body } if body == "boom");
    }

    #[tokio::test]
    async fn malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = transport_for(&server)
            .exchange(&counter_request())
            .await
            .unwrap_err();
        assert_matches!(err, TransportError::Malformed(_));
    }

    #[tokio::test]
    async fn missing_marker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"components": [], "templates": []})),
            )
            .mount(&server)
            .await;

        let err = transport_for(&server)
            .exchange(&counter_request())
            .await
            .unwrap_err();
        assert_matches!(err, TransportError::MissingMarker);
    }

    #[tokio::test]
    async fn static_template_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/static/counter.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "component": "counter", "version": "v3", "htmlCode": "<b>{{$count}}</b>"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let payload = transport_for(&server)
            .fetch_static_template("counter")
            .await
            .unwrap();
        assert_eq!(payload.version, "v3");
    }

    #[tokio::test]
    async fn static_template_without_location() {
        let transport = HttpTransport::new(&TransportSettings::default()).unwrap();
        let err = transport.fetch_static_template("counter").await.unwrap_err();
        assert_matches!(err, TransportError::NoStaticLocation);
    }
}
