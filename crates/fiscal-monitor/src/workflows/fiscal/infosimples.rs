//! HTTP client for the InfoSimples certificate API.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::domain::Category;
use super::provider::{LookupProvider, LookupRequest, ProviderError, ProviderResponse};
use crate::config::ProviderConfig;

pub struct InfoSimplesClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    default_timeout: Duration,
    payroll_fund_timeout: Duration,
}

impl InfoSimplesClient {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            default_timeout: config.default_timeout,
            payroll_fund_timeout: config.payroll_fund_timeout,
        }
    }

    pub fn endpoint(&self, category: Category) -> String {
        format!("{}/api/v2/consultas/{}", self.base_url, endpoint_path(category))
    }

    /// How long the provider itself may spend on the government site, sent in the body.
    fn provider_timeout(&self, category: Category) -> Duration {
        match category {
            Category::PayrollFundRegularity => self.payroll_fund_timeout,
            _ => self.default_timeout,
        }
    }

    fn request_body(&self, token: &str, category: Category, request: &LookupRequest) -> Value {
        let mut body = json!({
            "token": token,
            "cnpj": request.cnpj,
            "timeout": self.provider_timeout(category).as_secs().to_string(),
        });
        if let (Some(registration), Some(map)) =
            (request.state_registration.as_deref(), body.as_object_mut())
        {
            map.insert("inscricao_estadual".to_string(), json!(registration));
        }
        body
    }
}

fn endpoint_path(category: Category) -> &'static str {
    match category {
        Category::FederalDebtCertificate => "receita-federal/pgfn/nova",
        Category::StateDebtCertificate => "sefaz/pr/certidao-debitos",
        Category::PayrollFundRegularity => "caixa/regularidade",
    }
}

/// Pulls a readable reason out of an error body: `message`, then `errors[0]`, then the text.
fn error_message(status: u16, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|value| {
        value
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| {
                value
                    .get("errors")
                    .and_then(Value::as_array)
                    .and_then(|errors| errors.first())
                    .and_then(Value::as_str)
            })
            .map(str::to_string)
    });

    match (status, from_json) {
        (_, Some(message)) => message,
        (401 | 403, None) => "authentication rejected, check the provider token".to_string(),
        (404, None) => "endpoint not found".to_string(),
        (_, None) if body.trim().is_empty() => "empty response body".to_string(),
        (_, None) => body.trim().chars().take(200).collect(),
    }
}

#[async_trait]
impl LookupProvider for InfoSimplesClient {
    async fn fetch(
        &self,
        category: Category,
        request: &LookupRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let token = self.token.as_deref().ok_or(ProviderError::MissingToken)?;
        let url = self.endpoint(category);
        let body = self.request_body(token, category, request);

        debug!(url = %url, category = %category, "requesting certificate");
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message: error_message(status.as_u16(), &text),
            });
        }

        let raw: Value = resp
            .json()
            .await
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        ProviderResponse::from_json(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            base_url: "https://api.infosimples.com/".to_string(),
            token: token.map(str::to_string),
            default_timeout: Duration::from_secs(60),
            payroll_fund_timeout: Duration::from_secs(120),
        }
    }

    #[test]
    fn endpoints_follow_category() {
        let client = InfoSimplesClient::new(&config(None));
        assert_eq!(
            client.endpoint(Category::FederalDebtCertificate),
            "https://api.infosimples.com/api/v2/consultas/receita-federal/pgfn/nova"
        );
        assert_eq!(
            client.endpoint(Category::PayrollFundRegularity),
            "https://api.infosimples.com/api/v2/consultas/caixa/regularidade"
        );
    }

    #[test]
    fn body_carries_state_registration_only_when_present() {
        let client = InfoSimplesClient::new(&config(Some("secret")));
        let request = LookupRequest {
            cnpj: "11222333000181".to_string(),
            state_registration: None,
        };
        let body = client.request_body("secret", Category::PayrollFundRegularity, &request);
        assert_eq!(body["timeout"], "120");
        assert_eq!(body["cnpj"], "11222333000181");
        assert!(body.get("inscricao_estadual").is_none());

        let request = LookupRequest {
            state_registration: Some("9012345678".to_string()),
            ..request
        };
        let body = client.request_body("secret", Category::StateDebtCertificate, &request);
        assert_eq!(body["timeout"], "60");
        assert_eq!(body["inscricao_estadual"], "9012345678");
    }

    #[test]
    fn error_bodies_prefer_provider_messages() {
        assert_eq!(
            error_message(500, r#"{"message":"Serviço indisponível"}"#),
            "Serviço indisponível"
        );
        assert_eq!(error_message(422, r#"{"errors":["cnpj inválido"]}"#), "cnpj inválido");
        assert_eq!(
            error_message(401, ""),
            "authentication rejected, check the provider token"
        );
        assert_eq!(error_message(502, "  "), "empty response body");
    }

    #[tokio::test]
    async fn missing_token_fails_before_any_request() {
        let client = InfoSimplesClient::new(&config(None));
        let request = LookupRequest {
            cnpj: "11222333000181".to_string(),
            state_registration: None,
        };
        match client.fetch(Category::FederalDebtCertificate, &request).await {
            Err(ProviderError::MissingToken) => {}
            other => panic!("expected missing token, got {other:?}"),
        }
    }
}
