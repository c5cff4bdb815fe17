use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

use super::domain::Category;

/// Identifying fields sent to the provider for one lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupRequest {
    /// Registration id, digits only.
    pub cnpj: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_registration: Option<String>,
}

/// Certificate lookup backend (the InfoSimples REST API in production).
#[async_trait]
pub trait LookupProvider: Send + Sync {
    async fn fetch(
        &self,
        category: Category,
        request: &LookupRequest,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// Decoded provider envelope. `raw` keeps the full JSON for auditing.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub code: i64,
    pub code_message: Option<String>,
    pub items: Vec<ProviderItem>,
    pub raw: Value,
}

impl ProviderResponse {
    /// Codes from 600 upwards are provider-side failures whatever the payload says.
    pub const FAILURE_CODE_FLOOR: i64 = 600;

    pub fn from_json(raw: Value) -> Result<Self, ProviderError> {
        let envelope = raw
            .as_object()
            .ok_or_else(|| ProviderError::Decode("expected a JSON object".to_string()))?;

        let code = envelope
            .get("code")
            .and_then(Value::as_i64)
            .ok_or_else(|| ProviderError::Decode("missing numeric `code`".to_string()))?;

        let code_message = envelope
            .get("code_message")
            .and_then(Value::as_str)
            .map(str::to_string);

        let items = envelope
            .get("data")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().map(ProviderItem::from_value).collect())
            .unwrap_or_default();

        Ok(Self {
            code,
            code_message,
            items,
            raw,
        })
    }

    pub fn is_failure_code(&self) -> bool {
        self.code >= Self::FAILURE_CODE_FLOOR
    }
}

/// The subset of a certificate entry the runner reads. Fields the provider sends with a
/// non-string type are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderItem {
    pub situacao: Option<String>,
    pub certidao: Option<String>,
    pub mensagem: Option<String>,
    pub emitida_as: Option<String>,
    pub validade: Option<String>,
    pub site_receipt: Option<String>,
    pub pdf_url: Option<String>,
    pub cnpj: Option<String>,
}

impl ProviderItem {
    pub fn from_value(value: &Value) -> Self {
        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        };

        Self {
            situacao: field("situacao"),
            certidao: field("certidao"),
            mensagem: field("mensagem"),
            emitida_as: field("emitida_as"),
            validade: field("validade"),
            site_receipt: field("site_receipt"),
            pdf_url: field("pdf_url"),
            cnpj: field("cnpj"),
        }
    }

    /// First present of `situacao`, `certidao`, `mensagem`.
    pub fn primary_text(&self) -> &str {
        self.situacao
            .as_deref()
            .or(self.certidao.as_deref())
            .or(self.mensagem.as_deref())
            .unwrap_or("")
    }

    pub fn secondary_text(&self) -> &str {
        self.emitida_as.as_deref().unwrap_or("")
    }

    pub fn document_url(&self) -> Option<String> {
        self.site_receipt.clone().or_else(|| self.pdf_url.clone())
    }

    pub fn validity_date(&self) -> Option<NaiveDate> {
        self.validade.as_deref().and_then(parse_validity_date)
    }
}

/// Accepts `DD/MM/YYYY` or an ISO `YYYY-MM-DD` prefix. Anything else, including
/// impossible calendar dates, yields `None` rather than a guess.
pub fn parse_validity_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Some(prefix) = raw.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
    }
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() != 3 || parts.iter().any(|part| part.is_empty()) {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%d/%m/%Y").ok()
}

/// Human-readable reason for the provider's failure codes.
pub fn describe_code(code: i64) -> String {
    match code {
        603 => "insufficient provider balance".to_string(),
        604 => "government site timeout or instability".to_string(),
        612 => "Caixa (FGTS) site unavailable".to_string(),
        615 => "invalid input data (check the state registration)".to_string(),
        other => format!("provider error {other}"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider token is not configured")]
    MissingToken,
    #[error("provider unreachable: {0}")]
    Transport(String),
    #[error("provider did not answer within {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("provider code {code}: {}", describe_code(*.code))]
    Code { code: i64 },
    #[error("provider returned no certificate data")]
    EmptyPayload,
    #[error("invalid provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Everything except a missing token can clear up on its own.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProviderError::MissingToken)
    }
}
