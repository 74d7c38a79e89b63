//! Tipos de dados para requisições e respostas da API de renderização.
//!
//! As structs de requisição seguem o formato do endpoint `v1/jobs/rendition`:
//! template e saída como referências externas (URLs pré-assinadas) e os
//! dados da linha embutidos no corpo.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::secrets::SecretError;

const TEMPLATE_MEDIA_TYPE: &str = "application/vnd.adobe.indesign-template";
const OUTPUT_MEDIA_TYPE: &str = "application/pdf";

/// Credenciais do cliente (client credentials) guardadas no provedor de segredos
/// como um objeto JSON com `client_id` e `client_secret`.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl RenderCredentials {
    /// Interpreta o conteúdo do segredo; JSON inválido ou campos ausentes são
    /// erro de configuração.
    pub fn from_secret(name: &str, raw: &str) -> Result<Self, SecretError> {
        serde_json::from_str(raw).map_err(|e| SecretError::Malformed {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Resposta do serviço de identidade.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// Corpo da requisição de rendição.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenditionRequest {
    pub input: ExternalAsset,
    pub data: InlineData,
    pub output: ExternalAsset,
}

/// Um arquivo referenciado por URL externa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalAsset {
    pub storage: String,
    pub href: String,
    /// Tipo de mídia. Serializado como "type" no JSON.
    #[serde(rename = "type")]
    pub media_type: String,
}

/// Dados da linha embutidos na requisição.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineData {
    pub storage: String,
    pub json: Value,
}

impl RenditionRequest {
    pub fn new(template_url: &str, output_url: &str, data: &Value) -> Self {
        Self {
            input: ExternalAsset {
                storage: "EXTERNAL".into(),
                href: template_url.to_string(),
                media_type: TEMPLATE_MEDIA_TYPE.into(),
            },
            data: InlineData {
                storage: "INLINE".into(),
                json: data.clone(),
            },
            output: ExternalAsset {
                storage: "EXTERNAL".into(),
                href: output_url.to_string(),
                media_type: OUTPUT_MEDIA_TYPE.into(),
            },
        }
    }
}

/// Resposta da submissão; a URL de status vem em `_links.self.href`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitResponse {
    #[serde(rename = "_links", default)]
    pub links: Links,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Links {
    #[serde(rename = "self")]
    pub self_link: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: Option<String>,
}

impl SubmitResponse {
    pub fn status_url(&self) -> Option<&str> {
        self.links
            .self_link
            .as_ref()
            .and_then(|l| l.href.as_deref())
            .filter(|h| !h.is_empty())
    }
}

/// Corpo retornado pela consulta de status de um job.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub outputs: Vec<JobOutput>,
    #[serde(default)]
    pub error: Option<JobError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobOutput {
    #[serde(default)]
    pub destination: Option<Destination>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Destination {
    pub href: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Status de um job remoto, já desacoplado do formato da API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStatus {
    /// String de estado como reportada pelo remoto (conjunto aberto).
    pub state: String,
    pub artifact_location: Option<String>,
    pub error: Option<String>,
}

impl From<StatusResponse> for RemoteStatus {
    fn from(resp: StatusResponse) -> Self {
        let artifact_location = resp
            .outputs
            .into_iter()
            .filter_map(|o| o.destination.and_then(|d| d.href))
            .find(|h| !h.is_empty());
        let error = resp.error.map(|e| match (e.code, e.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (None, Some(message)) => message,
            (Some(code), None) => code,
            (None, None) => "unspecified render error".to_string(),
        });
        Self {
            state: resp.status,
            artifact_location,
            error,
        }
    }
}
