//! Tipos de erro para o cliente da API de renderização.
//!
//! Define [`RenderError`] com variantes para rate limiting, erros do servidor,
//! erros de validação e falhas de rede. A classificação entre falhas
//! transitórias e permanentes fica em [`RenderError::is_retryable`].

use thiserror::Error;

/// Erros que podem ocorrer ao interagir com a API de renderização.
#[derive(Debug, Error)]
pub enum RenderError {
    /// O servidor retornou HTTP 429 (rate limit).
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Erro 5xx do servidor; transitório.
    #[error("server error (status {status}): {message}")]
    Server { status: u16, message: String },

    /// Erro 4xx (payload inválido, job inexistente, credenciais recusadas).
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// O serviço de identidade recusou as credenciais do cliente.
    #[error("authentication rejected (status {status}): {message}")]
    AuthRejected { status: u16, message: String },

    /// A resposta de submissão não trouxe a URL de status do job.
    #[error("render API did not return a job status URL")]
    MissingStatusUrl,

    /// Falha de rede subjacente (DNS, conexão recusada, timeout) ou corpo ilegível.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl RenderError {
    /// Falhas de rede, 5xx e 429 podem ser retentadas; o resto é permanente.
    pub fn is_retryable(&self) -> bool {
        match self {
            RenderError::RateLimited { .. } | RenderError::Server { .. } => true,
            RenderError::NetworkError(e) => !e.is_decode(),
            RenderError::ApiError { .. }
            | RenderError::AuthRejected { .. }
            | RenderError::MissingStatusUrl => false,
        }
    }

    /// Constrói o erro adequado a partir de um status HTTP não-sucesso.
    pub fn from_status(status: u16, message: String) -> Self {
        if status >= 500 {
            RenderError::Server { status, message }
        } else {
            RenderError::ApiError { status, message }
        }
    }
}
