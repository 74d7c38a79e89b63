//! Configuração do event-forge carregada de um arquivo TOML.
//!
//! A struct [`ForgeConfig`] reúne todos os parâmetros do pipeline. Valores
//! ausentes no arquivo usam defaults sensíveis. A ordem de resolução do
//! arquivo é: caminho explícito (`--config`), `config/<APP_ENV>.toml`,
//! `forge.toml` no diretório atual e, por fim, só os defaults.
//! `FORGE_LOG_LEVEL` tem precedência sobre `logging.level`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ForgeError;
use crate::gate::GateRules;
use crate::render::client::{API_BASE_URL, API_SCOPE, IMS_URL};
use crate::state_machine::{MAX_DEADLINE_SECS, PollConfig, RetryConfig};

/// Arquivo procurado no diretório atual quando nada mais foi indicado.
pub const DEFAULT_CONFIG_FILE: &str = "forge.toml";

/// Configuração de nível superior.
#[derive(Debug, Clone, Deserialize)]
pub struct ForgeConfig {
    /// Nome do ambiente (dev, staging, prod); compõe o nome do webhook.
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub secrets: SecretsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sheet: SheetConfig,

    #[serde(default)]
    pub render: RenderEndpoints,

    /// Política de retentativa da submissão.
    #[serde(default)]
    pub submit: RetryConfig,

    /// Política de polling e deadline dos jobs.
    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub run: RunConfig,
}

fn default_environment() -> String {
    "dev".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Diretiva do `EnvFilter` (ex.: `info`, `event_forge=debug`).
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "event-forge".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            service_name: default_service_name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretProviderKind {
    /// Variáveis de ambiente com o nome normalizado.
    #[default]
    Env,
    /// Arquivo TOML `nome = "valor"`.
    File,
}

/// Onde e com que nomes os segredos são buscados.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub provider: SecretProviderKind,

    /// Obrigatório quando `provider = "file"`.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Segredo JSON com `client_id` e `client_secret` da API de renderização.
    #[serde(default = "default_render_credentials")]
    pub render_credentials: String,

    /// Token bearer para a API do Google Sheets.
    #[serde(default = "default_sheets_token")]
    pub sheets_token: String,

    /// Prefixo do segredo do webhook; o ambiente é concatenado ao final.
    #[serde(default = "default_slack_webhook_prefix")]
    pub slack_webhook_prefix: String,
}

fn default_render_credentials() -> String {
    "event-forge/render-credentials".to_string()
}

fn default_sheets_token() -> String {
    "event-forge/google-sheets-token".to_string()
}

fn default_slack_webhook_prefix() -> String {
    "event-forge/slack-webhook-".to_string()
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            provider: SecretProviderKind::default(),
            file: None,
            render_credentials: default_render_credentials(),
            sheets_token: default_sheets_token(),
            slack_webhook_prefix: default_slack_webhook_prefix(),
        }
    }
}

impl SecretsConfig {
    /// Nome completo do segredo do webhook para `environment`.
    pub fn slack_webhook_secret(&self, environment: &str) -> String {
        format!("{}{environment}", self.slack_webhook_prefix)
    }
}

/// Buckets e nomes de objetos usados nas URLs pré-assinadas.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_region")]
    pub region: String,

    /// Bucket que contém o template de design.
    #[serde(default = "default_assets_bucket")]
    pub assets_bucket: String,

    /// Bucket onde os pôsteres renderizados são gravados.
    #[serde(default = "default_outputs_bucket")]
    pub outputs_bucket: String,

    #[serde(default = "default_template_key")]
    pub template_key: String,

    /// A chave de saída é `<output_prefix><key>_poster.pdf`.
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,

    #[serde(default = "default_url_expiry_secs")]
    pub url_expiry_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_assets_bucket() -> String {
    "event-forge-assets".to_string()
}

fn default_outputs_bucket() -> String {
    "event-forge-outputs".to_string()
}

fn default_template_key() -> String {
    "templates/poster.indd".to_string()
}

fn default_output_prefix() -> String {
    "generated/".to_string()
}

fn default_url_expiry_secs() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            assets_bucket: default_assets_bucket(),
            outputs_bucket: default_outputs_bucket(),
            template_key: default_template_key(),
            output_prefix: default_output_prefix(),
            url_expiry_secs: default_url_expiry_secs(),
        }
    }
}

impl StorageConfig {
    pub fn output_key(&self, work_item_key: &str) -> String {
        format!("{}{work_item_key}_poster.pdf", self.output_prefix)
    }
}

/// Leitura da planilha e regras do gate de linhas.
#[derive(Debug, Clone, Deserialize)]
pub struct SheetConfig {
    /// Faixa A1 lida da planilha; a primeira linha é o cabeçalho.
    #[serde(default = "default_range")]
    pub range: String,

    #[serde(default = "default_schema_path")]
    pub schema_path: PathBuf,

    #[serde(default = "default_sheets_api_url")]
    pub api_base_url: String,

    /// Retentativas da leitura quando a API responde 429, 5xx ou falha de rede.
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(flatten)]
    pub rules: GateRules,
}

fn default_range() -> String {
    "Sheet1".to_string()
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("config/product_row.schema.json")
}

fn default_sheets_api_url() -> String {
    "https://sheets.googleapis.com".to_string()
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            range: default_range(),
            schema_path: default_schema_path(),
            api_base_url: default_sheets_api_url(),
            retry: RetryConfig::default(),
            rules: GateRules::default(),
        }
    }
}

/// Endpoints da API de renderização e do serviço de identidade.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderEndpoints {
    #[serde(default = "default_ims_url")]
    pub ims_url: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_ims_url() -> String {
    IMS_URL.to_string()
}

fn default_api_base_url() -> String {
    API_BASE_URL.to_string()
}

fn default_scope() -> String {
    API_SCOPE.to_string()
}

impl Default for RenderEndpoints {
    fn default() -> Self {
        Self {
            ims_url: default_ims_url(),
            api_base_url: default_api_base_url(),
            scope: default_scope(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Máximo de itens submetidos e acompanhados ao mesmo tempo.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Diretório dos ledgers de execução, um arquivo por planilha.
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,
}

fn default_concurrency() -> usize {
    8
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from(".forge/runs")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            ledger_dir: default_ledger_dir(),
        }
    }
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            logging: LoggingConfig::default(),
            secrets: SecretsConfig::default(),
            storage: StorageConfig::default(),
            sheet: SheetConfig::default(),
            render: RenderEndpoints::default(),
            submit: RetryConfig::default(),
            poll: PollConfig::default(),
            run: RunConfig::default(),
        }
    }
}

impl ForgeConfig {
    /// Carrega a configuração seguindo a ordem de resolução do módulo,
    /// aplica as sobrescritas de ambiente e valida o resultado.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ForgeError> {
        let app_env = std::env::var("APP_ENV").ok().filter(|v| !v.is_empty());
        let mut config = match resolve_path(explicit, app_env.as_deref(), Path::new(DEFAULT_CONFIG_FILE)) {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };

        // Variável de ambiente tem precedência sobre o arquivo para o nível de log.
        if let Ok(level) = std::env::var("FORGE_LOG_LEVEL")
            && !level.is_empty()
        {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ForgeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ForgeError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Rejeita combinações que impediriam qualquer submissão.
    pub fn validate(&self) -> Result<(), ForgeError> {
        let invalid = |msg: &str| Err(ForgeError::Config(msg.to_string()));

        if self.storage.assets_bucket.trim().is_empty() {
            return invalid("storage.assets_bucket must not be empty");
        }
        if self.storage.outputs_bucket.trim().is_empty() {
            return invalid("storage.outputs_bucket must not be empty");
        }
        if self.sheet.rules.key_field.trim().is_empty() {
            return invalid("sheet.key_field must not be empty");
        }
        if self.run.concurrency == 0 {
            return invalid("run.concurrency must be at least 1");
        }
        if self.poll.deadline_secs == 0 {
            return invalid("poll.deadline_secs must be greater than zero");
        }
        if self.poll.deadline_secs > MAX_DEADLINE_SECS {
            return Err(ForgeError::Config(format!(
                "poll.deadline_secs must be at most {MAX_DEADLINE_SECS}"
            )));
        }
        if self.poll.initial_interval_secs == 0 {
            return invalid("poll.initial_interval_secs must be greater than zero");
        }
        // Um multiplicador abaixo de 1 encolheria o intervalo até zero.
        if !self.poll.multiplier.is_finite() || self.poll.multiplier < 1.0 {
            return invalid("poll.multiplier must be a finite value of at least 1.0");
        }
        if self.submit.max_attempts == 0 || self.sheet.retry.max_attempts == 0 {
            return invalid("max_attempts must be at least 1");
        }
        if ![self.poll.jitter, self.submit.jitter, self.sheet.retry.jitter]
            .iter()
            .all(|j| (0.0..=1.0).contains(j))
        {
            return invalid("jitter must be between 0.0 and 1.0");
        }
        if self.secrets.provider == SecretProviderKind::File && self.secrets.file.is_none() {
            return invalid("secrets.file is required when secrets.provider = \"file\"");
        }
        Ok(())
    }
}

/// Escolhe o arquivo de configuração. Um `APP_ENV` sem arquivo correspondente
/// é devolvido mesmo assim, para que a leitura falhe com erro de configuração.
fn resolve_path(explicit: Option<&Path>, app_env: Option<&str>, fallback: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(env) = app_env {
        return Some(Path::new("config").join(format!("{env}.toml")));
    }
    fallback.exists().then(|| fallback.to_path_buf())
}
