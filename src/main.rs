use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Instrument, info, info_span, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use event_forge::aggregate::RunAggregate;
use event_forge::cli::{Cli, Command};
use event_forge::clock::SystemClock;
use event_forge::config::{ForgeConfig, LogFormat, LoggingConfig, SecretProviderKind};
use event_forge::ledger::RunLedger;
use event_forge::notify::SlackNotifier;
use event_forge::pipeline::{self, GateOutput, IntakeStage, RenderStage};
use event_forge::render::{RenderClient, RenderCredentials};
use event_forge::schema::JsonSchemaValidator;
use event_forge::secrets::{
    EnvSecretProvider, FileSecretProvider, SecretError, SecretProvider, SecretStore,
};
use event_forge::sheets::GoogleSheetsClient;
use event_forge::storage::{AwsCredentials, S3Presigner, UrlPresigner};
use event_forge::ui::{self, RunProgress};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ForgeConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(concurrency) = cli.concurrency {
        config.run.concurrency = concurrency;
    }
    if let Some(deadline) = cli.deadline_secs {
        config.poll.deadline_secs = deadline;
    }
    config.validate()?;
    init_logging(&config.logging, cli.verbose);

    let span = info_span!(
        "invocation",
        invocation_id = %Uuid::new_v4(),
        service = %config.logging.service_name,
        environment = %config.environment
    );
    execute(cli, config).instrument(span).await
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let directive = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
    }
}

async fn execute(cli: Cli, config: ForgeConfig) -> Result<()> {
    let out = cli.out.as_deref();
    match cli.command {
        Command::Gate { sheet_id } => {
            let secrets = secret_store(&config)?;
            let output = gate_step(&config, &secrets, &sheet_id).await?;
            write_output(out, &output)
        }
        Command::Track { input } => {
            let secrets = secret_store(&config)?;
            let gate: GateOutput = read_input(&input)?;
            let aggregate = track_step(&config, &secrets, &gate).await?;
            write_output(out, &aggregate)
        }
        Command::Report { input, send } => {
            let aggregate: RunAggregate = read_input(&input)?;
            let payload = pipeline::compile_report(&aggregate);
            if send {
                let secrets = secret_store(&config)?;
                notify(&config, &secrets, &payload).await?;
            }
            write_output(out, &payload)
        }
        Command::Run { sheet_id, no_notify } => {
            let secrets = secret_store(&config)?;
            let gate = gate_step(&config, &secrets, &sheet_id).await?;
            let aggregate = track_step(&config, &secrets, &gate).await?;
            if !no_notify {
                let payload = pipeline::compile_report(&aggregate);
                notify(&config, &secrets, &payload).await?;
            }
            write_output(out, &aggregate)
        }
        Command::Presign {
            bucket,
            key,
            method,
            expires,
        } => {
            let presigner = presigner(&config)?;
            let url = presigner.create_url(&bucket, &key, Duration::from_secs(expires), method.into())?;
            println!("{url}");
            Ok(())
        }
    }
}

fn secret_store(config: &ForgeConfig) -> Result<SecretStore> {
    Ok(match config.secrets.provider {
        SecretProviderKind::Env => SecretStore::Env(EnvSecretProvider),
        SecretProviderKind::File => {
            let path = config
                .secrets
                .file
                .as_deref()
                .context("secrets.file is not set")?;
            SecretStore::File(FileSecretProvider::load(path)?)
        }
    })
}

fn presigner(config: &ForgeConfig) -> Result<S3Presigner> {
    let credentials = AwsCredentials::from_env().context("loading AWS credentials")?;
    Ok(S3Presigner::new(&config.storage.region, credentials))
}

async fn gate_step(config: &ForgeConfig, secrets: &SecretStore, sheet_id: &str) -> Result<GateOutput> {
    let token = secrets
        .get_secret(&config.secrets.sheets_token)
        .await
        .context("fetching sheets token")?;
    let sheets = GoogleSheetsClient::new(token, &config.sheet.api_base_url)?;
    let schema = JsonSchemaValidator::from_path(&config.sheet.schema_path)?;

    let stage = IntakeStage::new(&sheets, &schema, &SystemClock, &config.sheet);
    let output = stage
        .gate_and_validate(sheet_id)
        .await
        .with_context(|| format!("gating sheet {sheet_id}"))?;
    ui::print_gate_summary(&output);
    Ok(output)
}

async fn track_step(config: &ForgeConfig, secrets: &SecretStore, gate: &GateOutput) -> Result<RunAggregate> {
    // A malformed credentials secret is a configuration error: fail before
    // any submission.
    let raw = secrets
        .get_secret(&config.secrets.render_credentials)
        .await
        .context("fetching render credentials")?;
    let credentials = RenderCredentials::from_secret(&config.secrets.render_credentials, &raw)?;
    let render = RenderClient::with_endpoints(
        credentials,
        config.render.ims_url.clone(),
        config.render.api_base_url.clone(),
        config.render.scope.clone(),
    )?;
    let presigner = presigner(config)?;
    let ledger = RunLedger::for_run(&config.run.ledger_dir, &gate.spreadsheet_id, &gate.run_id)?;
    if let Some(path) = ledger.path() {
        info!(run_id = %gate.run_id, ledger = %path.display(), "using run ledger");
    }

    let progress = RunProgress::start(gate.valid_work_items.len(), &gate.spreadsheet_id);
    let stage = RenderStage::new(&render, &presigner, &SystemClock, config);
    let result = stage
        .submit_and_track_jobs(gate, &ledger, |record| progress.record(record))
        .await;
    progress.finish();

    let aggregate = result.context("tracking render jobs")?;
    ui::print_run_summary(&aggregate);
    Ok(aggregate)
}

async fn notify(
    config: &ForgeConfig,
    secrets: &SecretStore,
    payload: &event_forge::report::NotificationPayload,
) -> Result<()> {
    let name = config.secrets.slack_webhook_secret(&config.environment);
    let url = match secrets.get_secret(&name).await {
        Ok(url) => url,
        Err(SecretError::NotFound(_)) => {
            warn!(secret = %name, "no webhook configured, report not sent");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let notifier = SlackNotifier::new(url)?;
    pipeline::deliver_report(&notifier, payload).await;
    Ok(())
}

fn read_input<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

fn write_output(out: Option<&Path>, value: &impl Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => std::fs::write(path, json).with_context(|| format!("writing {}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}
