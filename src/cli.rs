//! Interface de linha de comando do event-forge baseada em clap.
//!
//! Cada subcomando corresponde a uma etapa do pipeline (gate, track, report),
//! mais `run` para executá-las em sequência e `presign` para gerar URLs
//! pré-assinadas manualmente.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::storage::HttpMethod;

/// event-forge: gera pôsteres a partir de uma planilha de produtos.
#[derive(Debug, Parser)]
#[command(name = "event-forge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração TOML (tem precedência sobre APP_ENV).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (nível debug).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Máximo de itens acompanhados ao mesmo tempo.
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Prazo, em segundos, para cada job de render terminar.
    #[arg(long, global = true)]
    pub deadline_secs: Option<u64>,

    /// Grava a saída JSON da etapa neste arquivo em vez do stdout.
    #[arg(long, global = true)]
    pub out: Option<PathBuf>,
}

/// Método HTTP aceito pela CLI, mapeado para [`HttpMethod`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MethodArg {
    Get,
    Put,
}

impl From<MethodArg> for HttpMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Get => HttpMethod::Get,
            MethodArg::Put => HttpMethod::Put,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Lê a planilha e valida as linhas; emite o GateOutput em JSON.
    Gate {
        /// ID da planilha do Google Sheets.
        sheet_id: String,
    },

    /// Submete e acompanha os jobs de um GateOutput; emite o RunAggregate.
    Track {
        /// Arquivo JSON produzido por `gate`.
        #[arg(long)]
        input: PathBuf,
    },

    /// Compila o relatório de um RunAggregate e opcionalmente o envia.
    Report {
        /// Arquivo JSON produzido por `track`.
        #[arg(long)]
        input: PathBuf,

        /// Envia o relatório para o webhook do ambiente.
        #[arg(long, default_value_t = false)]
        send: bool,
    },

    /// Executa gate, track e report em sequência.
    Run {
        sheet_id: String,

        /// Não envia o relatório ao final.
        #[arg(long, default_value_t = false)]
        no_notify: bool,
    },

    /// Gera uma URL pré-assinada para um objeto.
    Presign {
        #[arg(long)]
        bucket: String,

        #[arg(long)]
        key: String,

        #[arg(long, value_enum, default_value_t = MethodArg::Get)]
        method: MethodArg,

        /// Validade da URL em segundos.
        #[arg(long, default_value_t = 3600)]
        expires: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_gate_subcommand() {
        let cli = Cli::parse_from(["event-forge", "gate", "1AbC"]);
        match cli.command {
            Command::Gate { sheet_id } => assert_eq!(sheet_id, "1AbC"),
            _ => panic!("expected Gate command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "event-forge",
            "--config",
            "config/prod.toml",
            "--concurrency",
            "2",
            "--deadline-secs",
            "900",
            "--verbose",
            "track",
            "--input",
            "gate.json",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("config/prod.toml")));
        assert_eq!(cli.concurrency, Some(2));
        assert_eq!(cli.deadline_secs, Some(900));
        assert!(matches!(cli.command, Command::Track { ref input } if input == &PathBuf::from("gate.json")));
    }

    #[test]
    fn cli_parses_report_send() {
        let cli = Cli::parse_from(["event-forge", "report", "--input", "agg.json", "--send"]);
        assert!(matches!(cli.command, Command::Report { send: true, .. }));
    }

    #[test]
    fn cli_parses_presign_defaults() {
        let cli = Cli::parse_from(["event-forge", "presign", "--bucket", "b", "--key", "k.pdf"]);
        match cli.command {
            Command::Presign { bucket, key, method, expires } => {
                assert_eq!(bucket, "b");
                assert_eq!(key, "k.pdf");
                assert_eq!(HttpMethod::from(method), HttpMethod::Get);
                assert_eq!(expires, 3600);
            }
            _ => panic!("expected Presign command"),
        }
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
