//! Interface de terminal do event-forge: barra de progresso e resumos coloridos.
//!
//! Usa `indicatif` para a barra de acompanhamento dos jobs e `console` para
//! estilização. O [`RunProgress`] acompanha visualmente a etapa de render.
//! Tudo vai para o stderr; o stdout fica livre para a saída JSON das etapas.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::aggregate::RunAggregate;
use crate::pipeline::GateOutput;
use crate::state_machine::{JobOutcome, OutcomeRecord};

/// Indicador de progresso da etapa de render, um passo por item concluído.
pub struct RunProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl RunProgress {
    /// Inicia a barra com o total de itens a acompanhar.
    pub fn start(total: usize, sheet_id: &str) -> Self {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_message(format!("rendering posters for {sheet_id}"));
        pb.enable_steady_tick(Duration::from_millis(120));

        Self {
            pb,
            green: Style::new().for_stderr().green().bold(),
            red: Style::new().for_stderr().red().bold(),
            yellow: Style::new().for_stderr().yellow(),
        }
    }

    /// Avança a barra e imprime uma linha com o resultado do item.
    pub fn record(&self, record: &OutcomeRecord) {
        let line = match &record.outcome {
            JobOutcome::Succeeded { artifact_location } => format!(
                "  {} {} → {artifact_location}",
                self.green.apply_to("✓"),
                record.work_item_key
            ),
            JobOutcome::Failed { reason, .. } => format!(
                "  {} {}: {reason}",
                self.red.apply_to("✗"),
                record.work_item_key
            ),
            JobOutcome::TimedOut => format!(
                "  {} {}: timed out",
                self.yellow.apply_to("⧗"),
                record.work_item_key
            ),
        };
        self.pb.println(line);
        self.pb.inc(1);
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

pub fn print_gate_summary(output: &GateOutput) {
    let green = Style::new().for_stderr().green().bold();
    let yellow = Style::new().for_stderr().yellow();
    eprintln!(
        "{} {} valid work item(s), {} rejected row(s) in {} (run {})",
        green.apply_to("Gate:"),
        output.valid_work_items.len(),
        yellow.apply_to(output.invalid_count),
        output.spreadsheet_id,
        output.run_id
    );
}

pub fn print_run_summary(aggregate: &RunAggregate) {
    let bold = Style::new().for_stderr().bold();
    let green = Style::new().for_stderr().green();
    let red = Style::new().for_stderr().red();
    let yellow = Style::new().for_stderr().yellow();

    eprintln!();
    eprintln!("{}", bold.apply_to(format!("─── Run {} ───", aggregate.spreadsheet_id)));
    eprintln!("  generated: {}", green.apply_to(aggregate.succeeded.len()));
    eprintln!("  failed:    {}", red.apply_to(aggregate.failed.len()));
    eprintln!("  skipped:   {}", yellow.apply_to(aggregate.invalid_count));
    for (key, reason) in &aggregate.failed {
        eprintln!("    {} {key}: {reason}", red.apply_to("✗"));
    }
}
