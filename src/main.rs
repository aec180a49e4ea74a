mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{AccountingArgs, Cli, CliCommand, ExportFormat, ExtractArgs, OcrArgs, OutputArgs};
use std::path::PathBuf;
use std::sync::Arc;
use takumi_ocr_lib::export::{default_output_dir, open_exported};
use takumi_ocr_lib::types::{AccountingRecord, SourceFile};
use takumi_ocr_lib::upload::UploadReport;
use takumi_ocr_lib::{AppState, BatchReport, Config, HttpBackend, OcrMode};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("failed to load configuration")?;
    cli.overrides.apply(&mut config);

    if let CliCommand::Status = cli.command {
        print_status(&config);
        return Ok(());
    }

    let backend = HttpBackend::new(config.clone()).context("failed to build HTTP client")?;
    let state = AppState::new(config, Arc::new(backend));
    match cli.command {
        CliCommand::Ocr(args) => run_ocr(&state, args),
        CliCommand::Accounting(args) => run_accounting(&state, args),
        CliCommand::Extract(args) => run_extract(&state, args),
        CliCommand::Status => Ok(()),
    }
}

fn print_status(config: &Config) {
    println!("backend: {}", config.backend_status());
    let endpoints = [
        ("ocr", &config.ocr_url),
        ("accounting ocr", &config.accounting_ocr_url),
        ("translate", &config.translate_url),
        ("accounting save", &config.accounting_save_url),
    ];
    for (name, url) in endpoints {
        println!("  {:<16} {}", name, url.as_deref().unwrap_or("-"));
    }
    println!("  {:<16} {}", "user id", config.user_id.as_deref().unwrap_or("-"));
}

fn output_dir(output: &OutputArgs) -> Result<PathBuf> {
    match &output.out_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(default_output_dir()?),
    }
}

fn finish_exports(paths: &[PathBuf], output: &OutputArgs) -> Result<()> {
    for path in paths {
        println!("{}", path.display());
        if output.open {
            open_exported(path).with_context(|| format!("failed to open {}", path.display()))?;
        }
    }
    Ok(())
}

fn report_uploads(report: &UploadReport) -> Result<()> {
    for rejected in &report.rejected {
        eprintln!("skipped {}", rejected);
    }
    if report.accepted.is_empty() {
        anyhow::bail!("no usable files");
    }
    Ok(())
}

fn report_batch(what: &str, report: &BatchReport) {
    match report.summary() {
        None => tracing::info!("{}: {} done", what, report.succeeded),
        Some(summary) => eprintln!(
            "{}: {} done, {} failed\n{}",
            what,
            report.succeeded,
            report.failures.len(),
            summary
        ),
    }
}

fn run_ocr(state: &AppState, args: OcrArgs) -> Result<()> {
    report_uploads(&state.add_files(&args.files))?;
    let report = state.run_ocr(OcrMode::General)?;
    report_batch("OCR", &report);

    if let Some(lang) = &args.translate {
        let report = state.translate(lang)?;
        report_batch("translate", &report);
    }
    if let Some(dir) = &args.preview_dir {
        state.materialize_previews(dir)?;
    }

    if args.format == ExportFormat::Json {
        println!("{}", serde_json::to_string_pretty(&state.store.snapshot())?);
        return Ok(());
    }
    let dir = output_dir(&args.output)?;
    let paths = match args.format {
        ExportFormat::Text => state.export_text(&[], &dir)?,
        ExportFormat::Excel => state.export_excel(&[], &dir)?,
        ExportFormat::Word => state.export_word(&[], &dir)?,
        ExportFormat::Json => Vec::new(),
    };
    finish_exports(&paths, &args.output)
}

fn run_accounting(state: &AppState, args: AccountingArgs) -> Result<()> {
    report_uploads(&state.add_files(&args.files))?;
    let report = state.run_ocr(OcrMode::Accounting)?;
    report_batch("OCR", &report);

    if args.save {
        let report = state.save_accounting(&[])?;
        report_batch("save", &report);
    }
    print_records(&state.records(), args.json)?;
    export_records(state, args.excel.as_deref(), &args.output)
}

fn run_extract(state: &AppState, args: ExtractArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let files: Vec<SourceFile> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of files", args.input.display()))?;
    state.load_files(files);
    print_records(&state.records(), args.json)?;
    export_records(state, args.excel.as_deref(), &args.output)
}

fn export_records(state: &AppState, base: Option<&str>, output: &OutputArgs) -> Result<()> {
    let Some(base) = base else {
        return Ok(());
    };
    let path = state.export_accounting(&[], &output_dir(output)?, base)?;
    finish_exports(&[path], output)
}

fn print_records(records: &[AccountingRecord], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }
    println!(
        "{:<32} {:<10} {:<18} {:<28} {:>14} {:>12} {:>14}",
        "File", "Date", "Invoice No", "Seller", "Value", "VAT", "Total"
    );
    for r in records {
        println!(
            "{:<32} {:<10} {:<18} {:<28} {:>14.2} {:>12.2} {:>14.2}",
            truncate(&r.filename, 32),
            r.invoice_date,
            truncate(&r.invoice_no, 18),
            truncate(&r.seller_name, 28),
            r.product_value,
            r.vat,
            r.total_amount
        );
    }
    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}
