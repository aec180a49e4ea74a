use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use takumi_ocr_lib::Config;

#[derive(Debug, Parser)]
#[command(
    name = "takumi-ocr",
    version,
    about = "OCR, translation and invoice accounting against the TAKUMI OCR backend"
)]
pub struct Cli {
    #[command(flatten)]
    pub overrides: ConfigOverrides,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// OCR documents and export the text (optionally translated).
    Ocr(OcrArgs),
    /// OCR invoices, list the accounting records, optionally save and export them.
    Accounting(AccountingArgs),
    /// Derive accounting records offline from a JSON dump of OCR results.
    Extract(ExtractArgs),
    /// Show which backend endpoints are configured.
    Status,
}

/// Flags that take precedence over `TAKUMI_*` variables and `.env`.
#[derive(Debug, Default, Args)]
pub struct ConfigOverrides {
    #[arg(long, global = true, value_name = "URL")]
    pub ocr_url: Option<String>,
    #[arg(long, global = true, value_name = "URL")]
    pub accounting_ocr_url: Option<String>,
    #[arg(long, global = true, value_name = "URL")]
    pub translate_url: Option<String>,
    #[arg(long, global = true, value_name = "URL")]
    pub save_url: Option<String>,
    #[arg(long, global = true)]
    pub user_id: Option<String>,
    #[arg(long, global = true, value_name = "N")]
    pub concurrency: Option<usize>,
}

impl ConfigOverrides {
    pub fn apply(self, config: &mut Config) {
        if let Some(url) = self.ocr_url {
            if config.accounting_ocr_url.is_none() {
                config.accounting_ocr_url = Some(url.clone());
            }
            config.ocr_url = Some(url);
        }
        if let Some(url) = self.accounting_ocr_url {
            config.accounting_ocr_url = Some(url);
        }
        if let Some(url) = self.translate_url {
            config.translate_url = Some(url);
        }
        if let Some(url) = self.save_url {
            config.accounting_save_url = Some(url);
        }
        if let Some(user_id) = self.user_id {
            config.user_id = Some(user_id);
        }
        if let Some(n) = self.concurrency {
            config.ocr_concurrency = n.max(1);
            config.translate_concurrency = n.max(1);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Text,
    Excel,
    Word,
    Json,
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Defaults to the Downloads folder (or Desktop).
    #[arg(long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,
    /// Open the exported file(s) when done.
    #[arg(long)]
    pub open: bool,
}

#[derive(Debug, Args)]
pub struct OcrArgs {
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,
    /// Translate every page into this language code (e.g. `th`, `en`).
    #[arg(long, value_name = "LANG")]
    pub translate: Option<String>,
    #[arg(long, value_enum, default_value_t = ExportFormat::Text)]
    pub format: ExportFormat,
    /// Write page preview images into this directory.
    #[arg(long, value_name = "DIR")]
    pub preview_dir: Option<PathBuf>,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct AccountingArgs {
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,
    /// Send every record to the accounting save endpoint.
    #[arg(long)]
    pub save: bool,
    /// Export the records to `<BASE>_<date>.xlsx`.
    #[arg(long, value_name = "BASE")]
    pub excel: Option<String>,
    /// Print the records as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct ExtractArgs {
    /// JSON array of files with their `ocrResult` pages.
    #[arg(value_name = "JSON")]
    pub input: PathBuf,
    #[arg(long, value_name = "BASE")]
    pub excel: Option<String>,
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ocr_with_translation_and_format() {
        let cli = Cli::try_parse_from([
            "takumi-ocr",
            "ocr",
            "a.pdf",
            "b.png",
            "--translate",
            "th",
            "--format",
            "word",
            "--ocr-url",
            "http://ocr",
        ])
        .unwrap();
        match cli.command {
            CliCommand::Ocr(args) => {
                assert_eq!(args.files.len(), 2);
                assert_eq!(args.translate.as_deref(), Some("th"));
                assert_eq!(args.format, ExportFormat::Word);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.overrides.ocr_url.as_deref(), Some("http://ocr"));
    }

    #[test]
    fn ocr_requires_files() {
        assert!(Cli::try_parse_from(["takumi-ocr", "ocr"]).is_err());
    }

    #[test]
    fn ocr_url_override_also_feeds_accounting_endpoint() {
        let mut config = Config::default();
        ConfigOverrides {
            ocr_url: Some("http://ocr".into()),
            concurrency: Some(0),
            ..ConfigOverrides::default()
        }
        .apply(&mut config);
        assert_eq!(config.accounting_ocr_url.as_deref(), Some("http://ocr"));
        assert_eq!(config.ocr_concurrency, 1);
    }
}
