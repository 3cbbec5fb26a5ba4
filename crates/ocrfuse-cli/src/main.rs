//! ocrfuse command-line interface.
//!
//! Scanned images in, reconstructed line tables out:
//!
//! ```text
//! ocrfuse run scan-001.png scan-002.png --format tsv --output-dir out/
//! ocrfuse analyze scan-001.png
//! ocrfuse config
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use ocrfuse::core::config::PipelineConfig;
use ocrfuse::ocr::TesseractCli;
use ocrfuse::{ImageAnalyzer, PageId, PagePipeline, PageReport, RawPage, StrategySelector, TracingProgress};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ocrfuse", version, about = "Adaptive multi-pass OCR page reconstruction")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to a config file (TOML, YAML or JSON). Discovered from the working directory when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level. `RUST_LOG` is ignored when set.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Reconstruct the text lines of one or more page images
    Run {
        /// Page images, one page each
        #[arg(required = true)]
        images: Vec<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Write one file per page here instead of printing
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Recognition language, e.g. `eng` or `deu+eng`
        #[arg(short, long)]
        lang: Option<String>,

        /// Page segmentation mode; repeat to run several passes per variant
        #[arg(long = "psm")]
        psm: Vec<u8>,
    },

    /// Print the measured features and selected strategies of an image as JSON
    Analyze {
        image: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Tsv,
    Json,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Tsv => "tsv",
            Self::Json => "json",
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            images,
            format,
            output_dir,
            lang,
            psm,
        } => run(apply_engine_overrides(config, lang, &psm), &images, format, output_dir.as_deref()).await,
        Command::Analyze { image } => {
            analyze(&config, &image)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config => {
            config.validate().context("Configuration is invalid")?;
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(PipelineConfig::discover()
            .context("Failed to load discovered config")?
            .unwrap_or_default()),
    }
}

/// `--lang` rewrites every engine; `--psm` replaces the engine list with one entry per mode.
fn apply_engine_overrides(mut config: PipelineConfig, lang: Option<String>, psm: &[u8]) -> PipelineConfig {
    if let Some(lang) = lang {
        for engine in &mut config.ocr.engines {
            engine.language = lang.clone();
        }
    }
    if !psm.is_empty() {
        let base = config.ocr.engines.first().cloned().unwrap_or_default();
        config.ocr.engines = psm.iter().map(|&mode| base.clone().with_psm(mode)).collect();
    }
    config
}

fn document_id(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn decode_page(path: &Path, page_index: usize) -> Result<RawPage> {
    let bitmap = image::open(path)
        .with_context(|| format!("Failed to decode image {}", path.display()))?
        .to_luma8();
    Ok(RawPage::from_gray(PageId::new(document_id(path), page_index), bitmap))
}

async fn run(config: PipelineConfig, images: &[PathBuf], format: OutputFormat, output_dir: Option<&Path>) -> Result<ExitCode> {
    let tesseract = TesseractCli::new(&config.ocr.tesseract_path);
    let version = tesseract
        .check_available()
        .await
        .context("tesseract is required for `ocrfuse run`")?;
    info!(%version, "Using tesseract");

    let pages = images
        .iter()
        .enumerate()
        .map(|(index, path)| decode_page(path, index))
        .collect::<Result<Vec<_>>>()?;

    let pipeline = PagePipeline::new(config, Arc::new(tesseract))
        .context("Failed to build pipeline")?
        .with_progress(Arc::new(TracingProgress));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining pages");
            on_signal.cancel();
        }
    });

    let reports = pipeline.process_batch(pages, &cancel).await;

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let mut failed = 0usize;
    for report in &reports {
        if report.status.is_failure() {
            failed += 1;
            if let ocrfuse::PageStatus::Failed(err) = &report.status {
                error!(page = %report.page, error = %err, "Page failed");
            }
        }

        let rendered = render(report, format, reports.len() > 1)?;
        match output_dir {
            Some(dir) => {
                let file = dir.join(format!(
                    "{}-{}.{}",
                    report.page.document_id,
                    report.page.page_index,
                    format.extension()
                ));
                std::fs::write(&file, rendered).with_context(|| format!("Failed to write {}", file.display()))?;
            }
            None => print!("{}", rendered),
        }
    }

    if cancel.is_cancelled() {
        bail!("cancelled before all pages finished");
    }
    if failed > 0 {
        error!(failed, total = reports.len(), "Some pages failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn render(report: &PageReport, format: OutputFormat, with_heading: bool) -> Result<String> {
    let mut out = String::new();
    match format {
        OutputFormat::Json => {
            out.push_str(&serde_json::to_string_pretty(report)?);
            out.push('\n');
        }
        OutputFormat::Tsv => {
            if let Some(table) = &report.line_table {
                out.push_str(&table.to_tsv());
            }
        }
        OutputFormat::Text => {
            if with_heading {
                out.push_str(&format!("--- {} ({}) ---\n", report.page, report.status.label()));
            }
            if let Some(table) = &report.line_table {
                out.push_str(&table.text());
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
    }
    Ok(out)
}

fn analyze(config: &PipelineConfig, path: &Path) -> Result<()> {
    let page = decode_page(path, 0)?;
    let gray = page.to_gray().context("Unusable image")?;
    let features = ImageAnalyzer::new(config.analyzer.clone())
        .analyze(&gray)
        .with_context(|| format!("Failed to analyze {}", path.display()))?;
    let strategies = StrategySelector::new(config.selector.clone()).select(&features);

    let output = serde_json::json!({
        "page": page.id,
        "features": features,
        "strategies": strategies,
        "chains": strategies.iter().map(ToString::to_string).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_psm_override_expands_engines() {
        let config = apply_engine_overrides(PipelineConfig::default(), Some("deu".to_string()), &[4, 6]);
        let engines = &config.ocr.engines;
        assert_eq!(engines.len(), 2);
        assert_eq!(engines[0].psm, 4);
        assert_eq!(engines[1].psm, 6);
        assert!(engines.iter().all(|e| e.language == "deu"));
    }

    #[test]
    fn test_no_override_keeps_config() {
        let config = apply_engine_overrides(PipelineConfig::default(), None, &[]);
        assert_eq!(config.ocr.engines, PipelineConfig::default().ocr.engines);
    }

    #[test]
    fn test_repeated_psm_flags_parse() {
        let cli = Cli::try_parse_from(["ocrfuse", "run", "a.png", "--psm", "3", "--psm", "11", "-f", "tsv"]).unwrap();
        match cli.command {
            Command::Run { psm, format, images, .. } => {
                assert_eq!(psm, vec![3, 11]);
                assert_eq!(format, OutputFormat::Tsv);
                assert_eq!(images, vec![PathBuf::from("a.png")]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_document_id_uses_file_stem() {
        assert_eq!(document_id(Path::new("/scans/invoice-7.png")), "invoice-7");
    }
}
