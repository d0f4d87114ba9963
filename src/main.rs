use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use liquid_template_validator::config::{Args, Config, OutputFormat};
use liquid_template_validator::watch::{TemplateWatcher, WatchEvent, is_template};
use liquid_template_validator::{ValidationReport, Validator};

/// Verdict for one template file
#[derive(Debug, Serialize)]
struct FileReport {
    path: String,
    #[serde(flatten)]
    report: ValidationReport,
}

/// Expand directories into the `*.liquid` files below them, sorted
fn collect_templates(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut templates = Vec::new();
    for path in paths {
        if path.is_dir() {
            walk_dir(path, &mut templates)?;
        } else {
            templates.push(path.clone());
        }
    }
    Ok(templates)
}

fn walk_dir(dir: &Path, templates: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in entries {
        if path.is_dir() {
            walk_dir(&path, templates)?;
        } else if is_template(&path) {
            templates.push(path);
        }
    }
    Ok(())
}

async fn validate_file(validator: &Validator, path: &Path) -> Result<FileReport> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read template: {}", path.display()))?;
    Ok(FileReport {
        path: path.display().to_string(),
        report: validator.validate_bytes(&bytes),
    })
}

fn render_text(report: &FileReport) -> Vec<String> {
    let errors = report
        .report
        .errors
        .iter()
        .map(|e| format!("{}: error: {}", report.path, e));
    let warnings = report
        .report
        .warnings
        .iter()
        .map(|w| format!("{}: warning: {}", report.path, w));

    errors
        .chain(warnings)
        .chain(std::iter::once(format!(
            "{}: {}",
            report.path,
            report.report.summary()
        )))
        .collect()
}

fn print_reports(reports: &[FileReport], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for report in reports {
                for line in render_text(report) {
                    println!("{}", line);
                }
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(reports).context("Failed to encode report")?;
            println!("{}", json);
        }
    }
    Ok(())
}

async fn watch(validator: &Validator, paths: &[PathBuf], format: OutputFormat) -> Result<()> {
    let mut watcher = TemplateWatcher::new(paths)?;

    loop {
        tokio::select! {
            event = watcher.next_event() => match event {
                Some(WatchEvent::TemplateChanged(path)) => {
                    match validate_file(validator, &path).await {
                        Ok(report) => print_reports(&[report], format)?,
                        Err(e) => log::warn!("{:#}", e),
                    }
                }
                Some(WatchEvent::WatcherError(e)) => log::error!("File watcher error: {}", e),
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, stopping watch");
                return Ok(());
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config = Config::from_args(&args.validation)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    let validator = Validator::new(config.to_options());
    let templates = collect_templates(&args.paths)?;
    log::info!("Validating {} template(s)", templates.len());

    let mut reports = Vec::with_capacity(templates.len());
    for path in &templates {
        reports.push(validate_file(&validator, path).await?);
    }
    print_reports(&reports, args.format)?;

    let invalid = reports.iter().filter(|r| !r.report.valid).count();

    if args.watch {
        watch(&validator, &args.paths, args.format).await?;
    }

    Ok(if invalid > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
