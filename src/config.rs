//! Configuration management for the Liquid template validator.
//!
//! Handles:
//! - Command-line argument parsing for `liquid-lint` and `liquid-ls`
//! - Project (`.liquid-lint.toml`) and user-global TOML settings
//! - Building [`ValidatorOptions`] from the merged result
//!
//! Precedence is command line, then project file, then global file, then
//! built-in defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, ValueEnum};
use serde::Deserialize;

use crate::storage::{DirectoryStore, SourceType};
use crate::validation::ValidatorOptions;
use crate::validation::includes::timeout_from_millis;

/// Project configuration file looked up in the working directory
pub const PROJECT_CONFIG_FILE: &str = ".liquid-lint.toml";

/// Validation settings shared by both binaries
#[derive(Debug, Clone, Default, ClapArgs)]
pub struct ValidationArgs {
    /// Variable roots templates may reference (repeatable)
    #[arg(long = "allow-var", value_name = "NAME")]
    pub allow_var: Vec<String>,

    /// Variables templates must assign or output (repeatable)
    #[arg(long = "require-var", value_name = "NAME")]
    pub require_var: Vec<String>,

    /// Skip the FHIR converter rules
    #[arg(long)]
    pub no_fhir: bool,

    /// Source type used as the storage namespace for includes
    #[arg(long, alias = "source-type", value_name = "SOURCE_TYPE")]
    pub namespace: Option<String>,

    /// Directory holding included templates by storage key
    #[arg(long, value_name = "DIR")]
    pub template_root: Option<PathBuf>,

    /// Report unknown filters and undefined variables as errors
    #[arg(long)]
    pub strict: bool,

    /// Follow includes through the template root up to this depth
    #[arg(long, value_name = "DEPTH")]
    pub include_depth: Option<usize>,

    /// Budget for include existence checks, in milliseconds
    #[arg(long, value_name = "MS")]
    pub include_timeout_ms: Option<u64>,

    /// Explicit configuration file instead of `.liquid-lint.toml`
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(
        long,
        default_value = "warn",
        help = "Log level (trace, debug, info, warn, error)"
    )]
    pub log_level: String,
}

/// Output format of `liquid-lint`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Command-line arguments for `liquid-lint`
#[derive(Debug, Parser)]
#[command(name = "liquid-lint")]
#[command(about = "Validate Liquid templates for the FHIR converter")]
#[command(version)]
pub struct Args {
    /// Template files or directories to scan for `*.liquid`
    #[arg(required = true, value_name = "PATH")]
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub validation: ValidationArgs,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Re-validate files whenever they change
    #[arg(long)]
    pub watch: bool,
}

/// Command-line arguments for `liquid-ls`
#[derive(Debug, Parser)]
#[command(name = "liquid-ls")]
#[command(about = "Language server for Liquid templates")]
#[command(version)]
pub struct ServerArgs {
    #[command(flatten)]
    pub validation: ValidationArgs,
}

/// Settings as they appear in a TOML file; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileSettings {
    pub allowed_variables: Option<Vec<String>>,
    pub required_variables: Option<Vec<String>>,
    pub fhir_validation: Option<bool>,
    pub namespace: Option<String>,
    pub template_root: Option<PathBuf>,
    pub strict: Option<bool>,
    pub include_depth: Option<usize>,
    pub include_timeout_ms: Option<u64>,
}

impl FileSettings {
    /// Parse a settings file; relative template roots resolve against its directory
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut settings: FileSettings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config TOML: {}", path.display()))?;

        if let (Some(root), Some(dir)) = (&settings.template_root, path.parent()) {
            if root.is_relative() {
                settings.template_root = Some(dir.join(root));
            }
        }
        Ok(settings)
    }

    /// Layer `other` on top of `self`
    fn overlay(self, other: FileSettings) -> FileSettings {
        FileSettings {
            allowed_variables: other.allowed_variables.or(self.allowed_variables),
            required_variables: other.required_variables.or(self.required_variables),
            fhir_validation: other.fhir_validation.or(self.fhir_validation),
            namespace: other.namespace.or(self.namespace),
            template_root: other.template_root.or(self.template_root),
            strict: other.strict.or(self.strict),
            include_depth: other.include_depth.or(self.include_depth),
            include_timeout_ms: other.include_timeout_ms.or(self.include_timeout_ms),
        }
    }
}

/// Combined configuration from all sources
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub allowed_variables: Vec<String>,
    pub required_variables: Vec<String>,
    pub fhir_validation: bool,
    pub namespace: Option<SourceType>,
    pub template_root: Option<PathBuf>,
    pub strict: bool,
    pub include_depth: Option<usize>,
    pub include_timeout: Option<Duration>,
    pub log_level: String,
    /// Project file that contributed settings, if any
    pub project_config_path: Option<PathBuf>,
}

impl Config {
    /// Resolve configuration for the current directory and the user's config dir
    pub fn from_args(args: &ValidationArgs) -> Result<Self> {
        let global = dirs::config_dir().map(|dir| dir.join("liquid-lint").join("config.toml"));
        let project_dir = std::env::current_dir().context("Failed to read working directory")?;
        Self::load_from_paths(args, &project_dir, global.as_deref())
    }

    /// Resolve configuration from explicit locations (useful for testing)
    pub fn load_from_paths(
        args: &ValidationArgs,
        project_dir: &Path,
        global_config: Option<&Path>,
    ) -> Result<Self> {
        let mut settings = FileSettings::default();

        if let Some(path) = global_config.filter(|path| path.is_file()) {
            log::debug!("Loading global config: {}", path.display());
            settings = settings.overlay(FileSettings::load(path)?);
        }

        let project_config_path = match &args.config {
            Some(path) => Some(path.clone()),
            None => Some(project_dir.join(PROJECT_CONFIG_FILE)).filter(|path| path.is_file()),
        };
        if let Some(path) = &project_config_path {
            log::debug!("Loading project config: {}", path.display());
            settings = settings.overlay(FileSettings::load(path)?);
        }

        Self::merge(args, settings, project_config_path)
    }

    fn merge(
        args: &ValidationArgs,
        settings: FileSettings,
        project_config_path: Option<PathBuf>,
    ) -> Result<Self> {
        let namespace = args
            .namespace
            .clone()
            .or(settings.namespace)
            .map(|value| SourceType::parse(&value))
            .transpose()?;

        // Repeated flags replace the file's list rather than extend it
        fn pick(cli: &[String], file: Option<Vec<String>>) -> Vec<String> {
            if cli.is_empty() {
                file.unwrap_or_default()
            } else {
                cli.to_vec()
            }
        }

        Ok(Config {
            allowed_variables: pick(&args.allow_var, settings.allowed_variables),
            required_variables: pick(&args.require_var, settings.required_variables),
            fhir_validation: !args.no_fhir && settings.fhir_validation.unwrap_or(true),
            namespace,
            template_root: args.template_root.clone().or(settings.template_root),
            strict: args.strict || settings.strict.unwrap_or(false),
            include_depth: args.include_depth.or(settings.include_depth),
            include_timeout: args
                .include_timeout_ms
                .or(settings.include_timeout_ms)
                .and_then(timeout_from_millis),
            log_level: args.log_level.clone(),
            project_config_path,
        })
    }

    pub fn has_project_config(&self) -> bool {
        self.project_config_path.is_some()
    }

    /// Validator options for this configuration
    pub fn to_options(&self) -> ValidatorOptions {
        let mut options = ValidatorOptions::default()
            .with_allowed_variables(self.allowed_variables.iter().cloned())
            .with_required_variables(self.required_variables.iter().cloned());
        options.fhir_validation = self.fhir_validation;
        options.strict = self.strict;
        options.include_depth = self.include_depth;
        options.include_timeout = self.include_timeout;
        options.namespace = self.namespace.as_ref().map(|ns| ns.to_string());

        if let Some(root) = &self.template_root {
            options.store = Some(Arc::new(DirectoryStore::new(root)));
        }
        options
    }
}
