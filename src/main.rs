use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vulscan::{
    cache::Cache,
    config::Config,
    logging::{init_tracing, LogFormat},
    manifest::ManifestKind,
    model::{Ecosystem, ScanReport, ScanRequest, Severity},
    orchestrator::Orchestrator,
    output::{format_report_to_string, print_report, OutputFormat},
    source::default_sources,
};

/// Exit codes for CI integration
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const CRITICAL_VULN: u8 = 2;
    pub const HIGH_VULN: u8 = 3;
    pub const MEDIUM_VULN: u8 = 4;
    pub const LOW_VULN: u8 = 5;
    pub const ERROR: u8 = 1;
}

#[derive(Parser)]
#[command(name = "vulscan")]
#[command(
    author,
    version,
    about = "Resolve known vulnerabilities in project dependencies and plan their remediation"
)]
struct Cli {
    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log format (pretty, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a project's dependency manifests
    Scan {
        /// Project root to scan
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Only scan these ecosystems (npm, pypi, maven, go, cargo, rubygems, packagist, nuget, vcpkg, conan)
        #[arg(short, long = "ecosystem")]
        ecosystems: Vec<String>,

        /// Output format (table, json, markdown, sarif)
        #[arg(short, long)]
        format: Option<String>,

        /// Write output to file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Exit with error if vulnerabilities at or above this severity are found
        #[arg(long, value_enum)]
        fail_on: Option<FailLevel>,

        /// Do not read or write cached source responses
        #[arg(long)]
        no_cache: bool,

        /// Clear cache before scanning
        #[arg(long)]
        clear_cache: bool,

        /// Overall scan timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Maximum dependencies queried at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// NVD API key (overrides config and NVD_API_KEY)
        #[arg(long)]
        nvd_api_key: Option<String>,

        /// Skip the NVD source
        #[arg(long)]
        no_nvd: bool,

        /// Skip the OSV source
        #[arg(long)]
        no_osv: bool,
    },

    /// List supported ecosystems and manifests
    ListEcosystems,

    /// Show or create config file
    Config {
        /// Generate default config file
        #[arg(long)]
        init: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Clear the cache
    ClearCache,
}

#[derive(Clone, Copy, ValueEnum)]
enum FailLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl FailLevel {
    fn threshold(self) -> Severity {
        match self {
            FailLevel::Critical => Severity::Critical,
            FailLevel::High => Severity::High,
            FailLevel::Medium => Severity::Medium,
            FailLevel::Low => Severity::Low,
        }
    }
}

struct ScanArgs {
    path: PathBuf,
    ecosystems: Vec<String>,
    format: Option<String>,
    output: Option<PathBuf>,
    fail_on: Option<FailLevel>,
    no_cache: bool,
    clear_cache: bool,
    timeout: Option<u64>,
    concurrency: Option<usize>,
    nvd_api_key: Option<String>,
    no_nvd: bool,
    no_osv: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

async fn run() -> Result<u8> {
    let cli = Cli::parse();

    let log_format = LogFormat::from_str(&cli.log_format).map_err(|e| anyhow::anyhow!(e))?;
    init_tracing(&cli.log_level, log_format)?;

    let config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        let mut config = Config::default();
        config.apply_env_overrides(std::env::var(vulscan::config::NVD_API_KEY_ENV).ok());
        config
    });

    match cli.command {
        Commands::Scan {
            path,
            ecosystems,
            format,
            output,
            fail_on,
            no_cache,
            clear_cache,
            timeout,
            concurrency,
            nvd_api_key,
            no_nvd,
            no_osv,
        } => {
            let args = ScanArgs {
                path,
                ecosystems,
                format,
                output,
                fail_on,
                no_cache,
                clear_cache,
                timeout,
                concurrency,
                nvd_api_key,
                no_nvd,
                no_osv,
            };
            run_scan(config, args).await
        }
        Commands::ListEcosystems => {
            list_ecosystems();
            Ok(exit_codes::SUCCESS)
        }
        Commands::Config { init, path } => {
            handle_config(init, path)?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::ClearCache => {
            let removed = Cache::with_ttl_hours(config.cache_ttl_hours).clear()?;
            println!("Cache cleared ({} entries).", removed);
            Ok(exit_codes::SUCCESS)
        }
    }
}

async fn run_scan(mut config: Config, args: ScanArgs) -> Result<u8> {
    let format_str = args.format.unwrap_or_else(|| config.default_format.clone());
    let format = OutputFormat::from_str(&format_str).map_err(|e| anyhow::anyhow!(e))?;
    let is_interactive = format == OutputFormat::Table && args.output.is_none();

    let ecosystems = args
        .ecosystems
        .iter()
        .map(|e| parse_ecosystem(e))
        .collect::<Result<Vec<_>>>()?;

    // CLI flags override the config file and environment
    if let Some(key) = args.nvd_api_key {
        config.nvd.api_key = Some(key);
    }
    if args.no_nvd {
        config.nvd.enabled = false;
    }
    if args.no_osv {
        config.osv.enabled = false;
    }
    if let Some(secs) = args.timeout {
        config.scan_timeout_secs = secs;
    }
    if let Some(n) = args.concurrency {
        config.concurrency = n;
    }

    let cache = Cache::with_ttl_hours(config.cache_ttl_hours);
    if args.clear_cache {
        let removed = cache.clear()?;
        debug!(removed, "cache cleared");
    }

    if config.nvd.enabled && config.nvd.api_key.is_none() {
        debug!("no NVD API key configured, requests will be rate limited more aggressively");
    }

    let sources = default_sources(&config, (!args.no_cache).then_some(cache))?;
    let orchestrator = Orchestrator::from_config(&config, sources);
    let request = ScanRequest::new(&args.path).with_ecosystems(ecosystems);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let progress = if is_interactive {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .context("invalid progress template")?,
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message(format!("Scanning {}...", args.path.display()));
        Some(pb)
    } else {
        None
    };

    let result = orchestrator.scan(&request, cancel).await;

    if let Some(pb) = &progress {
        match &result {
            Ok(report) => pb.finish_with_message(format!(
                "Checked {} dependencies, {} vulnerable",
                report.total_scanned, report.vulnerable_count
            )),
            Err(_) => pb.abandon(),
        }
    }

    let report = result?;

    if let Some(path) = &args.output {
        let content = format_report_to_string(&report, format)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        println!("Results written to: {}", path.display());
    } else {
        print_report(&report, format)?;
    }

    Ok(determine_exit_code(&report, args.fail_on))
}

/// Determine the exit code based on findings and the --fail-on setting
fn determine_exit_code(report: &ScanReport, fail_on: Option<FailLevel>) -> u8 {
    let Some(fail_on) = fail_on else {
        return exit_codes::SUCCESS;
    };

    match report.max_severity() {
        Some(worst) if worst >= fail_on.threshold() => match worst {
            Severity::Critical => exit_codes::CRITICAL_VULN,
            Severity::High => exit_codes::HIGH_VULN,
            Severity::Medium => exit_codes::MEDIUM_VULN,
            Severity::Low => exit_codes::LOW_VULN,
        },
        _ => exit_codes::SUCCESS,
    }
}

fn list_ecosystems() {
    println!("Supported ecosystems:");
    println!();

    for ecosystem in Ecosystem::ALL {
        let manifests: Vec<&str> = ManifestKind::ALL
            .iter()
            .filter(|kind| kind.ecosystem() == ecosystem)
            .map(|kind| kind.file_pattern())
            .collect();
        let osv = if ecosystem.osv_name().is_some() { "NVD, OSV" } else { "NVD" };

        println!("  {:<12} {:<12} [sources: {}]", ecosystem.as_str(), ecosystem.display_name(), osv);
        println!("  {:<12} Manifests: {}", "", manifests.join(", "));
        println!();
    }
}

fn handle_config(init: bool, show_path: bool) -> Result<()> {
    let config_path = Config::config_path();

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        let config = Config::default();
        config.save()?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("Default configuration:");
        println!("{}", Config::generate_default_config());
        return Ok(());
    }

    // Show current config
    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'vulscan config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
    }

    Ok(())
}

fn parse_ecosystem(s: &str) -> Result<Ecosystem> {
    Ecosystem::from_str_loose(s).ok_or_else(|| {
        let names: Vec<&str> = Ecosystem::ALL.iter().map(|e| e.as_str()).collect();
        anyhow::anyhow!("Unknown ecosystem: {}. Use: {}", s, names.join(", "))
    })
}
