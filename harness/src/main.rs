use async_trait::async_trait;
use clap::{ArgAction, Parser};
use harness::console;
use harness::output_mode::{is_ci_environment, stdout_is_tty};
use harness::prelude::*;
use harness::{init_logging, select_output_mode, ChangeHandler, FileWatcher};
use runners::ProcessExecutor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "polytest")]
#[command(about = "Run tests across every service of a multi-language project")]
struct Cli {
    /// Test type to run: unit, integration, e2e or all
    #[arg(short, long = "type", default_value = "all")]
    test_type: TestType,
    /// Only test these services (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    service: Vec<String>,
    /// Collect coverage
    #[arg(long)]
    coverage: bool,
    /// Minimum aggregate line coverage percentage; 0 disables the check
    #[arg(long, default_value_t = 0.0)]
    threshold: f64,
    /// Stop at the first service that cannot run its tests
    #[arg(long)]
    fail_fast: bool,
    /// Run services concurrently
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    parallel: bool,
    #[arg(long, value_enum, default_value = "default")]
    output_format: ReportFormat,
    /// Directory for test and coverage reports
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,
    /// Per-service timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout: u64,
    /// Re-run affected services when source files change
    #[arg(short, long)]
    watch: bool,
    /// Always stream raw tool output
    #[arg(long, conflicts_with = "no_stream")]
    stream: bool,
    /// Show progress lines instead of tool output
    #[arg(long)]
    no_stream: bool,
    /// Validate services and show what would run
    #[arg(long)]
    dry_run: bool,
    /// Write detected test configuration into the manifest and exit
    #[arg(long)]
    save_config: bool,
    #[arg(short, long)]
    verbose: bool,
    /// Path to polytest.yaml; discovered from the working directory by default
    #[arg(long)]
    manifest: Option<PathBuf>,
}

impl Cli {
    fn test_config(&self) -> TestConfig {
        TestConfig::new()
            .with_parallel(self.parallel)
            .with_fail_fast(self.fail_fast)
            .with_coverage(self.coverage)
            .with_coverage_threshold(self.threshold)
            .with_output_dir(&self.output_dir)
            .with_verbose(self.verbose)
            .with_timeout(Duration::from_secs(self.timeout))
    }

    fn selects(&self, service: &ServiceInfo) -> bool {
        self.service.is_empty() || self.service.contains(&service.name)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let manifest = match &cli.manifest {
        Some(path) => Manifest::load(path)?,
        None => Manifest::discover(&std::env::current_dir()?)?,
    };
    let config = cli.test_config();
    config.validate()?;

    let selected: Vec<ServiceInfo> = manifest
        .services
        .iter()
        .filter(|s| cli.selects(s))
        .cloned()
        .collect();

    if cli.save_config {
        let validations = harness::validate_services(&selected);
        let configs = harness::detected_test_configs(&selected, &validations);
        if configs.is_empty() {
            println!("No detected test configuration to save");
            return Ok(());
        }
        print!("{}", harness::generate_test_config_yaml(&configs)?);
        let saved = harness::save_test_configs(&manifest.path, &configs)?;
        println!(
            "Saved test configuration for {} service(s) to {}",
            saved.len(),
            manifest.path.display()
        );
        return Ok(());
    }

    let options = OutputOptions {
        force_stream: cli.stream,
        force_progress: cli.no_stream,
        parallel: cli.parallel,
    };
    let mode = select_output_mode(&options, selected.len(), stdout_is_tty(), is_ci_environment());
    info!(
        manifest = %manifest.path.display(),
        services = selected.len(),
        mode = %mode,
        "starting"
    );

    let orchestrator = TestOrchestrator::new(config)
        .with_services(manifest.services)
        .with_executor(Arc::new(ProcessExecutor::new().with_echo(mode.echo())))
        .with_progress_callback(|event| {
            if let Some(line) = console::progress_line(event) {
                println!("{line}");
            }
        });

    if cli.dry_run {
        let validations = harness::validate_services(&selected);
        print!("{}", console::render_validation(&validations));
        return Ok(());
    }

    let reporter = ReportGenerator::new(cli.output_format, &cli.output_dir);
    let session = Session {
        orchestrator: &orchestrator,
        reporter: &reporter,
        test_type: cli.test_type,
        filter: cli.service.clone(),
    };

    let outcome = session.run(&session.filter).await;

    if !cli.watch {
        if !outcome?.success {
            std::process::exit(1);
        }
        return Ok(());
    }
    if let Err(e) = outcome {
        error!(error = %e, "initial test run failed");
    }

    let mut watcher =
        FileWatcher::for_services(selected.into_iter().map(|s| (s.name, s.dir)));
    println!("\nWatching for file changes... (Press Ctrl+C to stop)");
    watcher
        .watch(&session, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for interrupt");
            }
        })
        .await?;
    println!("Stopped watching");
    Ok(())
}

/// One configured test run that can be repeated by the watcher.
struct Session<'a> {
    orchestrator: &'a TestOrchestrator,
    reporter: &'a ReportGenerator,
    test_type: TestType,
    /// Services requested on the command line; empty means all
    filter: Vec<String>,
}

impl Session<'_> {
    async fn run(&self, filter: &[String]) -> Result<AggregateResult, harness::OrchestratorError> {
        let (results, _) = self
            .orchestrator
            .execute_tests_with_validation(self.test_type, filter)
            .await?;

        if let Err(e) = self.reporter.generate(&results) {
            warn!(error = %e, format = ?self.reporter.format(), "failed to write test report");
        }
        if self.reporter.format() == ReportFormat::Default {
            print!("{}", console::render_summary(&results));
        }
        Ok(results)
    }
}

#[async_trait]
impl ChangeHandler for Session<'_> {
    async fn on_change(&self, services: Vec<String>, files: Vec<PathBuf>) {
        println!("\nChanges detected in {} file(s), re-running tests...", files.len());
        let filter = if services.is_empty() {
            &self.filter
        } else {
            &services
        };
        if let Err(e) = self.run(filter).await {
            error!(error = %e, "test run failed");
        }
        println!("\nWatching for file changes... (Press Ctrl+C to stop)");
    }
}
