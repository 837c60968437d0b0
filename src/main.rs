use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use site_forcing::default_app_root;
use site_forcing::machine::{MachineProfileStore, DEFAULT_MACHINE};
use site_forcing::pipeline::controller::{PipelineOptions, SiteForcingPipeline};
use site_forcing::pipeline::naming::RunStamp;
use site_forcing::pipeline::runlog::{format_summary_marker, ForcingSummaryMarkerPayload};
use site_forcing::pipeline::runtime::{SharedToolCommandRunner, StdToolCommandRunner};
use site_forcing::pipeline::settings_layer::{load_forcing_settings, ForcingSettings};
use site_forcing::recipe::{discover_recipe_files, load_recipe_file};
use site_forcing::storage::{ConflictPolicy, ConflictResolution, ConflictResolver, StorageError};
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    if cli_args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_usage();
        return Ok(());
    }
    let parsed = match parse_cli_args(cli_args.as_slice()) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("{err}\n");
            print_usage();
            std::process::exit(2);
        }
    };

    let app_root = default_app_root();
    let settings = load_forcing_settings(app_root.as_path(), parsed.settings_path.as_deref())?;
    let stamp = RunStamp::today();
    let log_path = init_tracing(settings.log_dir.as_path(), &stamp)?;
    info!(log = %log_path.display(), app_root = %app_root.display(), "site forcing started");

    if let Err(err) = run_recipes(&parsed, &settings, stamp) {
        error!(error = %err, "site forcing failed");
        return Err(err);
    }
    Ok(())
}

/// Console on stderr plus an append-only `<log_dir>/<YYYY-MM-DD>.log`.
fn init_tracing(log_dir: &Path, stamp: &RunStamp) -> Result<PathBuf, Box<dyn std::error::Error>> {
    fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(format!("{}.log", stamp.iso()));
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path.as_path())?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .try_init();
    Ok(log_path)
}

fn run_recipes(
    parsed: &ForcingCliArgs,
    settings: &ForcingSettings,
    stamp: RunStamp,
) -> Result<(), Box<dyn std::error::Error>> {
    let machine = Arc::new(
        MachineProfileStore::load(settings.machine_profiles.as_path())?
            .resolve(parsed.machine.as_str())?,
    );
    let runner: SharedToolCommandRunner = Arc::new(StdToolCommandRunner);
    let resolver: Box<dyn ConflictResolver> = match parsed.on_conflict {
        ConflictMode::Prompt => Box::new(PromptConflictResolver),
        ConflictMode::Policy(policy) => Box::new(policy),
    };

    let recipe_paths = match &parsed.source {
        RecipeSource::File(path) => vec![path.clone()],
        RecipeSource::Dir(dir) => discover_recipe_files(dir.as_path())?,
    };
    info!(recipes = recipe_paths.len(), machine = %machine.name(), "recipes queued");

    for path in recipe_paths {
        info!(recipe = %path.display(), "loading recipe");
        let recipe = load_recipe_file(path.as_path())?;
        let mut pipeline = SiteForcingPipeline::new(
            recipe,
            machine.clone(),
            runner.clone(),
            resolver.as_ref(),
            PipelineOptions::from_settings(settings, stamp),
        )?;
        let summary = pipeline.run()?;
        let marker = format_summary_marker(&ForcingSummaryMarkerPayload {
            site_code: summary.site_code.clone(),
            version: summary.version.clone(),
            summary_path: pipeline.layout().summary_path().display().to_string(),
            archive_path: summary.archive_path.display().to_string(),
            artifacts: summary.artifacts.len(),
        })?;
        println!("{marker}");
    }
    Ok(())
}

/// Asks on the terminal whether an existing output directory may be replaced.
/// Anything but an explicit yes aborts.
struct PromptConflictResolver;

impl ConflictResolver for PromptConflictResolver {
    fn resolve(&self, path: &Path) -> Result<ConflictResolution, StorageError> {
        let read_error = |source: io::Error| StorageError::Filesystem {
            action: "read conflict answer for",
            path: path.to_path_buf(),
            source,
        };
        let stdin = io::stdin();
        loop {
            eprint!(
                "Output directory '{}' already exists. Delete and recreate it? [y/N]: ",
                path.display()
            );
            io::stderr().flush().map_err(read_error)?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).map_err(read_error)? == 0 {
                return Ok(ConflictResolution::Abort);
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(ConflictResolution::Overwrite),
                "" | "n" | "no" => return Ok(ConflictResolution::Abort),
                _ => eprintln!("Please answer 'y' or 'n'."),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RecipeSource {
    File(PathBuf),
    Dir(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConflictMode {
    Prompt,
    Policy(ConflictPolicy),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ForcingCliArgs {
    source: RecipeSource,
    machine: String,
    settings_path: Option<String>,
    on_conflict: ConflictMode,
}

fn parse_cli_args(args: &[String]) -> Result<ForcingCliArgs, Box<dyn std::error::Error>> {
    let mut file = None::<PathBuf>;
    let mut dir = None::<PathBuf>;
    let mut machine = None::<String>;
    let mut settings_path = None::<String>;
    let mut on_conflict = ConflictMode::Prompt;

    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1) else {
                return Err(io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "-f" | "--file" => {
                file = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "-d" | "--dir" => {
                dir = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "-m" | "--machine" => {
                machine = Some(needs_value(i)?);
                i += 2;
            }
            "--settings" => {
                settings_path = Some(needs_value(i)?);
                i += 2;
            }
            "--on-conflict" => {
                let value = needs_value(i)?;
                on_conflict = if value.trim().eq_ignore_ascii_case("prompt") {
                    ConflictMode::Prompt
                } else {
                    ConflictMode::Policy(ConflictPolicy::parse(value.as_str()).ok_or_else(
                        || io::Error::other(format!("Unknown --on-conflict value: {value}")),
                    )?)
                };
                i += 2;
            }
            unknown => {
                return Err(io::Error::other(format!("Unknown argument: {unknown}")).into());
            }
        }
    }

    let source = match (file, dir) {
        (Some(_), Some(_)) => {
            return Err(io::Error::other("Use either -f or -d, not both").into());
        }
        (Some(file), None) => RecipeSource::File(file),
        (None, Some(dir)) => RecipeSource::Dir(dir),
        (None, None) => {
            return Err(io::Error::other("Missing recipe: pass -f <recipe> or -d <dir>").into());
        }
    };
    let machine = machine
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_MACHINE.to_string());

    Ok(ForcingCliArgs {
        source,
        machine,
        settings_path,
        on_conflict,
    })
}

fn print_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  create-site-forcing (-f <recipe.yml> | -d <recipe-dir>) [-m <machine>] ",
        "[--settings <forcing.settings.toml>] [--on-conflict prompt|abort|overwrite|fail]\n\n",
        "Defaults:\n",
        "  -m defaults to 'saga'; machines come from config/machine_properties.yaml\n",
        "  settings default: config/forcing.settings.toml under $SITE_FORCING_ROOT or the working directory\n",
        "  --on-conflict defaults to prompt (asks before replacing an existing output directory)\n"
    ));
}
