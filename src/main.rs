//! nucleus-autocrop - Nucleus detection and cropping for 3D microscopy stacks
//!
//! CLI entry point

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use anyhow::{bail, Context};
use clap::Parser;
use nucleus_autocrop::{
    exit_codes,
    // Batch
    collect_image_files, BatchError, BatchRunner,
    // CLI
    AutocropArgs, Cli, Commands, ConfigExampleArgs, CropFromCoordinatesArgs,
    // Config
    example_config, AutocropParameters, CliOverrides, ConfigError,
    // Pipeline
    AutoCrop, CoordinatesBlock,
    // Progress tracking
    OutputMode, ProcessingStage, ProgressCallback, TracingProgress,
};

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Autocrop(args) => run_autocrop(&args),
        Commands::CropFromCoordinates(args) => run_crop_from_coordinates(&args),
        Commands::ConfigExample(args) => run_config_example(&args),
    };

    std::process::exit(match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code_for(&e)
        }
    });
}

/// Map an error chain onto a documented exit code
fn exit_code_for(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<ConfigError>().is_some() {
        return exit_codes::CONFIG_ERROR;
    }
    if let Some(BatchError::InputNotFound(_)) = error.downcast_ref::<BatchError>() {
        return exit_codes::INPUT_NOT_FOUND;
    }
    exit_codes::GENERAL_ERROR
}

// ============ Progress Callback Implementation ============

/// Stage lines on stderr for -v and above
struct VerboseProgress {
    mode: OutputMode,
}

impl VerboseProgress {
    fn new(mode: OutputMode) -> Self {
        Self { mode }
    }
}

impl ProgressCallback for VerboseProgress {
    fn on_stage_start(&self, image: &str, stage: ProcessingStage) {
        if self.mode.should_show(OutputMode::VeryVerbose) {
            eprintln!("  [{}] {}", image, stage);
        }
    }

    fn on_stage_complete(&self, image: &str, stage: ProcessingStage, message: &str) {
        if !self.mode.should_show(OutputMode::Verbose) {
            return;
        }
        if stage == ProcessingStage::Completed {
            eprintln!("[{}] done", image);
        } else if !message.is_empty() {
            eprintln!("  [{}] {}: {}", image, stage, message);
        }
    }

    fn on_debug(&self, message: &str) {
        if self.mode.should_show(OutputMode::VeryVerbose) {
            eprintln!("    [DEBUG] {}", message);
        }
    }
}

// ============ Autocrop Command ============

fn run_autocrop(args: &AutocropArgs) -> anyhow::Result<()> {
    nucleus_autocrop::logging::init_logging(args.verbose, args.quiet, args.log_file.as_deref())?;

    if !args.input.exists() {
        return Err(BatchError::InputNotFound(args.input.clone()).into());
    }

    // Config file problems are fatal before any image is touched
    let file_params = match &args.config {
        Some(path) => AutocropParameters::load_from_path(path)?,
        None => AutocropParameters::load()?,
    };
    let params = file_params.merge_with_cli(&create_cli_overrides(args));
    params.validate()?;

    let images = collect_image_files(&args.input)?;
    if images.is_empty() {
        return Err(BatchError::InputNotFound(args.input.clone()))
            .context("no image found in input");
    }

    if args.dry_run {
        print_execution_plan(args, &images, &params);
        return Ok(());
    }

    let mode = if args.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::from_verbosity(args.verbose)
    };
    // the bar and the stage lines do not share the terminal
    let bar_mode = if mode == OutputMode::Normal {
        OutputMode::Normal
    } else {
        OutputMode::Quiet
    };

    let runner = BatchRunner::new(AutoCrop::new(params)).output_mode(bar_mode);

    // Ctrl-C finishes the images in flight, then writes the summary
    let cancel = runner.cancel_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::warn!("got Ctrl-C, stopping after the current images");
        cancel.store(true, Ordering::SeqCst);
    }) {
        tracing::warn!(error = %e, "could not install the Ctrl-C handler");
    }

    // quiet runs still leave stage events in the log file
    let progress: Box<dyn ProgressCallback> = if args.quiet {
        Box::new(TracingProgress)
    } else {
        Box::new(VerboseProgress::new(mode))
    };
    let report = runner.run(&images, &args.input, &args.output, progress.as_ref())?;

    let summary = report.summary();
    if summary.cancelled > 0 {
        tracing::warn!(cancelled = summary.cancelled, "batch cancelled");
    }
    if !args.quiet {
        summary.print(report.elapsed_seconds);
        if let Some(path) = &report.summary_path {
            println!("Summary: {}", path.display());
        }
    }

    if summary.failed > 0 {
        bail!("{} image(s) failed to process", summary.failed);
    }
    Ok(())
}

// ============ Crop From Coordinates Command ============

fn run_crop_from_coordinates(args: &CropFromCoordinatesArgs) -> anyhow::Result<()> {
    nucleus_autocrop::logging::init_logging(args.verbose, false, None)?;

    for path in [&args.coordinates, &args.image] {
        if !path.exists() {
            return Err(BatchError::InputNotFound(path.clone()).into());
        }
    }

    let block = CoordinatesBlock::load(&args.coordinates)
        .with_context(|| format!("reading {}", args.coordinates.display()))?;

    let overrides = CliOverrides {
        xcal: args.xcal,
        ycal: args.ycal,
        zcal: args.zcal,
        ..CliOverrides::new()
    };
    let params = AutocropParameters::default().merge_with_cli(&overrides);
    params.validate()?;

    let report = AutoCrop::new(params).crop_from_coordinates(&block, &args.image, &args.output)?;

    println!(
        "{} crop(s) written to {}",
        report.written(),
        args.output.display()
    );
    for failure in &report.failures {
        eprintln!(
            "  crop {} channel {}: {}",
            failure.crop_id, failure.channel, failure.reason
        );
    }

    if report.has_failures() {
        bail!("{} crop(s) failed", report.failures.len());
    }
    Ok(())
}

// ============ Config Example Command ============

fn run_config_example(args: &ConfigExampleArgs) -> anyhow::Result<()> {
    let text = example_config();
    match &args.output {
        Some(path) => {
            std::fs::write(path, text)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Example config written to {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

// ============ Helper Functions ============

/// Only flags the user actually gave override the config file
fn create_cli_overrides(args: &AutocropArgs) -> CliOverrides {
    let mut overrides = CliOverrides::new();

    overrides.xcal = args.xcal;
    overrides.ycal = args.ycal;
    overrides.zcal = args.zcal;
    overrides.channel = args.channel;
    overrides.threads = args.threads;

    if args.no_merge {
        overrides.merge = Some(false);
    }
    if args.no_projection {
        overrides.z_projection = Some(false);
    }

    overrides
}

/// Print execution plan for dry-run mode
fn print_execution_plan(args: &AutocropArgs, images: &[PathBuf], params: &AutocropParameters) {
    println!("=== Dry Run - Execution Plan ===");
    println!();
    println!("Input: {}", args.input.display());
    println!("Output: {}", args.output.display());
    println!("Images to process: {}", images.len());
    println!();
    println!("Parameters:");
    println!(
        "  Threshold: Otsu on channel {}, floor {}, fallback from slice {}",
        params.channel_to_compute_threshold,
        params.threshold_otsu_computing,
        if params.slices_otsu_computing == 0 {
            "depth/2".to_string()
        } else {
            params.slices_otsu_computing.to_string()
        }
    );
    println!(
        "  Volume range: [{}, {}]",
        params.min_volume_nucleus, params.max_volume_nucleus
    );
    println!(
        "  Margins: x={} y={} z={}",
        params.x_crop_box_size, params.y_crop_box_size, params.z_crop_box_size
    );
    println!("  Connectivity: {}", params.connectivity);
    if params.boxes_regroupement {
        println!(
            "  Box merge: ENABLED ({}% of the smaller box)",
            params.boxes_percent_surface_to_filter
        );
    } else {
        println!("  Box merge: DISABLED");
    }
    match params.manual_calibration() {
        Some(cal) => println!("  Calibration: manual {}", cal),
        None => println!("  Calibration: from image metadata"),
    }
    println!(
        "  Z-projection: {}",
        if params.z_projection { "YES" } else { "NO" }
    );
    println!(
        "  Threads: {}",
        params.threads.unwrap_or_else(num_cpus::get)
    );
    println!();
    println!("Images:");
    for (i, image) in images.iter().enumerate() {
        println!("  {}. {}", i + 1, display_relative(image, &args.input));
    }
}

fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .ok()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(path)
        .display()
        .to_string()
}
