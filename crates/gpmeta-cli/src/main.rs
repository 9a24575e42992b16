use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use gpmeta_core::{
    CancellationToken, ExifTool, PipelineOptions, RunReport,
};

#[derive(Parser)]
#[command(
    name = "gpmeta",
    version,
    about = "Restore Google Photos Takeout metadata from JSON sidecars into media files"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a directory and show pairing statistics without changing anything
    Stats {
        /// Directory to scan
        directory: PathBuf,

        /// Scan subdirectories recursively
        #[arg(short, long)]
        recursive: bool,
    },

    /// Attach sidecar metadata to media files (sidecars are preserved)
    Attach {
        /// Directory containing media and sidecar files
        directory: PathBuf,

        /// Process subdirectories recursively
        #[arg(short, long)]
        recursive: bool,

        /// Show what would be done without making changes
        #[arg(long)]
        dry_run: bool,

        /// Skip read-back verification after writing
        #[arg(long)]
        no_verify: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Worker threads for exiftool invocations (0 = auto)
        #[arg(long, default_value_t = 0)]
        jobs: usize,
    },

    /// Delete sidecars whose metadata verifies in the paired media file
    Cleanup {
        /// Directory containing sidecar files to clean up
        directory: PathBuf,

        /// Process subdirectories recursively
        #[arg(short, long)]
        recursive: bool,

        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,

        /// Delete without verifying metadata was written (DANGEROUS)
        #[arg(long)]
        no_verify: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Worker threads for exiftool invocations (0 = auto)
        #[arg(long, default_value_t = 0)]
        jobs: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Stats {
            directory,
            recursive,
        } => cmd_stats(directory, recursive)?,
        Command::Attach {
            directory,
            recursive,
            dry_run,
            no_verify,
            yes,
            jobs,
        } => cmd_attach(directory, recursive, dry_run, no_verify, yes, jobs)?,
        Command::Cleanup {
            directory,
            recursive,
            dry_run,
            no_verify,
            yes,
            jobs,
        } => cmd_cleanup(directory, recursive, dry_run, no_verify, yes, jobs)?,
    };
    std::process::exit(code);
}

fn cmd_stats(directory: PathBuf, recursive: bool) -> anyhow::Result<i32> {
    let options = PipelineOptions {
        recursive,
        ..PipelineOptions::new(directory)
    };
    let bar = progress_bar();
    let report = gpmeta_core::run_stats(&options, &bar_callback(&bar))?;
    bar.finish_and_clear();
    print_report(&report, false);
    Ok(0)
}

fn cmd_attach(
    directory: PathBuf,
    recursive: bool,
    dry_run: bool,
    no_verify: bool,
    yes: bool,
    jobs: usize,
) -> anyhow::Result<i32> {
    let (engine, version) = ExifTool::locate()?;
    eprintln!("Using exiftool {version}");

    let options = PipelineOptions {
        recursive,
        dry_run,
        verify: !no_verify,
        jobs,
        ..PipelineOptions::new(directory)
    };

    // Destructive writes are confirmed once, before the pipeline starts.
    if !dry_run && !yes && !confirm("This will modify media files in place. Proceed?")? {
        eprintln!("Operation cancelled");
        return Ok(0);
    }

    let token = install_ctrlc_handler()?;
    let bar = progress_bar();
    let report = gpmeta_core::run_attach(&options, &engine, Some(&token), &bar_callback(&bar))?;
    bar.finish_and_clear();

    print_report(&report, false);
    Ok(if report.has_failures() { 1 } else { 0 })
}

fn cmd_cleanup(
    directory: PathBuf,
    recursive: bool,
    dry_run: bool,
    no_verify: bool,
    yes: bool,
    jobs: usize,
) -> anyhow::Result<i32> {
    let engine = if no_verify {
        None
    } else {
        let (engine, version) = ExifTool::locate()?;
        eprintln!("Using exiftool {version}");
        Some(engine)
    };

    let options = PipelineOptions {
        recursive,
        dry_run,
        waive_verification: no_verify,
        jobs,
        ..PipelineOptions::new(directory)
    };

    if !dry_run && !yes {
        let warning = if no_verify {
            "This will DELETE sidecar files WITHOUT verifying metadata was written (DANGEROUS). Proceed?"
        } else {
            "This will DELETE sidecar files whose metadata verifies. Proceed?"
        };
        if !confirm(warning)? {
            eprintln!("Operation cancelled");
            return Ok(0);
        }
    }

    let token = install_ctrlc_handler()?;
    let bar = progress_bar();
    let report = gpmeta_core::run_cleanup(
        &options,
        engine.as_ref().map(|e| e as &dyn gpmeta_core::MetadataEngine),
        Some(&token),
        &bar_callback(&bar),
    )?;
    bar.finish_and_clear();

    print_report(&report, true);
    Ok(if report.has_failures() { 1 } else { 0 })
}

fn install_ctrlc_handler() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing current files...");
        handler_token.cancel();
    })?;
    Ok(token)
}

fn confirm(message: &str) -> anyhow::Result<bool> {
    eprint!("{message} [y/N]: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let answer = line.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

fn progress_bar() -> Arc<ProgressBar> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}/{len} {prefix} {msg}")
            .unwrap(),
    );
    Arc::new(bar)
}

fn bar_callback(bar: &Arc<ProgressBar>) -> impl Fn(&str, u64, u64, &str) + Send + Sync {
    let bar = Arc::clone(bar);
    move |stage: &str, current: u64, total: u64, message: &str| {
        bar.set_length(total);
        bar.set_position(current + 1);
        bar.set_prefix(stage.to_string());
        bar.set_message(message.to_string());
    }
}

fn print_report(report: &RunReport, cleanup_mode: bool) {
    println!();
    println!("Scan results:");
    println!("  Media files:        {}", report.total_media);
    println!("  Sidecar files:      {}", report.total_sidecars);
    println!("  Pairings:           {}", report.pairings);
    println!("  Unmatched media:    {}", report.unmatched_media.len());
    println!("  Ambiguous:          {}", report.ambiguous.len());
    println!("  Orphan sidecars:    {}", report.orphan_sidecars.len());

    if !report.by_extension.is_empty() {
        println!();
        println!("Pairings by extension:");
        for (ext, count) in &report.by_extension {
            println!("  .{ext:<6} {count}");
        }
    }

    if report.written + report.skipped_dry_run + report.write_failed + report.parse_failed > 0 {
        println!();
        println!("Processing results:");
        println!("  Written:            {}", report.written);
        println!("  Skipped (dry run):  {}", report.skipped_dry_run);
        println!("  Write failures:     {}", report.write_failed);
        println!("  Parse failures:     {}", report.parse_failed);
        println!("  Success rate:       {:.1}%", report.success_rate());
    }

    if report.verified + report.mismatched + report.unverifiable > 0 {
        println!();
        println!("Verification:");
        println!("  Verified:           {}", report.verified);
        println!("  Mismatched:         {}", report.mismatched);
        println!("  Unverifiable:       {}", report.unverifiable);
    }

    if cleanup_mode {
        println!();
        println!("Cleanup:");
        println!("  Deleted:            {}", report.deleted);
        println!("  Retained:           {}", report.retained);
    }

    print_list("Failed files", &report.failures);
    print_list("Verification mismatches", &report.mismatches);
    if cleanup_mode {
        print_list("Retained sidecars", &report.retained_sidecars);
    }

    if !report.unmatched_media.is_empty() {
        println!();
        println!("Media without a sidecar (first 10):");
        for path in report.unmatched_media.iter().take(10) {
            println!("  {}", path.display());
        }
        if report.unmatched_media.len() > 10 {
            println!("  ... and {} more", report.unmatched_media.len() - 10);
        }
    }

    if !report.ambiguous.is_empty() {
        println!();
        println!("Ambiguous pairings (manual review needed):");
        for amb in &report.ambiguous {
            println!("  {}", amb.media.display());
            for candidate in &amb.candidates {
                println!("    candidate: {}", candidate.display());
            }
        }
    }

    for error in &report.scan_errors {
        eprintln!("Warning: {}: {}", error.path.display(), error.reason);
    }

    if report.cancelled {
        eprintln!("Run was cancelled; remaining files were not processed.");
    }
}

fn print_list(title: &str, items: &[gpmeta_core::report::FailureReport]) {
    if items.is_empty() {
        return;
    }
    println!();
    println!("{title}:");
    for item in items.iter().take(10) {
        println!("  {}: {}", item.path.display(), item.reason);
    }
    if items.len() > 10 {
        println!("  ... and {} more", items.len() - 10);
    }
}
