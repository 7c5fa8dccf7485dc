use anyhow::{anyhow, Context, Result};
use clap::Parser;
use colored::Colorize;
use ctxpatch::{
    apply_patch_sequence, extract_patch_blocks, preview_diff, ApplyOptions, BatchOutcome,
    HunkApplyStatus, DEFAULT_MATCH_THRESHOLD, DEFAULT_RUN_BONUS,
};
use env_logger::Builder;
use log::{info, warn, Level, LevelFilter};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

// --- Main Application Entry Point ---

fn main() {
    // 1. Parse command-line arguments using `clap`.
    let args = Args::parse();
    setup_logging(args.verbose);

    // 2. Call the main logic function. All complex logic and error handling
    //    is inside `run`.
    if let Err(e) = run(args) {
        // Using {:?} ensures the full error chain from `anyhow` is printed.
        eprintln!("{} {:?}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Contains the primary logic of the application.
fn run(args: Args) -> Result<()> {
    // --- Argument Validation ---
    if !(0.0..=1.0).contains(&args.threshold) {
        return Err(anyhow!("Match threshold must be between 0.0 and 1.0."));
    }
    if args.run_bonus < 0.0 {
        return Err(anyhow!("Run bonus must not be negative."));
    }

    // --- Input Reading ---
    let patch_content = fs::read_to_string(&args.patch_file)
        .with_context(|| format!("Failed to read patch file '{}'", args.patch_file.display()))?;
    let source_content = fs::read_to_string(&args.target_file).with_context(|| {
        format!("Failed to read target file '{}'", args.target_file.display())
    })?;

    // Fenced ```diff blocks take precedence; a file without any is treated
    // as one bare patch payload.
    let payloads = {
        let blocks = extract_patch_blocks(&patch_content);
        if blocks.is_empty() {
            vec![patch_content.clone()]
        } else {
            blocks
        }
    };

    let options = ApplyOptions::builder()
        .dry_run(args.dry_run)
        .threshold(args.threshold)
        .run_bonus(args.run_bonus)
        .build();

    info!("Found {} patch payload(s) to apply.", payloads.len());
    info!(
        "Fuzzy matching threshold: {:.2} (run bonus: {:.2})",
        options.threshold, options.run_bonus
    );

    // --- Core Patching Logic ---
    let batch = apply_patch_sequence(&source_content, &payloads, &options);

    if args.dry_run {
        println!(
            "----- Proposed changes for {} -----",
            args.target_file.display()
        );
        print!("{}", preview_diff(&source_content, &batch.patched_text));
        println!("------------------------------------");
        info!("DRY RUN completed. No files were modified.");
    } else {
        fs::write(&args.target_file, &batch.patched_text).with_context(|| {
            format!("Failed to write target file '{}'", args.target_file.display())
        })?;
    }

    report_summary(&batch)
}

// --- Helper Functions ---

/// Logs the final summary and turns unapplied hunks into a non-zero exit.
fn report_summary(batch: &BatchOutcome) -> Result<()> {
    let applied: usize = batch
        .outcomes
        .iter()
        .flat_map(|o| o.report.hunk_results.iter())
        .filter(|s| matches!(s, HunkApplyStatus::Applied { .. }))
        .count();
    let unapplied = batch.diagnostic_count();

    info!("--- Summary ---");
    info!("Hunks applied: {}", applied);
    info!("Diagnostics:   {}", unapplied);

    if unapplied == 0 {
        return Ok(());
    }

    for (payload_idx, outcome) in batch.outcomes.iter().enumerate() {
        for diag in &outcome.diagnostics {
            if diag.hunk_index == 0 {
                warn!("Payload {}: {}", payload_idx + 1, diag.kind);
            } else {
                warn!(
                    "Payload {}, hunk {}: {}",
                    payload_idx + 1,
                    diag.hunk_index,
                    diag.kind
                );
                for line in diag.anchor_preview.lines() {
                    warn!("    | {}", line);
                }
            }
        }
    }
    warn!("The target may be in a partially patched state.");

    // Return an error to set a non-zero exit code.
    Err(anyhow!("Completed with {} diagnostic(s).", unapplied))
}

/// Sets up the global logger with colored, leveled output.
fn setup_logging(verbose: u8) {
    let log_level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace, // -vvv and higher
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| match record.level() {
            Level::Error => writeln!(buf, "{} {}", "error:".red().bold(), record.args()),
            Level::Warn => writeln!(buf, "{} {}", "warning:".yellow().bold(), record.args()),
            Level::Info => writeln!(buf, "{}", record.args()),
            Level::Debug => writeln!(buf, "{} {}", "debug:".blue().bold(), record.args()),
            Level::Trace => writeln!(buf, "{} {}", "trace:".cyan().bold(), record.args()),
        })
        .init();
}

/// Defines the command-line arguments for the application.
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Apply AI-generated context diffs to a file, locating hunks by fuzzy anchor matching.",
    long_about = "Parses @@ ... @@ context hunks (no line numbers) from a patch file, or from\n```diff / ```patch blocks inside a markdown file, and applies them to the\ntarget file. Hunks that cannot be located are skipped and reported."
)]
struct Args {
    /// Path to the patch file (bare @@ ... @@ hunks, or markdown containing
    /// fenced diff blocks).
    patch_file: PathBuf,
    /// Path to the file to patch in place.
    target_file: PathBuf,
    /// If set, show what would be done, but don't modify the file.
    #[arg(
        short = 'n',
        long,
        help = "Show what would be done, but don't modify the file."
    )]
    dry_run: bool,
    /// Acceptance threshold for fuzzy anchor matching (0.0 to 1.0).
    #[arg(short = 't', long, default_value_t = DEFAULT_MATCH_THRESHOLD, help = "Acceptance threshold for fuzzy anchor matching (0.0 to 1.0). Higher is stricter.")]
    threshold: f32,
    /// Weight of the trailing-run bonus in the anchor score.
    #[arg(short = 'b', long, default_value_t = DEFAULT_RUN_BONUS, help = "Weight of the trailing-run bonus in the anchor score.")]
    run_bonus: f32,
    /// Increase logging verbosity. Can be used multiple times.
    #[arg(short, long, action = clap::ArgAction::Count, long_help = "Increase logging verbosity.\n-v for info, -vv for debug, -vvv for trace.")]
    verbose: u8,
}
