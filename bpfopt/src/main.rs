use bpfopt::*;

use std::path::PathBuf;

use clap::Parser;

/// Post-link optimizer for eBPF object files
#[derive(Parser, Debug)]
#[clap(about, version, author)]
struct Args {
    /// Input object file (.o)
    input: PathBuf,
    /// Output path for the rewritten object; defaults to `<input>.optimized`
    output: Option<PathBuf>,
    /// Show per-section optimization statistics
    #[clap(long)]
    stats: bool,
    /// Verbose progress output
    #[clap(short, long)]
    verbose: bool,
    /// Debug level (repeat for more: 0-warn, 1-info, 2-debug, 3-trace)
    #[clap(short, long, parse(from_occurrences))]
    debug: usize,
    /// Path to send log (as JSON) to
    ///
    /// Error or higher severity alerts will still continue being shown at
    /// stderr (in addition to being added to the log)
    #[clap(long = "log")]
    log_file: Option<PathBuf>,
    /// Advanced switches to tweak optimizer behavior
    #[clap(short = 'Z', long, arg_enum)]
    advanced_config: Vec<opt_config::CommandLineOptConfig>,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose && args.debug == 0 {
        1
    } else {
        args.debug
    };
    let _log_guard = slog_scope::set_global_logger(crate::log::FileAndTermDrain::new(
        level,
        false,
        args.log_file.clone(),
    ));

    opt_config::OptConfig::initialize(args.advanced_config.clone());

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.optimized", args.input.display())));

    match object::optimize_object(&args.input, &output) {
        Ok(stats) => {
            if args.stats || args.verbose {
                show_statistics(&stats);
            }
            println!("{} -> {}", args.input.display(), output.display());
        }
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

fn show_statistics(stats: &object::ObjectStats) {
    println!("=== optimization statistics ===");
    for (name, s) in &stats.sections {
        println!("section {}:", name);
        println!("  total instructions: {}", s.total);
        println!("  active instructions: {}", s.active);
        println!("  nop instructions: {}", s.nops);
        if s.total > 0 {
            println!(
                "  optimization ratio: {:.1}%",
                s.nops as f64 / s.total as f64 * 100.0
            );
        }
    }
    let total = stats.total_instructions();
    let nops = stats.nop_instructions();
    println!("=== summary ===");
    println!("total instructions: {}", total);
    println!("nop instructions: {}", nops);
    if total > 0 {
        println!(
            "overall optimization ratio: {:.1}%",
            nops as f64 / total as f64 * 100.0
        );
    }
}
