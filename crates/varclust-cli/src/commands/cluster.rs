use crate::support::{exit_with_error, load_config_or_exit, print_json, store_dir_or_exit};
use std::fs::File;
use std::io::{BufRead, BufReader};
use varclust_engine::{JobReport, JobRunner};

pub struct Args {
    pub store: String,
    pub config: Option<String>,
    pub input: Option<String>,
    pub chunk_size: Option<usize>,
    pub force_recovery: bool,
    pub full_split_scan: bool,
    pub instance_id: Option<String>,
    pub json: bool,
}

pub fn run(args: Args) {
    let store_dir = store_dir_or_exit(&args.store);
    let mut config = load_config_or_exit(args.config.as_deref(), &store_dir);
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if args.full_split_scan {
        config.full_split_scan = true;
    }
    if args.instance_id.is_some() {
        config.instance_id = args.instance_id;
    }

    let runner = JobRunner::open(config, &store_dir)
        .unwrap_or_else(|e| exit_with_error(e))
        .with_force_recovery(args.force_recovery);

    tracing::debug!(
        store = %store_dir.display(),
        input = args.input.as_deref().unwrap_or("-"),
        "starting cluster command"
    );
    let reader: Box<dyn BufRead + Send> = match args.input.as_deref() {
        None | Some("-") => Box::new(BufReader::new(std::io::stdin())),
        Some(path) => match File::open(path) {
            Ok(file) => Box::new(BufReader::new(file)),
            Err(e) => exit_with_error(format!("failed to open {path}: {e}")),
        },
    };

    let report = runner.run(reader).unwrap_or_else(|e| exit_with_error(e));
    if args.json {
        print_json(&report);
    } else {
        print_summary(&report);
    }
}

fn print_summary(report: &JobReport) {
    println!("varclust cluster");
    println!("  Instance: {}", report.instance_id);
    println!("  Chunks: {}", report.chunks);
    println!("  Records: {}", report.records);
    println!("  Operations appended: {}", report.operations_appended);
    for recovery in &report.recovery {
        println!(
            "  Recovery {}: scanned={} committed={} released={}",
            recovery.category, recovery.scanned, recovery.committed, recovery.released
        );
    }
    println!("  Created: {}", report.created());
    println!("  Updated: {}", report.updated());
    println!("  Merged: {}", report.merged());
    println!("  Split: {}", report.split());
    println!("  Kept unclustered: {}", report.kept_unclustered());
    println!("  Invalid: {}", report.invalid());
    if report.stopped {
        println!("  Stopped before end of input");
    }
}
