use crate::cli::CategoryArg;
use crate::support::{exit_with_error, load_config_or_exit, print_json, store_dir_or_exit};
use std::sync::Arc;
use varclust_engine::JobRunner;
use varclust_store::{AccessionCategory, RecoveryAgent, VariantStoreDir};

pub fn run(
    store: String,
    config: Option<String>,
    category: Option<CategoryArg>,
    force: bool,
    json_output: bool,
) {
    let store_dir = store_dir_or_exit(&store);
    let config = load_config_or_exit(config.as_deref(), &store_dir);
    let allocator = JobRunner::file_allocator(&config, &store_dir, &config.instance_id());
    let cutoff = if force {
        chrono::Duration::zero()
    } else {
        config.recovery_cutoff()
    };
    let agent = RecoveryAgent::new(
        Arc::new(allocator),
        Arc::new(VariantStoreDir(store_dir.clone())),
    )
    .with_cutoff(cutoff)
    .with_lock_dir(&store_dir, config.retry_policy());

    let reports = match category {
        Some(category) => agent
            .run(AccessionCategory::from(category))
            .map(|report| vec![report]),
        None => agent.run_all(),
    }
    .unwrap_or_else(|e| exit_with_error(e));

    if json_output {
        print_json(&reports);
    } else {
        println!("varclust recover");
        for report in &reports {
            println!(
                "  {}: scanned={} committed={} released={}",
                report.category, report.scanned, report.committed, report.released
            );
        }
    }
}
