use crate::support::{exit_with_error, load_config_or_exit, print_json, store_dir_or_exit};
use chrono::Utc;
use varclust_engine::{CounterMetrics, EngineError, deprecate};
use varclust_store::{AtomicStoreMutationError, mutate_store_dir};

pub fn run(
    store: String,
    config: Option<String>,
    accession: u64,
    assembly: String,
    reason: String,
    json_output: bool,
) {
    let store_dir = store_dir_or_exit(&store);
    let config = load_config_or_exit(config.as_deref(), &store_dir);
    let stats = CounterMetrics::new();

    let op = mutate_store_dir::<_, EngineError, _>(&store_dir, &config.retry_policy(), |variants| {
        let op = deprecate(variants, &assembly, accession, &reason, &stats, Utc::now())?;
        Ok((op, true))
    })
    .unwrap_or_else(|error| match error {
        AtomicStoreMutationError::Mutation(inner) => exit_with_error(inner),
        other => exit_with_error(other),
    });

    if json_output {
        print_json(&op);
    } else {
        println!("varclust deprecate rs{accession}");
        println!("  Assembly: {assembly}");
        println!("  Operation: {}", op.id);
        println!("  Reason: {}", op.reason);
    }
}
