use crate::cli::CategoryArg;
use crate::support::{exit_with_error, load_config_or_exit, print_json, store_dir_or_exit};
use serde_json::json;
use varclust_engine::JobRunner;
use varclust_store::{AccessionBlock, AccessionCategory, CompactedBlocks};

pub fn run(
    store: String,
    config: Option<String>,
    category: Option<CategoryArg>,
    open_only: bool,
    json_output: bool,
) {
    let store_dir = store_dir_or_exit(&store);
    let config = load_config_or_exit(config.as_deref(), &store_dir);
    let allocator = JobRunner::file_allocator(&config, &store_dir, &config.instance_id());
    let ledger = allocator.snapshot().unwrap_or_else(|e| exit_with_error(e));

    let category = category.map(AccessionCategory::from);
    let blocks: Vec<&AccessionBlock> = ledger
        .blocks()
        .iter()
        .filter(|block| category.is_none_or(|c| block.category == c))
        .filter(|block| !open_only || block.is_open())
        .collect();
    let categories: Vec<AccessionCategory> = match category {
        Some(c) => vec![c],
        None => AccessionCategory::ALL.to_vec(),
    };

    if json_output {
        let next: serde_json::Map<String, serde_json::Value> = categories
            .iter()
            .map(|c| (c.as_str().to_string(), json!(ledger.next_accession(*c))))
            .collect();
        let compacted: serde_json::Map<String, serde_json::Value> = categories
            .iter()
            .map(|c| (c.as_str().to_string(), json!(ledger.compacted(*c))))
            .collect();
        print_json(&json!({
            "nextAccession": next,
            "compacted": compacted,
            "blocks": blocks,
        }));
        return;
    }

    println!("varclust blocks");
    for c in &categories {
        println!("  Next {c}: {}", ledger.next_accession(*c));
        let compacted = ledger.compacted(*c);
        if compacted != CompactedBlocks::default() {
            println!(
                "  Compacted {c}: committed={} released={} through={}",
                compacted.committed, compacted.released, compacted.through
            );
        }
    }
    if blocks.is_empty() {
        println!("  (no blocks)");
    }
    for block in blocks {
        let state = if block.committed {
            "committed"
        } else if block.released {
            "released"
        } else {
            "open"
        };
        println!(
            "  - {} [{}, {}) {state} instance={} reserved={}",
            block.category,
            block.start,
            block.end,
            block.instance_id,
            block.reserved_at.to_rfc3339()
        );
    }
}
