use crate::cli::CategoryArg;
use crate::support::{exit_with_error, format_accessions, print_json, store_dir_or_exit};
use varclust_store::{AccessionCategory, VariantOperation, VariantStore};

pub fn run(store: String, category: Option<CategoryArg>, accession: Option<u64>, json_output: bool) {
    let store_dir = store_dir_or_exit(&store);
    let variants = VariantStore::load_dir(&store_dir).unwrap_or_else(|e| {
        exit_with_error(format!("failed to load {}: {e}", store_dir.display()))
    });

    let category = category.map(AccessionCategory::from);
    let operations: Vec<&VariantOperation> = variants
        .operations()
        .iter()
        .filter(|op| category.is_none_or(|c| op.category == c))
        .filter(|op| accession.is_none_or(|a| op.accession == a))
        .collect();

    if json_output {
        print_json(&operations);
        return;
    }

    println!("varclust operations ({})", operations.len());
    for op in operations {
        let prefix = op.category.file_token();
        let mut line = format!(
            "  - {} {} {prefix}{}",
            op.created_date.to_rfc3339(),
            op.event_type.as_str(),
            op.accession
        );
        if let Some(target) = op.merged_into {
            line.push_str(&format!(" -> {prefix}{target}"));
        }
        if !op.split_into.is_empty() {
            line.push_str(&format!(" -> {}", format_accessions(&op.split_into, "rs")));
        }
        if let Some(rs) = op.clustered_variant_accession {
            line.push_str(&format!(" (rs{rs})"));
        }
        if let Some(assembly) = op.assembly() {
            line.push_str(&format!(" [{assembly}]"));
        }
        if !op.reason.is_empty() {
            line.push_str(&format!(": {}", op.reason));
        }
        println!("{line}");
    }
}
