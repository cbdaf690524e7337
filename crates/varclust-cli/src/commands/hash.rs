use crate::support::{exit_with_error, load_config_or_exit, print_json};
use serde_json::json;
use std::path::PathBuf;
use varclust_kernel::SubmittedAttributes;

pub struct Args {
    pub store: String,
    pub config: Option<String>,
    pub assembly: String,
    pub project: String,
    pub contig: String,
    pub start: u64,
    pub reference: String,
    pub alternate: String,
    pub json: bool,
}

/// Hashing is pure: the store directory is only consulted for `varclust.toml`.
pub fn run(args: Args) {
    let config = load_config_or_exit(args.config.as_deref(), &PathBuf::from(&args.store));
    let hasher = config.hasher().unwrap_or_else(|e| exit_with_error(e));
    let key = hasher
        .submitted_key(&SubmittedAttributes {
            assembly: &args.assembly,
            project: &args.project,
            contig: &args.contig,
            start: args.start,
            reference: &args.reference,
            alternate: &args.alternate,
        })
        .unwrap_or_else(|e| exit_with_error(e));

    if args.json {
        print_json(&json!({
            "submittedHash": key.submitted_hash.0,
            "clusteringHash": key.clustering_hash.0,
            "contig": key.canonical_contig,
            "referenceAllele": key.reference,
            "alternateAllele": key.alternate,
            "variantType": key.variant_type,
        }));
    } else {
        println!("varclust hash");
        println!("  Contig: {}", key.canonical_contig);
        println!("  Alleles: {} > {}", key.reference, key.alternate);
        println!("  Type: {}", key.variant_type);
        println!("  SS hash: {}", key.submitted_hash);
        println!("  RS hash: {}", key.clustering_hash);
    }
}
