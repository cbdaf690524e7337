use clap::{Parser, Subcommand, ValueEnum};
use varclust_store::AccessionCategory;

#[derive(Parser)]
#[command(
    name = "varclust",
    about = "varclust: cluster submitted variants (SS) into clustered variants (RS)",
    version
)]
pub struct Cli {
    /// Store directory (variant JSONL files, accession ledger, locks)
    #[arg(long, global = true, default_value = ".")]
    pub store: String,

    /// Job config (defaults to varclust.toml in the store directory if present)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Recover abandoned blocks, then cluster a JSONL batch of submitted variants
    Cluster {
        /// Input JSONL (`-` or omitted reads stdin)
        input: Option<String>,

        /// Records per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Recover every open block regardless of age
        #[arg(long)]
        force_recovery: bool,

        /// Re-check every stored RS for splits, not only the ones touched
        #[arg(long)]
        full_split_scan: bool,

        /// Worker instance id recorded on reserved blocks
        #[arg(long)]
        instance_id: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Commit or release accession blocks left open by crashed workers
    Recover {
        /// Only this category (default: both)
        #[arg(long, value_enum)]
        category: Option<CategoryArg>,

        /// Ignore the age cutoff
        #[arg(long)]
        force: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the accession block ledger
    Blocks {
        #[arg(long, value_enum)]
        category: Option<CategoryArg>,

        /// Only blocks neither committed nor released
        #[arg(long)]
        open: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the operation log
    Operations {
        #[arg(long, value_enum)]
        category: Option<CategoryArg>,

        /// Only operations whose subject is this accession
        #[arg(long)]
        accession: Option<u64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Retire a clustered variant in one assembly
    Deprecate {
        /// RS accession
        accession: u64,

        #[arg(long)]
        assembly: String,

        #[arg(long, default_value = "Deprecated by curator.")]
        reason: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the submitted and clustering hashes of one variant
    Hash {
        #[arg(long)]
        assembly: String,

        #[arg(long)]
        project: String,

        #[arg(long)]
        contig: String,

        #[arg(long)]
        start: u64,

        #[arg(long = "ref")]
        reference: String,

        #[arg(long = "alt")]
        alternate: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CategoryArg {
    #[value(name = "rs")]
    Rs,
    #[value(name = "ss")]
    Ss,
}

impl From<CategoryArg> for AccessionCategory {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Rs => AccessionCategory::Clustered,
            CategoryArg::Ss => AccessionCategory::Submitted,
        }
    }
}
