//! varclust CLI: the `varclust` command.

mod cli;
mod commands;
mod support;

use clap::Parser;
use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    support::init_tracing();

    match cli.command {
        Commands::Cluster {
            input,
            chunk_size,
            force_recovery,
            full_split_scan,
            instance_id,
            json,
        } => commands::cluster::run(commands::cluster::Args {
            store: cli.store,
            config: cli.config,
            input,
            chunk_size,
            force_recovery,
            full_split_scan,
            instance_id,
            json,
        }),

        Commands::Recover {
            category,
            force,
            json,
        } => commands::recover::run(cli.store, cli.config, category, force, json),

        Commands::Blocks {
            category,
            open,
            json,
        } => commands::blocks::run(cli.store, cli.config, category, open, json),

        Commands::Operations {
            category,
            accession,
            json,
        } => commands::operations::run(cli.store, category, accession, json),

        Commands::Deprecate {
            accession,
            assembly,
            reason,
            json,
        } => commands::deprecate::run(cli.store, cli.config, accession, assembly, reason, json),

        Commands::Hash {
            assembly,
            project,
            contig,
            start,
            reference,
            alternate,
            json,
        } => commands::hash::run(commands::hash::Args {
            store: cli.store,
            config: cli.config,
            assembly,
            project,
            contig,
            start,
            reference,
            alternate,
            json,
        }),
    }
}
