use std::path::PathBuf;

use addrscan::{RegistryConfig, SectionKind};
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::hex_utils::parse_hex_address;

#[derive(Parser)]
#[command(name = "addrscan")]
#[command(about = "Signature scanning and address resolution over module dumps")]
struct Args {
    /// Bytes per memory read while scanning (0 uses the default)
    #[arg(long, global = true, env = "ADDRSCAN_CHUNK_SIZE", default_value_t = 0)]
    chunk_size: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a signature and show its compiled form
    Compile {
        pattern: String,
    },

    /// Find signature matches in a module dump
    Scan {
        /// Raw module dump; file offset 0 is the module base
        #[arg(long)]
        image: PathBuf,

        /// Module base address (hex)
        #[arg(long, value_parser = parse_hex_address)]
        base: u64,

        pattern: String,

        /// Restrict the search to one section (code, data, read_only_data)
        #[arg(long)]
        section: Option<SectionKind>,

        /// Only report the nth match (zero based)
        #[arg(long)]
        nth: Option<usize>,
    },

    /// Resolve declared addresses against a module dump
    Resolve {
        #[arg(long)]
        image: PathBuf,

        #[arg(long, value_parser = parse_hex_address)]
        base: u64,

        /// Module name of the dump (defaults to the file name)
        #[arg(long)]
        module: Option<String>,

        /// Resolver declarations JSON (defaults to the built-in set)
        #[arg(long, env = "ADDRSCAN_RESOLVERS")]
        resolvers: Option<PathBuf>,

        /// Write the resolved address table as JSON
        #[arg(long)]
        json: Option<PathBuf>,

        /// Resolve one resolver at a time
        #[arg(long)]
        sequential: bool,
    },

    /// Print or save the built-in resolver declarations
    Builtin {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("addrscan=info".parse()?))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Compile { pattern } => commands::compile::run(&pattern),
        Command::Scan {
            image,
            base,
            pattern,
            section,
            nth,
        } => {
            let config = RegistryConfig::builder().chunk_size(args.chunk_size).build();
            commands::scan::run(&image, base, &pattern, section, nth, config.scan)
        }
        Command::Resolve {
            image,
            base,
            module,
            resolvers,
            json,
            sequential,
        } => {
            let config = RegistryConfig::builder()
                .parallel(!sequential)
                .chunk_size(args.chunk_size)
                .build();
            commands::resolve::run(
                &image,
                base,
                module.as_deref(),
                resolvers.as_deref(),
                json.as_deref(),
                config,
            )
        }
        Command::Builtin { out } => commands::builtin::run(out.as_deref()),
    }
}
