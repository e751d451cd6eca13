//! hsm-provider: operator CLI for the process-wide crypto provider.

mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lib_crypto_provider::{singleton, AlgorithmFactory, AlgorithmType, HashAlgo};
use lib_tcti_ffi::{TctiLoader, UnloadPolicy};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "hsm-provider")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Provider configuration file (TOML, or JSON by extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Transport module name or path, overriding the configuration
    #[arg(short, long, global = true)]
    transport: Option<String>,

    /// Never switch the random source to the hardware engine
    #[arg(long, global = true)]
    no_hardware_rng: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a transport module can be found and opened
    Probe {
        /// Transport name (e.g. "tabrmd", "device") or module path
        name: String,

        /// Also negotiate a context and report the module's info descriptor
        #[arg(long)]
        info: bool,
    },

    /// Initialize the provider and report its state
    Status,

    /// List algorithms and whether this build provides them
    Algorithms,

    /// Draw bytes from the provider's RNG
    Random {
        /// Number of bytes
        #[arg(short = 'n', long, default_value = "32")]
        bytes: usize,
    },

    /// Digest a file
    Digest {
        /// File to digest
        file: PathBuf,

        /// Hash algorithm (md5, sha1, sha224, sha256, sha384, sha512, gost)
        #[arg(short, long, default_value = "sha256", value_parser = parse_hash)]
        algorithm: HashAlgo,
    },
}

/// Match a hash name case-insensitively, ignoring dashes.
fn parse_hash(s: &str) -> Result<HashAlgo, String> {
    let wanted = s.replace('-', "").to_ascii_lowercase();
    HashAlgo::ALL
        .iter()
        .copied()
        .find(|algo| {
            let name = algo.name().replace('-', "").to_ascii_lowercase();
            name == wanted || (name.starts_with("gost") && wanted == "gost")
        })
        .ok_or_else(|| format!("unknown hash algorithm '{s}'"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let overrides = config::Overrides {
        transport: cli.transport,
        no_hardware_rng: cli.no_hardware_rng,
    };
    let provider_config = config::load_config(cli.config.as_deref(), &overrides)?;

    match cli.command {
        Commands::Probe { name, info } => probe(&name, info, cli.format)?,
        Commands::Algorithms => output::print_algorithms(&AlgorithmFactory::new(), cli.format)?,
        Commands::Status => {
            singleton::set_config(provider_config);
            let provider = singleton::instance();
            let report = output::StatusReport::collect(&provider);
            singleton::reset();
            output::print_status(&report, cli.format)?;
        }
        Commands::Random { bytes } => {
            singleton::set_config(provider_config);
            let result = random(bytes);
            singleton::reset();
            output::print_bytes("random", &result?, cli.format)?;
        }
        Commands::Digest { file, algorithm } => {
            singleton::set_config(provider_config);
            let result = digest(&file, algorithm);
            singleton::reset();
            output::print_bytes(algorithm.name(), &result?, cli.format)?;
        }
    }

    Ok(())
}

fn probe(name: &str, info: bool, format: OutputFormat) -> Result<()> {
    let loader = TctiLoader::global();
    loader.set_policy(UnloadPolicy::Close);
    let mut report = output::ProbeReport {
        name: name.to_string(),
        present: loader.is_present(name),
        info: None,
    };

    if info {
        let context = loader
            .load(name)
            .with_context(|| format!("Failed to load transport module '{name}'"))?;
        tracing::info!(size = context.size(), module = %context.module_path(), "Negotiated transport context");
        report.info = loader.info();
        context.finalize();
        loader.unload();
    }

    output::print_probe(&report, format)
}

fn random(bytes: usize) -> Result<Vec<u8>> {
    let provider = singleton::instance();
    let rng = provider.rng().context("Provider RNG unavailable")?;
    Ok(rng.generate_vec(bytes)?)
}

fn digest(file: &PathBuf, algorithm: HashAlgo) -> Result<Vec<u8>> {
    let content = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
    let provider = singleton::instance();
    let mut hash = provider
        .get_hash_algorithm(algorithm)
        .with_context(|| format!("{algorithm} unavailable"))?;
    hash.update(&content);
    Ok(hash.finalize())
}
