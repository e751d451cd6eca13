//! Report collection and formatting.

use crate::OutputFormat;
use anyhow::Result;
use lib_crypto_provider::{
    AlgorithmFactory, AlgorithmType, AsymAlgo, Category, CryptoProvider, HashAlgo, InitFailure,
    MacAlgo, ProviderState, RngImpl, SymAlgo,
};
use lib_tcti_ffi::TctiInfoSummary;
use serde::Serialize;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub name: String,
    pub present: bool,
    pub info: Option<TctiInfoSummary>,
}

pub fn print_probe(report: &ProbeReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Text => {
            let present = if report.present { "present" } else { "not found" };
            println!("Transport '{}': {}", report.name, present);
            if let Some(info) = &report.info {
                println!("  Version:     {}", info.version);
                println!("  Name:        {}", info.name.as_deref().unwrap_or("-"));
                println!("  Description: {}", info.description.as_deref().unwrap_or("-"));
                if let Some(help) = &info.config_help {
                    println!("  Config help: {help}");
                }
            }
            Ok(())
        }
    }
}

/// Snapshot of a provider taken right after initialization.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub state: ProviderState,
    pub lock_count: Option<usize>,
    pub owns_locking_callback: bool,
    pub self_test_passed: bool,
    pub device_session: bool,
    pub alternate_engine: bool,
    pub transport: String,
    pub transport_info: Option<TctiInfoSummary>,
    pub failures: Vec<InitFailure>,
}

impl StatusReport {
    pub fn collect(provider: &CryptoProvider) -> Self {
        Self {
            state: provider.state(),
            lock_count: provider.lock_count(),
            owns_locking_callback: provider.owns_locking_callback(),
            self_test_passed: provider.self_test_status(),
            device_session: provider.has_device_session(),
            alternate_engine: provider.has_alternate_engine(),
            transport: provider.config().transport.clone(),
            transport_info: provider.transport_info(),
            failures: provider.failures(),
        }
    }
}

pub fn print_status(report: &StatusReport, format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        return print_json(report);
    }

    let yes_no = |b: bool| if b { "yes" } else { "no" };
    println!("Provider state:     {}", report.state);
    match report.lock_count {
        Some(count) => println!("Lock table:         {count} mutexes"),
        None => println!("Lock table:         -"),
    }
    println!("Owns lock callback: {}", yes_no(report.owns_locking_callback));
    println!("Self-test passed:   {}", yes_no(report.self_test_passed));
    println!("Device session:     {} (transport '{}')", yes_no(report.device_session), report.transport);
    if let Some(name) = report.transport_info.as_ref().and_then(|i| i.name.as_deref()) {
        println!("Transport module:   {name}");
    }
    println!("Alternate engine:   {}", yes_no(report.alternate_engine));

    if !report.failures.is_empty() {
        println!("\nFailed steps:");
        for failure in &report.failures {
            let kind = if failure.fatal { "fatal" } else { "ignored" };
            println!("  {} ({kind}): {}", failure.step, failure.message);
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct AlgorithmEntry {
    pub category: Category,
    pub id: u32,
    pub name: &'static str,
    pub available: bool,
}

fn entries<A: AlgorithmType>(factory: &AlgorithmFactory, out: &mut Vec<AlgorithmEntry>) {
    out.extend(A::ALL.iter().map(|&algo| AlgorithmEntry {
        category: A::CATEGORY,
        id: algo.raw(),
        name: algo.name(),
        available: factory.is_available(A::CATEGORY, algo.raw()),
    }));
}

pub fn algorithm_table(factory: &AlgorithmFactory) -> Vec<AlgorithmEntry> {
    let mut out = Vec::new();
    entries::<SymAlgo>(factory, &mut out);
    entries::<AsymAlgo>(factory, &mut out);
    entries::<HashAlgo>(factory, &mut out);
    entries::<MacAlgo>(factory, &mut out);
    entries::<RngImpl>(factory, &mut out);
    out
}

pub fn print_algorithms(factory: &AlgorithmFactory, format: OutputFormat) -> Result<()> {
    let table = algorithm_table(factory);
    match format {
        OutputFormat::Json => print_json(&table),
        OutputFormat::Text => {
            let mut current = None;
            for entry in &table {
                if current != Some(entry.category) {
                    println!("{}:", entry.category);
                    current = Some(entry.category);
                }
                let mark = if entry.available { "+" } else { "-" };
                println!("  {mark} {:>2}  {}", entry.id, entry.name);
            }
            Ok(())
        }
    }
}

pub fn print_bytes(label: &str, bytes: &[u8], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "label": label,
            "len": bytes.len(),
            "hex": hex::encode(bytes),
        })),
        OutputFormat::Text => {
            println!("{}", hex::encode(bytes));
            Ok(())
        }
    }
}
