#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

//! Eseguibile di demo per deident.
//!
//! Anonimizza la tabella di esempio (età, genere, CAP) e stampa:
//! statistiche del reticolo, ottimo globale e tabella di output.
//!
//! Uso:
//!
//! ```text
//! deident-demo [k]                 # k-anonimato, default k = 2
//! deident-demo --config file.yaml  # configurazione completa da YAML
//! ```
//!
//! Il livello di log si regola con `RUST_LOG` (es. `RUST_LOG=debug`).

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use deident_core::{AnonymizationConfig, Anonymizer, Data, Hierarchy, PrivacyModel};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Tabella di esempio a 7 record con le tre gerarchie.
fn example_data() -> Result<Data> {
    let mut data = Data::from_rows(&[
        &["age", "gender", "zipcode"],
        &["34", "male", "81667"],
        &["45", "female", "81675"],
        &["66", "male", "81925"],
        &["70", "female", "81931"],
        &["34", "female", "81931"],
        &["70", "male", "81931"],
        &["45", "male", "81931"],
    ])?;

    let age = Hierarchy::builder()
        .add(&["34", "<50", "*"])
        .add(&["45", "<50", "*"])
        .add(&["66", ">=50", "*"])
        .add(&["70", ">=50", "*"])
        .build();
    let gender = Hierarchy::builder()
        .add(&["male", "*"])
        .add(&["female", "*"])
        .build();
    let zipcode = Hierarchy::builder()
        .add(&["81667", "8166*", "816**", "81***", "8****", "*****"])
        .add(&["81675", "8167*", "816**", "81***", "8****", "*****"])
        .add(&["81925", "8192*", "819**", "81***", "8****", "*****"])
        .add(&["81931", "8193*", "819**", "81***", "8****", "*****"])
        .build();

    data.definition_mut()
        .set_quasi_identifier("age", age)
        .set_quasi_identifier("gender", gender)
        .set_quasi_identifier("zipcode", zipcode);
    Ok(data)
}

/// Legge la configurazione dagli argomenti della riga di comando.
fn config_from_args() -> Result<AnonymizationConfig> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => Ok(AnonymizationConfig::with_model(PrivacyModel::KAnonymity { k: 2 })),
        [flag, path] if flag == "--config" => AnonymizationConfig::from_yaml(&PathBuf::from(path)),
        [k] => {
            let k: u32 = k
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for k: {k}"))?;
            let mut cfg = AnonymizationConfig::with_model(PrivacyModel::KAnonymity { k });
            cfg.apply_env_overrides()?;
            Ok(cfg)
        }
        _ => Err(anyhow!("usage: deident-demo [k] | --config <file.yaml>")),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config_from_args()?;
    let data = example_data()?;
    let anonymizer = Anonymizer::new();
    let result = anonymizer.anonymize(&data, &config)?;

    let stats = result.statistics();
    println!("deident demo");
    println!("------------");
    println!("Algoritmo: {}", result.algorithm());
    println!(
        "Reticolo: {} nodi, {} valutati, {} anonimi, {} non anonimi",
        stats.size, stats.checked, stats.anonymous, stats.not_anonymous
    );
    println!(
        "Cache: {} hit, {} miss, {} snapshot salvati",
        stats.search.cache_hits, stats.search.cache_misses, stats.search.snapshots_stored
    );

    let Some(optimum) = result.global_optimum() else {
        println!("Nessuna trasformazione soddisfa i modelli configurati.");
        return Ok(());
    };
    let loss = result.optimum_loss().unwrap_or_default();
    println!(
        "Ottimo: {optimum} su {:?} (perdita {loss})\n",
        result.quasi_identifiers()
    );

    let mut output = result.output()?;
    println!("{}", output.header()?.join("\t"));
    for row in 0..output.num_rows()? {
        println!("{}", output.row(row)?.join("\t"));
    }
    info!(
        suppressed = output.suppressed_count()?,
        elapsed_ms = result.elapsed().as_millis(),
        "demo finished"
    );
    output.release()?;
    Ok(())
}
