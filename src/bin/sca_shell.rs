//! Interactive analysis shell
//!
//! Text front-end over the plugin pipeline. The shell owns a table of named
//! datasets and translates `<command> <positional…> (--flag value)*` lines
//! into argument bags; all analysis happens in the library.
//!
//! Commands:
//!   help                                  list commands and plugins
//!   load <alias> <file> [--loader bin]    load a dataset file
//!   unload <alias>                        drop a dataset
//!   datasets                              list loaded datasets
//!   split <alias> <first> <second> <n>    split at trace index n
//!   metric <name> --dataset <alias> …     run a metric plugin
//!   quit | exit                           leave the shell
//!
//! `--script <file>` executes commands non-interactively; the process exit
//! code then mirrors the error taxonomy. `--config <file>` points to a JSON
//! session configuration (output directory, CSV separator).

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use mysca::args::{names, ArgBag, ArgValue};
use mysca::dataset::TraceDataset;
use mysca::metrics;
use mysca::plugin::{self, PluginKind};
use mysca::{Error, Result};

/// Optional JSON session configuration.
#[derive(Debug, Default, Deserialize)]
struct SessionConfig {
    /// Directory for metric output files when `--out` is relative or absent.
    output_dir: Option<PathBuf>,
    /// CSV cell separator, comma by default.
    separator: Option<char>,
}

struct Session {
    datasets: HashMap<String, Arc<TraceDataset>>,
    config: SessionConfig,
}

enum Outcome {
    Continue,
    Quit,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let config = match flag_value(&argv, "--config") {
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        }
        None => SessionConfig::default(),
    };
    let mut session = Session { datasets: HashMap::new(), config };

    if let Some(script) = flag_value(&argv, "--script") {
        let text = std::fs::read_to_string(&script)?;
        for line in text.lines() {
            if let Err(error) = run_line(&mut session, line) {
                eprintln!("error: {error}");
                std::process::exit(error.exit_code());
            }
        }
        return Ok(());
    }

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("sca> ");
        std::io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // end of input
        }
        match run_line(&mut session, &line) {
            Ok(Outcome::Quit) => break,
            Ok(Outcome::Continue) => {}
            Err(error) => eprintln!("error: {error}"),
        }
    }
    Ok(())
}

fn flag_value(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

/// Returns `Ok` for handled lines (including empty ones and comments).
fn run_line(session: &mut Session, line: &str) -> Result<Outcome> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(Outcome::Continue);
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (positionals, flags) = split_arguments(&tokens[1..])?;

    match tokens[0] {
        "help" => {
            print_help();
            Ok(Outcome::Continue)
        }
        "quit" | "exit" => Ok(Outcome::Quit),
        "load" => {
            let [alias, file] = require_positionals::<2>("load <alias> <file>", &positionals)?;
            let loader_name =
                flags.iter().find(|(k, _)| k == "loader").map(|(_, v)| v.as_str()).unwrap_or("bin");
            let loader = plugin::registry().construct_loader(loader_name, &ArgBag::new())?;
            let dataset = loader.load(Path::new(file))?;
            info!(alias, file, "dataset loaded");
            session.datasets.insert(alias.to_string(), dataset);
            Ok(Outcome::Continue)
        }
        "unload" => {
            let [alias] = require_positionals::<1>("unload <alias>", &positionals)?;
            if session.datasets.remove(alias).is_none() {
                return Err(Error::InvalidArgument(format!("no dataset named `{alias}`")));
            }
            Ok(Outcome::Continue)
        }
        "datasets" => {
            for (alias, dataset) in &session.datasets {
                let h = dataset.header();
                println!(
                    "{alias}: {} traces x {} samples, {}, {} plaintexts",
                    h.num_traces, h.num_samples, h.algorithm, h.plaintext_mode
                );
            }
            Ok(Outcome::Continue)
        }
        "split" => {
            let [alias, first, second, index] = require_positionals::<4>(
                "split <alias> <first-alias> <second-alias> <index>",
                &positionals,
            )?;
            let dataset = lookup_dataset(session, alias)?;
            let at: u32 = index
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("bad split index `{index}`")))?;
            let (a, b) = dataset.split(at)?;
            session.datasets.insert(first.to_string(), a);
            session.datasets.insert(second.to_string(), b);
            Ok(Outcome::Continue)
        }
        "metric" => {
            let [name] = require_positionals::<1>("metric <name> (--flag value)*", &positionals)?;
            let mut bag = bag_from_flags(session, &flags)?;
            if !bag.has(names::OUTPUT_FILE) {
                let file = format!("{name}.csv");
                let path = match &session.config.output_dir {
                    Some(dir) => dir.join(&file),
                    None => PathBuf::from(&file),
                };
                bag.set(names::OUTPUT_FILE, ArgValue::Str(path.display().to_string()));
            }
            let separator = session.config.separator.unwrap_or(',');
            metrics::run(name, &bag, separator)?;
            println!("metric `{name}` written");
            Ok(Outcome::Continue)
        }
        other => Err(Error::InvalidCommand(other.to_string())),
    }
}

/// Separate positionals from `--flag value` pairs.
fn split_arguments<'a>(tokens: &[&'a str]) -> Result<(Vec<&'a str>, Vec<(String, String)>)> {
    let mut positionals = Vec::new();
    let mut flags = Vec::new();
    let mut it = tokens.iter();
    while let Some(&token) = it.next() {
        if let Some(name) = token.strip_prefix("--").or_else(|| token.strip_prefix('-')) {
            let value = it
                .next()
                .ok_or_else(|| Error::InvalidCommand(format!("flag `{token}` needs a value")))?;
            flags.push((name.to_string(), value.to_string()));
        } else {
            positionals.push(token);
        }
    }
    Ok((positionals, flags))
}

fn require_positionals<'a, const N: usize>(
    usage: &str,
    positionals: &[&'a str],
) -> Result<[&'a str; N]> {
    positionals
        .try_into()
        .map_err(|_| Error::InvalidCommand(format!("usage: {usage}")))
}

fn lookup_dataset(session: &Session, alias: &str) -> Result<Arc<TraceDataset>> {
    session
        .datasets
        .get(alias)
        .cloned()
        .ok_or_else(|| Error::InvalidArgument(format!("no dataset named `{alias}`")))
}

/// Convert shell flags into a typed argument bag using the canonical key
/// names; dataset-valued keys resolve through the session's alias table.
fn bag_from_flags(session: &Session, flags: &[(String, String)]) -> Result<ArgBag> {
    let mut bag = ArgBag::new();
    for (name, value) in flags {
        let value = match name.as_str() {
            names::DATASET
            | names::TRAINING_DATASET
            | names::TESTING_DATASET
            | names::FIXED_DATASET
            | names::RANDOM_DATASET => ArgValue::Dataset(lookup_dataset(session, value)?),
            names::TRACE_COUNT
            | names::TRACE_STEP
            | names::SAMPLE_START
            | names::SAMPLE_END
            | names::BYTE_INDEX
            | names::INTEGRATION_SAMPLE_COUNT
            | names::ENUMERATED_KEY_COUNT
            | names::OUTPUT_KEY_COUNT
            | names::SAMPLE_FILTER
            | names::BIN_SIZE => ArgValue::U32(parse_u32(name, value)?),
            names::KNOWN_KEY | names::ORDER | names::SUBKEY => {
                ArgValue::U8(parse_u8(name, value)?)
            }
            names::SIGMA | names::INTEGRATION_LOWER_BOUND | names::INTEGRATION_UPPER_BOUND => {
                ArgValue::F64(value.parse().map_err(|_| {
                    Error::InvalidArgument(format!("flag `{name}` expects a number, got `{value}`"))
                })?)
            }
            names::MODEL
            | names::DISTINGUISHER
            | names::PROFILER
            | names::SCORE
            | names::OUTPUT_FILE => ArgValue::Str(value.clone()),
            other => {
                return Err(Error::InvalidArgument(format!("unknown flag `{other}`")));
            }
        };
        bag.set(name.clone(), value);
    }
    Ok(bag)
}

fn parse_u32(name: &str, value: &str) -> Result<u32> {
    value.parse().map_err(|_| {
        Error::InvalidArgument(format!("flag `{name}` expects an integer, got `{value}`"))
    })
}

/// Byte values accept decimal or `0x`-prefixed hex.
fn parse_u8(name: &str, value: &str) -> Result<u8> {
    let parsed = match value.strip_prefix("0x") {
        Some(hex_digits) => u8::from_str_radix(hex_digits, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| {
        Error::InvalidArgument(format!("flag `{name}` expects a byte value, got `{value}`"))
    })
}

fn print_help() {
    println!("commands:");
    println!("  help");
    println!("  load <alias> <file> [--loader bin]");
    println!("  unload <alias>");
    println!("  datasets");
    println!("  split <alias> <first-alias> <second-alias> <index>");
    println!("  metric <name> --dataset <alias> (--flag value)*");
    println!("  quit | exit");
    let registry = plugin::registry();
    println!("metrics:        {}", registry.names(PluginKind::Metric).join(", "));
    println!("scores:         {}", registry.names(PluginKind::Score).join(", "));
    println!("distinguishers: {}", registry.names(PluginKind::Distinguisher).join(", "));
    println!("models:         {}", registry.names(PluginKind::PowerModel).join(", "));
    println!("profilers:      {}", registry.names(PluginKind::Profiler).join(", "));
    println!("loaders:        {}", registry.names(PluginKind::Loader).join(", "));
}
