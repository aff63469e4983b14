//! DomShift CLI
//!
//! Offline tooling over the same engine the browser runs: payload checks,
//! exposure plans, SRM simulation and URL filter tests.

mod logger;
mod simulate;

use std::fs;

use clap::{Parser, Subcommand};

use ds_core::exposure::{plan_exposure, TriggerMode};
use ds_core::types::Experiment;
use ds_core::PluginConfig;
use ds_extract::{decode_url_filter, extract_experiments_json, Extraction, ExtractKeys};

use simulate::{simulate_experiment, Visibility};

#[derive(Parser)]
#[command(name = "ds-cli")]
#[command(about = "DomShift experiment payload tools")]
struct Cli {
    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode experiments and list dropped directives
    Check {
        /// Experiments JSON file
        #[arg(short, long)]
        input: String,

        /// Variable holding the change payload
        #[arg(short, long)]
        key: Option<String>,

        /// Plugin config JSON file
        #[arg(short, long)]
        config: Option<String>,

        /// Fail when anything was dropped
        #[arg(long)]
        strict: bool,
    },

    /// Print each experiment's cross-variant exposure plan
    Plan {
        #[arg(short, long)]
        input: String,

        /// Page URL
        #[arg(short, long)]
        url: String,

        #[arg(short, long)]
        config: Option<String>,
    },

    /// Run every assignment against a page and compare exposure timing
    Simulate {
        #[arg(short, long)]
        input: String,

        /// Page HTML file
        #[arg(long)]
        html: String,

        #[arg(short, long)]
        url: String,

        /// Selector of an element scrolled into view (repeatable; default: all)
        #[arg(long)]
        visible: Vec<String>,

        #[arg(short, long)]
        config: Option<String>,
    },

    /// Test a URL against a filter
    Match {
        /// Filter JSON: pattern, pattern list or filter object
        #[arg(short, long)]
        filter: String,

        #[arg(short, long)]
        url: String,
    },
}

fn main() {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    let result = match cli.command {
        Commands::Check {
            input,
            key,
            config,
            strict,
        } => cmd_check(&input, key, config.as_deref(), strict),
        Commands::Plan { input, url, config } => cmd_plan(&input, &url, config.as_deref()),
        Commands::Simulate {
            input,
            html,
            url,
            visible,
            config,
        } => cmd_simulate(&input, &html, &url, visible, config.as_deref()),
        Commands::Match { filter, url } => cmd_match(&filter, &url),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn read_file(path: &str) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))
}

fn load_config(path: Option<&str>) -> Result<PluginConfig, String> {
    match path {
        Some(path) => PluginConfig::from_json(&read_file(path)?).map_err(|e| format!("{}: {}", path, e)),
        None => Ok(PluginConfig::default()),
    }
}

fn load_experiments(path: &str, keys: &ExtractKeys) -> Result<Extraction, String> {
    let json = read_file(path)?;
    extract_experiments_json(&json, keys).map_err(|e| format!("{}: {}", path, e))
}

fn cmd_check(input: &str, key: Option<String>, config: Option<&str>, strict: bool) -> Result<(), String> {
    let config = load_config(config)?;
    let mut keys = ExtractKeys::from(&config);
    if let Some(key) = key {
        keys.variable_key = key;
    }

    let extraction = load_experiments(input, &keys)?;

    println!("Checked '{}' (key '{}')", input, keys.variable_key);
    for experiment in &extraction.experiments {
        let changes: Vec<String> = experiment
            .variants
            .iter()
            .map(|variant| variant.changes.changes.len().to_string())
            .collect();
        println!(
            "  {}: {} variants, changes per variant [{}]",
            experiment.name,
            experiment.variants.len(),
            changes.join(", ")
        );
    }

    if extraction.issues.is_empty() {
        println!("No issues");
        return Ok(());
    }

    println!("{} issues:", extraction.issues.len());
    for issue in &extraction.issues {
        println!("  {}", issue);
    }

    if strict {
        return Err(format!("{} directives or payloads were dropped", extraction.issues.len()));
    }
    Ok(())
}

fn describe_plan(experiment: &Experiment, url: &str) -> String {
    let plan = plan_exposure(experiment, url);
    let variants: Vec<String> = plan.in_scope_variants.iter().map(usize::to_string).collect();
    match plan.mode {
        None => "skipped (no change in scope)".to_string(),
        Some(TriggerMode::Immediate) => format!("immediate (variants in scope: {})", variants.join(", ")),
        Some(TriggerMode::Viewport) => {
            let targets: Vec<String> = plan
                .targets
                .iter()
                .map(|target| match &target.observer_root {
                    Some(root) => format!("{} within {}", target.selector, root),
                    None => target.selector.clone(),
                })
                .collect();
            format!(
                "viewport (variants in scope: {}; targets: {})",
                variants.join(", "),
                targets.join(", ")
            )
        }
    }
}

fn cmd_plan(input: &str, url: &str, config: Option<&str>) -> Result<(), String> {
    let config = load_config(config)?;
    let extraction = load_experiments(input, &ExtractKeys::from(&config))?;

    println!("Exposure plan for {}", url);
    for experiment in &extraction.experiments {
        println!("  {}: {}", experiment.name, describe_plan(experiment, url));
    }
    Ok(())
}

fn cmd_simulate(
    input: &str,
    html_path: &str,
    url: &str,
    visible: Vec<String>,
    config: Option<&str>,
) -> Result<(), String> {
    let config = load_config(config)?;
    let extraction = load_experiments(input, &ExtractKeys::from(&config))?;
    let html = read_file(html_path)?;
    let visibility = if visible.is_empty() {
        Visibility::All
    } else {
        Visibility::Matching(visible)
    };

    let mut mismatched = Vec::new();
    for experiment in &extraction.experiments {
        let report = simulate_experiment(&html, experiment, url, &config, &visibility)?;
        let outcomes: Vec<String> = report
            .outcomes
            .iter()
            .enumerate()
            .map(|(index, outcome)| format!("{}={}", index, outcome.as_str()))
            .collect();
        let verdict = if report.is_consistent() { "ok" } else { "SRM" };
        println!("  {}: {} [{}]", report.name, verdict, outcomes.join(" "));
        if !report.is_consistent() {
            mismatched.push(report.name);
        }
    }

    if !mismatched.is_empty() {
        return Err(format!("Assignments disagree on exposure for: {}", mismatched.join(", ")));
    }
    println!("All {} experiments are SRM-safe", extraction.experiments.len());
    Ok(())
}

/// Filter argument as JSON; anything that is not JSON is a bare pattern.
fn filter_value(filter: &str) -> serde_json::Value {
    serde_json::from_str(filter).unwrap_or_else(|_| serde_json::Value::String(filter.to_string()))
}

fn cmd_match(filter: &str, url: &str) -> Result<(), String> {
    let filter = decode_url_filter(&filter_value(filter)).map_err(|e| format!("Invalid filter: {}", e))?;

    if filter.matches(url) {
        println!("match");
    } else {
        println!("no match");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_patterns_are_taken_verbatim() {
        assert_eq!(filter_value("*/checkout"), serde_json::Value::String("*/checkout".into()));
        assert_eq!(filter_value("*\u{1b}*"), serde_json::Value::String("*\u{1b}*".into()));
        assert_eq!(filter_value("\"x\""), serde_json::Value::String("x".into()));
        assert!(filter_value(r#"{"include": ["*"]}"#).is_object());

        let filter = decode_url_filter(&filter_value("*/a\u{7}b")).expect("filter");
        assert_eq!(filter.include, vec!["*/a\u{7}b".to_string()]);
    }
}
