//! ShopSplit offline reporting tool.
//!
//! Loads an exported assignment-record file (the per-user JSON array the
//! engine persists) plus an analytics event export, and prints the
//! per-experiment conversion summary and, optionally, the funnel breakdown.

use anyhow::Context;
use clap::Parser;
use shopsplit_analytics::EventStore;
use shopsplit_core::types::{AnalyticsEvent, EventType, UserAssignment};
use shopsplit_reporting::funnel::default_steps;
use shopsplit_reporting::{experiment_funnel, experiment_summary, ExperimentSummary, VariantFunnel};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "shopsplit-report")]
#[command(about = "Offline conversion reporting over exported experiment data")]
#[command(version)]
struct Cli {
    /// Experiment id to analyze
    #[arg(long, short = 'e', env = "SHOPSPLIT__EXPERIMENT")]
    experiment: String,

    /// Path to the exported assignment records (JSON array)
    #[arg(long, env = "SHOPSPLIT__ASSIGNMENTS")]
    assignments: PathBuf,

    /// Path to the exported analytics events (JSON array)
    #[arg(long, env = "SHOPSPLIT__EVENTS")]
    events: PathBuf,

    /// Control variant id (defaults to a variant literally named "control")
    #[arg(long)]
    control: Option<String>,

    /// Also print the per-variant funnel breakdown
    #[arg(long, default_value_t = false)]
    funnel: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shopsplit=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let assignments: Vec<UserAssignment> = serde_json::from_str(
        &std::fs::read_to_string(&cli.assignments)
            .with_context(|| format!("reading {}", cli.assignments.display()))?,
    )
    .context("parsing assignment export")?;

    let raw_events: Vec<AnalyticsEvent> = serde_json::from_str(
        &std::fs::read_to_string(&cli.events)
            .with_context(|| format!("reading {}", cli.events.display()))?,
    )
    .context("parsing event export")?;

    let store = EventStore::new();
    let mut skipped = 0usize;
    for event in raw_events {
        if store.insert(event).is_err() {
            skipped += 1;
        }
    }
    if skipped > 0 {
        warn!(count = skipped, "events with duplicate ids skipped");
    }
    info!(
        assignments = assignments.len(),
        events = store.len(),
        experiment = %cli.experiment,
        "export loaded"
    );

    let summary = experiment_summary(&assignments, &store, &cli.experiment, cli.control.as_deref());
    if summary.variants.is_empty() {
        warn!(experiment = %cli.experiment, "no data found for experiment");
        return Ok(());
    }
    print_summary(&summary);

    if cli.funnel {
        let funnels = experiment_funnel(&store, &cli.experiment, &default_steps());
        print_funnels(&funnels);
    }

    Ok(())
}

fn print_summary(summary: &ExperimentSummary) {
    println!("\nConversion summary: {}", summary.experiment_id);
    println!("{}", "-".repeat(78));
    println!(
        "{:<16} {:>8} {:>10} {:>8} {:>12} {:>10} {:>8}",
        "variant", "users", "converted", "rate", "revenue", "rev/user", "lift"
    );
    for v in &summary.variants {
        let control_marker = if summary.control_variant_id.as_deref() == Some(&v.variant_id) {
            " (control)"
        } else {
            ""
        };
        let lift = v
            .lift_vs_control
            .map(|l| format!("{:+.1}%", l * 100.0))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<16} {:>8} {:>10} {:>7.2}% {:>12.2} {:>10.2} {:>8}",
            format!("{}{}", v.variant_id, control_marker),
            v.assigned_users,
            v.converted_users,
            v.conversion_rate * 100.0,
            v.total_revenue,
            v.revenue_per_user,
            lift
        );
    }
    println!("{}", "-".repeat(78));
    println!("total users: {}", summary.total_users);
}

fn print_funnels(funnels: &[VariantFunnel]) {
    println!("\nFunnel breakdown");
    println!("{}", "-".repeat(58));
    for funnel in funnels {
        println!(
            "{} (overall {:.2}%)",
            funnel.variant_id,
            funnel.overall_conversion_rate * 100.0
        );
        for step in &funnel.steps {
            println!(
                "  {:<16} {:>8} users {:>8} events {:>7.2}%",
                event_label(step.event_type),
                step.unique_users,
                step.total_events,
                step.conversion_rate * 100.0
            );
        }
    }
}

fn event_label(event_type: EventType) -> &'static str {
    match event_type {
        EventType::PageView => "page_view",
        EventType::ProductView => "product_view",
        EventType::AddToCart => "add_to_cart",
        EventType::CheckoutStart => "checkout_start",
        EventType::Purchase => "purchase",
        EventType::SessionStart => "session_start",
        EventType::SessionEnd => "session_end",
        EventType::Custom => "custom",
        EventType::ExperimentAssigned => "experiment_assigned",
        EventType::ExperimentConverted => "experiment_converted",
    }
}
