//! Row updates: a single record from flags, or a JSON plan

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;

use crate::cli::{Session, output};
use crate::patch::{FieldInput, UpdatePlan, UpdateRecord, batch};

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Sheet name
    #[arg(long, short)]
    pub sheet: String,

    /// Key value identifying the row (e.g. an ASIN)
    #[arg(long, short)]
    pub key: String,

    /// Field to write, as NAME=VALUE (repeatable)
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment, required = true)]
    pub set: Vec<(String, String)>,
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// JSON plan file, or "-" for stdin
    #[arg(value_name = "PLAN")]
    pub plan: PathBuf,
}

/// Parse "NAME=VALUE"; the value may be empty (clears the cell)
pub fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    if name.trim().is_empty() {
        return Err(format!("empty field name in '{}'", raw));
    }
    Ok((name.trim().to_string(), value.to_string()))
}

pub async fn handle_update(session: &Session, args: UpdateArgs) -> Result<bool> {
    let fields: BTreeMap<String, FieldInput> = args
        .set
        .into_iter()
        .map(|(name, value)| (name, FieldInput::Text(value)))
        .collect();
    let plan = UpdatePlan::single(args.sheet, vec![UpdateRecord { key: args.key, fields }]);
    apply(session, &plan).await
}

pub async fn handle_batch(session: &Session, args: BatchArgs) -> Result<bool> {
    let text = if args.plan.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("Failed to read plan from stdin")?
    } else {
        std::fs::read_to_string(&args.plan)
            .with_context(|| format!("Failed to read plan file: {}", args.plan.display()))?
    };

    let plan = UpdatePlan::from_json(&text, &session.config.key_aliases())?;
    if plan.is_empty() {
        bail!("Plan contains no records");
    }
    log::info!(
        "Plan: {} record(s) across {} sheet(s)",
        plan.record_count(),
        plan.sheets.len()
    );
    apply(session, &plan).await
}

async fn apply(session: &Session, plan: &UpdatePlan) -> Result<bool> {
    let key = session.config.key_aliases();
    let options = session.config.batch_options();

    let report = session
        .orchestrator
        .run(&session.target, session.dry_run, |workbook| {
            batch::run_plan(workbook, &plan.sheets, &key, &options)
        })
        .await?;

    output::print_sync_report(&report, session.format)?;
    Ok(report
        .outcome
        .iter()
        .all(|sheet| sheet.error.is_none() && sheet.records.iter().all(|r| r.matched)))
}
