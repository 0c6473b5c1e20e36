use anyhow::{Context as _, Result};
use colored::Colorize;
use converge::facts;
use serde_json::{Map, Value};

use crate::Context;
use crate::cli::TargetArgs;
use crate::ui;

pub fn list() {
    ui::header("Facts");
    for fact in facts::all() {
        println!("  {}", fact.name());
    }
}

pub fn run(ctx: &Context, args: &TargetArgs, name: &str, fact_args: &[String]) -> Result<()> {
    let fact = facts::by_name(name)
        .with_context(|| format!("Unknown fact {name}, see `rollout fact --list`"))?;
    let mut state = super::prepare(args)?;
    super::connect(ctx, &mut state)?;

    let fact_args: Vec<&str> = fact_args.iter().map(String::as_str).collect();
    let mut values = Map::new();
    let mut failures = 0;
    for host in state.inventory().activated_hosts() {
        if state.unreachable().contains(host.name()) {
            continue;
        }
        match host.get_fact_ref(fact, &fact_args) {
            Ok(value) => {
                values.insert(host.name().to_string(), value);
            }
            Err(e) => {
                failures += 1;
                ui::error(&format!("{}: {e}", host.name().bold()));
                values.insert(host.name().to_string(), Value::Null);
            }
        }
    }
    state.disconnect_all();

    println!("{}", serde_json::to_string_pretty(&Value::Object(values))?);
    if failures > 0 {
        anyhow::bail!("{failures} host(s) failed to gather {}", fact.name());
    }
    Ok(())
}
