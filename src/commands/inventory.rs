use anyhow::Result;
use colored::Colorize;
use converge::Inventory;
use serde_json::{Value, json};

use crate::Context;
use crate::cli::TargetArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &TargetArgs, as_json: bool) -> Result<()> {
    let state = super::prepare(args)?;
    let inventory = state.inventory();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&to_json(inventory))?);
        return Ok(());
    }

    ui::header(&format!("Inventory ({} hosts)", inventory.len()));
    for host in inventory.hosts() {
        let activated = inventory.activated_hosts().any(|h| h.name() == host.name());
        let marker = if activated { "●".green() } else { "○".dimmed() };
        println!(
            "  {marker} {} {}",
            host.name().bold(),
            format!("({})", host.connector_name()).dimmed()
        );
        if !host.groups().is_empty() {
            ui::kv("groups", &host.groups().join(", "));
        }
        if ctx.verbose > 0 {
            for (key, value) in host.data() {
                ui::kv(&key, &render(&value));
            }
        }
    }

    if !inventory.groups().is_empty() {
        ui::header("Groups");
        for group in inventory.groups() {
            let members: Vec<&str> = inventory
                .hosts()
                .filter(|h| h.in_group(&group.name))
                .map(|h| h.name())
                .collect();
            ui::kv(&group.name, &members.join(", "));
        }
    }
    Ok(())
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_json(inventory: &Inventory) -> Value {
    let hosts: Vec<Value> = inventory
        .hosts()
        .map(|host| {
            json!({
                "name": host.name(),
                "connector": host.connector_name(),
                "groups": host.groups(),
                "data": host.data(),
                "activated": inventory.activated_hosts().any(|h| h.name() == host.name()),
            })
        })
        .collect();
    json!({ "hosts": hosts, "data": inventory.data() })
}
