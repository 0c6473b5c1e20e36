pub mod exec;
pub mod fact;
pub mod inventory;
pub mod put;

use anyhow::Result;
use converge::{Config, DeployState, DeploySummary, Error};

use crate::Context;
use crate::cli::TargetArgs;
use crate::config::{ProjectFile, load_inventory};
use crate::progress::BarProgress;
use crate::ui;

/// Load the project, build the inventory and wrap both in a deploy.
pub fn prepare(args: &TargetArgs) -> Result<DeployState> {
    let project = ProjectFile::discover(args.config.as_deref())?;
    let config: Config = project.engine_config(args)?;
    let inventory = load_inventory(args, &project, &config)?;
    Ok(DeployState::new(inventory, config))
}

/// Connect, confirm, execute and report a built deploy.
pub fn run_deploy(ctx: &Context, state: &DeployState) -> Result<DeploySummary> {
    let mut progress = BarProgress::new(ctx.quiet);
    let result = if ctx.yes {
        state.run(&mut progress, &mut converge::AutoConfirm)
    } else {
        state.run(&mut progress, &mut ui::TerminalConfirm)
    };
    state.disconnect_all();

    if shows_results(&result) && !ctx.quiet {
        ui::print_results(&state.summary_rows()?);
    }
    let summary = result?;

    if summary.total() == 0 {
        ui::info("Nothing to do");
        return Ok(summary);
    }
    ui::print_summary(&summary);
    Ok(summary)
}

/// Whether a run produced per-operation results worth a table.
///
/// An aborted run keeps the outcomes recorded before it stopped.
fn shows_results(result: &converge::Result<DeploySummary>) -> bool {
    match result {
        Ok(summary) => summary.total() > 0,
        Err(Error::DeployAborted { .. }) => true,
        Err(_) => false,
    }
}

/// Connect to every host, warning about the ones that are down.
pub fn connect(ctx: &Context, state: &mut DeployState) -> Result<()> {
    let total = state.inventory().activated_count();
    let connected = state.connect_all()?;
    if !ctx.quiet {
        ui::dim(&format!("connected to {connected}/{total} hosts"));
    }
    for host in state.unreachable() {
        ui::warn(&format!("{host} is unreachable"));
    }
    if connected == 0 && total > 0 {
        anyhow::bail!("No hosts could be reached");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::OperationOutcome;

    #[test]
    fn test_aborted_run_still_shows_results() {
        let aborted = Err(Error::DeployAborted {
            operation: "server.shell (false)".into(),
            failed: 2,
            attempted: 2,
            threshold: None,
        });
        assert!(shows_results(&aborted));
        assert!(!shows_results(&Err(Error::config("bad key"))));
    }

    #[test]
    fn test_empty_run_shows_no_results() {
        assert!(!shows_results(&Ok(DeploySummary::default())));

        let mut summary = DeploySummary::default();
        summary.add_outcome(&OperationOutcome::Changed);
        assert!(shows_results(&Ok(summary)));
    }
}
