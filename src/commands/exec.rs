use anyhow::Result;
use converge::operations::server;
use serde_json::Value;

use crate::Context;
use crate::cli::TargetArgs;

pub fn run(ctx: &Context, args: &TargetArgs, command: &str, ignore_errors: bool) -> Result<()> {
    let mut state = super::prepare(args)?;
    super::connect(ctx, &mut state)?;

    state.add_deploy(|deploy| {
        let op = server::shell(&[command]);
        if ignore_errors {
            deploy.with_config([("IGNORE_ERRORS", Value::Bool(true))], |deploy| {
                deploy.add_op(op);
                Ok(())
            })
        } else {
            deploy.add_op(op);
            Ok(())
        }
    })?;

    let summary = super::run_deploy(ctx, &state)?;
    if !summary.is_success() {
        anyhow::bail!("{} host(s) failed", summary.failed_hosts.len().max(1));
    }
    Ok(())
}
