use anyhow::{Context as _, Result};
use converge::operations::files;
use std::fs;
use std::path::Path;

use crate::Context;
use crate::cli::TargetArgs;

pub fn run(ctx: &Context, args: &TargetArgs, src: &Path, dest: &str) -> Result<()> {
    let content =
        fs::read(src).with_context(|| format!("Could not read {}", src.display()))?;
    let mut state = super::prepare(args)?;
    super::connect(ctx, &mut state)?;

    state.add_deploy(|deploy| {
        let op = files::put_content(deploy.host(), dest, &content)?;
        deploy.add_op(op);
        Ok(())
    })?;

    let summary = super::run_deploy(ctx, &state)?;
    if !summary.is_success() {
        anyhow::bail!("upload failed on {} host(s)", summary.failed_hosts.len().max(1));
    }
    Ok(())
}
