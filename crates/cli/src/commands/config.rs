use winrm_iap::tunnel::TunnelCommand;

use super::CommandContext;
use crate::error::Result;
use crate::output::{self, ConfigReport};

pub fn execute(ctx: &CommandContext) -> Result<()> {
	let command = ctx.gcloud.command_line(&ctx.spec)?;
	output::print(ctx.format, &ConfigReport::new(&ctx.spec, command, &ctx.host.transport))
}
