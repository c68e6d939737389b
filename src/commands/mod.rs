//! Subcommand implementations

pub mod apply;
pub mod plan;
pub mod secrets;
pub mod validate;

use anyhow::Result;
use std::path::PathBuf;

use crate::Context;
use crate::paths;
use crate::schema::HostConfig;

/// Resolve and load the host description
fn load_config(ctx: &Context) -> Result<(PathBuf, HostConfig)> {
    let path = paths::config_file(ctx.config.as_deref());
    let config = HostConfig::load(&path)?;
    Ok((path, config))
}
