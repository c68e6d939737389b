//! `vpsctl secrets`

use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::engine::report::reveal;
use crate::paths;
use crate::state::SecretsStore;
use crate::ui;

pub fn run(ctx: &Context, show: bool) -> Result<()> {
    let store = SecretsStore::load(&paths::secrets_file(&paths::state_dir()))?;

    if store.secrets.is_empty() {
        if !ctx.quiet {
            ui::info("No secrets have been generated yet");
        }
        return Ok(());
    }

    ui::header("Stored Secrets");
    ui::kv("File", &store.path().display().to_string());
    println!();
    for (key, stored) in &store.secrets {
        println!(
            "  {:<20} {:<24} {}",
            key.bold(),
            reveal(&stored.value, show),
            stored
                .created_at
                .format("%Y-%m-%d %H:%M UTC")
                .to_string()
                .dimmed()
        );
    }
    Ok(())
}
