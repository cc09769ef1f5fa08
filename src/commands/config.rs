use anyhow::Result;

use crate::Context;
use crate::cli::ConfigCommand;
use crate::config::PolsyncConfig;
use crate::paths;
use crate::ui;

pub fn run(_ctx: &Context, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(),
        ConfigCommand::Path => {
            println!("{}", paths::config_file()?.display());
            Ok(())
        }
    }
}

fn show() -> Result<()> {
    let path = paths::config_file()?;
    let config = PolsyncConfig::load()?;

    ui::header("Configuration");
    ui::kv("file", &path.display().to_string());
    if !path.exists() {
        ui::dim("(not found, showing defaults)");
    }
    ui::kv("principal", &config.principal());
    ui::kv("state directory", &paths::state_dir()?.display().to_string());
    ui::kv("logs directory", &config.logs_dir()?.display().to_string());
    println!();
    print!("{}", config.to_toml()?);
    Ok(())
}
