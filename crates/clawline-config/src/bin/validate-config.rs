//! Checks a clawline config file and prints the settings it resolves to.
//!
//! Usage: `validate-config [config-file]`; defaults to the standard config path.

use clawline_config::{ConfigError, Settings, load_config};
use clawline_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    match load_config(&path) {
        Ok(settings) => {
            println!("{}: ok", path.display());
            print_settings(&settings);
            ExitCode::SUCCESS
        }
        Err(ConfigError::ValidationFailed { errors }) => {
            eprintln!("{}: {} problem(s)", path.display(), errors.len());
            for err in errors {
                eprintln!("  - {}", err);
            }
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            ExitCode::from(1)
        }
    }
}

fn print_settings(settings: &Settings) {
    let timing = &settings.timing;
    let actuator = &settings.actuator;

    println!("  data dir      {}", settings.service.data_dir.display());
    println!("  heartbeat     {}", format_duration(settings.service.heartbeat));
    println!(
        "  windows       first move {}, credit {}, grab finish {}",
        format_duration(timing.first_move_window),
        format_duration(timing.credit_window),
        format_duration(timing.grab_finish_window)
    );
    println!(
        "  credits       {} max per payment, {} per credit",
        settings.credits.max_per_payment, settings.credits.price_per_credit
    );
    println!(
        "  channels      coin {}, grab {}, release {} ({} pulses)",
        actuator.coin_channel,
        actuator.grab_channel,
        actuator.release_channel,
        format_duration(actuator.pulse)
    );
    match &actuator.command {
        Some(argv) => println!("  helper        {}", argv.join(" ")),
        None => println!("  helper        none, pulses are only logged"),
    }
}
