//! Backends subcommand: which shutdown notification mechanisms this build has

use anyhow::Result;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use shutdown_guard_core::Backend;

fn mechanism(backend: Backend) -> &'static str {
    match backend {
        Backend::Signal => "SIGINT / SIGTERM / SIGHUP",
        Backend::SessionMessage => "WM_QUERYENDSESSION / WM_ENDSESSION + console control",
        Backend::SessionBus => "logind PrepareForShutdown + delay inhibitor",
        Backend::Manual => "in-process trigger",
    }
}

pub fn run() -> Result<()> {
    let default = Backend::platform_default();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Backend").fg(Color::Cyan),
            Cell::new("Available").fg(Color::Cyan),
            Cell::new("Mechanism").fg(Color::Cyan),
        ]);

    for backend in Backend::OS_BACKENDS {
        let available = if backend.is_compiled() {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };
        let name = if backend == default {
            format!("{backend} (default)")
        } else {
            backend.to_string()
        };
        table.add_row(vec![Cell::new(name), available, Cell::new(mechanism(backend))]);
    }

    eprintln!("\n{table}");
    Ok(())
}
