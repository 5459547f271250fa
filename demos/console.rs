use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use dc_load_logger::{
    instrument::{Instrument, PortId},
    logfile::FilePolicy,
    panel::ControlPanel,
    preferences::{DEFAULT_FILE_NAME, Preferences},
    serial::{SerialLoad, available_ports},
    simulation::SimulatedLoad,
    types::ConstantModeId,
};
use inquire::{CustomType, Select, Text};
use strum::IntoEnumIterator;
use tracing_subscriber::EnvFilter;

// Address of the load, set on its front panel.
const LOAD_ADDRESS: u8 = 0x00;
// How long to wait for the dispatcher after each action.
const SETTLE_TIME: Duration = Duration::from_millis(500);

const ACTIONS: &[&str] = &[
    "Show readings",
    "Start logging",
    "Stop logging",
    "Load on",
    "Load off",
    "Set constant",
    "Refresh constants",
    "Display interval",
    "File log interval",
    "Local control",
    "Quit",
];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let prefs_path = PathBuf::from(DEFAULT_FILE_NAME);
    let preferences = Preferences::load_from(&prefs_path)?;

    // `--simulate` runs against canned data, otherwise the port comes from the
    // command line, or is picked interactively.
    let arg = env::args().nth(1);
    let simulate = arg.as_deref() == Some("--simulate");
    let port = match arg {
        Some(_) if simulate => preferences.port.clone(),
        Some(name) => PortId::from(name),
        None => {
            let ports = available_ports()?;
            if ports.is_empty() {
                bail!("No serial ports found!");
            }
            PortId::from(Select::new("Select a serial port:", ports).prompt()?)
        }
    };

    let instrument: Box<dyn Instrument> = if simulate {
        println!("TEST MODE ACTIVE");
        Box::new(SimulatedLoad::randomized())
    } else {
        Box::new(SerialLoad::new(LOAD_ADDRESS, preferences.timeout()))
    };
    let baud = preferences.baud;
    let mut panel = ControlPanel::new(instrument, preferences)?.with_preferences_path(&prefs_path);

    println!("Using port: {port} @ {baud}");
    if let Err(err) = panel.connect(port, baud) {
        print_journal(&mut panel);
        return Err(err).context("connect failed");
    }
    panel.refresh_constants()?;
    settle(&mut panel);

    loop {
        let action = Select::new("Action:", ACTIONS.to_vec()).prompt()?;
        match action {
            "Show readings" => show(&panel),
            "Start logging" => start_logging(&mut panel)?,
            "Stop logging" => panel.stop_logging(),
            "Load on" => panel.load_on()?,
            "Load off" => panel.load_off()?,
            "Set constant" => {
                let modes: Vec<ConstantModeId> = ConstantModeId::iter().collect();
                let mode = Select::new("Mode:", modes).prompt()?;
                let unit = mode.descriptor().unit;
                let value = Text::new(&format!("Value ({unit}):")).prompt()?;
                panel.set_constant(mode, value)?;
            }
            "Refresh constants" => panel.refresh_constants()?,
            "Display interval" => {
                let secs = CustomType::<f64>::new("Display interval (s):").prompt()?;
                // Rejections are reported through the journal.
                let _ = panel.set_display_interval(secs);
            }
            "File log interval" => {
                let secs = CustomType::<f64>::new("File log interval (s):").prompt()?;
                let _ = panel.set_file_interval(secs);
            }
            "Local control" => panel.set_local()?,
            _ => break,
        }
        settle(&mut panel);
    }

    panel.shutdown();
    Ok(())
}

fn settle(panel: &mut ControlPanel) {
    panel.pump_for(SETTLE_TIME);
    print_journal(panel);
}

fn print_journal(panel: &mut ControlPanel) {
    for line in panel.take_journal() {
        println!("{line}");
    }
}

fn show(panel: &ControlPanel) {
    let mode = panel
        .constant_mode()
        .map_or("N/A".to_string(), |m| m.to_string());
    println!("Current mode: {mode}, load {}", panel.load_state());
    match panel.readings() {
        Some(r) => println!(
            "Input voltage: {} V, current: {} A, power: {} W",
            r.voltage, r.current, r.power
        ),
        None => println!("Input: -"),
    }
    if let Some(constants) = panel.constants() {
        for entry in constants.iter() {
            let descriptor = entry.mode.descriptor();
            let marker = if entry.is_active { "*" } else { " " };
            println!("{marker} {}: {} {}", descriptor.name, entry.value, descriptor.unit);
        }
    }
}

fn start_logging(panel: &mut ControlPanel) -> Result<()> {
    let path = panel.preferences().log_path();
    let policy = if path.exists() {
        let choice = Select::new(
            &format!("Log file \"{}\" already exists!", path.display()),
            vec!["Create new file", "Append", "Replace"],
        )
        .prompt()?;
        match choice {
            "Append" => FilePolicy::Append,
            "Replace" => FilePolicy::Replace,
            _ => {
                let new_path = Text::new("Save log file to:").prompt()?;
                panel.set_log_path(new_path);
                FilePolicy::Create
            }
        }
    } else {
        FilePolicy::Create
    };
    // Failures are already in the journal.
    let _ = panel.start_logging(policy);
    Ok(())
}
