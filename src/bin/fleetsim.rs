use clap::{App, Arg, SubCommand};
use colored::*;
use fleetsim::emulator::{DeviceEmulator, FleetIdentity, UplinkSink};
use fleetsim::envelope::Envelope;
use fleetsim::profile::{DeviceInstance, DeviceProfile, Gateway};
use fleetsim::scenario::{AlarmTrigger, Scenario};
use fleetsim::scheduler::StartOptions;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Fleet definition loaded from a JSON config file. Profiles are assumed
/// to have passed schema validation upstream; the emulator re-checks only
/// its own invariants.
#[derive(Debug, Deserialize)]
struct FleetConfig {
    organization_id: String,
    site_id: String,
    unit_id: String,
    application_id: String,
    gateways: Vec<Gateway>,
    profiles: Vec<DeviceProfile>,
    devices: Vec<DeviceInstance>,
    #[serde(default)]
    scenarios: Vec<Scenario>,
    #[serde(default)]
    triggers: Vec<AlarmTrigger>,
}

/// Prints each envelope to stdout as a single JSON line.
struct StdoutSink {
    pretty: bool,
}

impl UplinkSink for StdoutSink {
    fn deliver(&self, envelope: &Envelope, _application_id: &str) -> fleetsim::Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(envelope)?
        } else {
            serde_json::to_string(envelope)?
        };
        println!(
            "{} {}",
            envelope.end_device_ids.device_id.cyan().bold(),
            json
        );
        Ok(())
    }
}

fn build_emulator(config: FleetConfig, pretty: bool) -> fleetsim::Result<DeviceEmulator> {
    let identity = FleetIdentity {
        organization_id: config.organization_id,
        site_id: config.site_id,
        unit_id: config.unit_id,
        application_id: config.application_id,
    };
    let sink = Arc::new(StdoutSink { pretty });
    let mut emulator = DeviceEmulator::new(identity, config.gateways, sink);

    for profile in config.profiles {
        emulator.register_profile(profile)?;
    }
    for device in config.devices {
        emulator.register_device(device)?;
    }
    for scenario in config.scenarios {
        emulator.catalog_mut().add_scenario(scenario);
    }
    for trigger in config.triggers {
        emulator.catalog_mut().add_trigger(trigger);
    }
    Ok(emulator)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("fleetsim")
        .version("0.1.0")
        .about("📡 LoRaWAN fleet emulator - reproducible uplinks for ingestion testing")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Fleet configuration file (JSON)")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("pretty")
                .long("pretty")
                .help("Pretty-print envelope JSON")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("▶️  Start every device on its own emission interval")
                .arg(
                    Arg::with_name("immediate")
                        .long("immediate")
                        .help("Emit once per device before the first interval elapses"),
                ),
        )
        .subcommand(
            SubCommand::with_name("emit")
                .about("📨 Emit a single uplink for one device")
                .arg(
                    Arg::with_name("device")
                        .short("d")
                        .long("device")
                        .value_name("DEVICE_ID")
                        .takes_value(true)
                        .required(true),
                )
                .arg(
                    Arg::with_name("scenario")
                        .short("s")
                        .long("scenario")
                        .value_name("SCENARIO_ID")
                        .help("Scenario to compose (defaults to normal)")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("trigger")
                        .short("t")
                        .long("trigger")
                        .value_name("TRIGGER_ID")
                        .help("Compose a named alarm trigger instead of a scenario")
                        .takes_value(true)
                        .conflicts_with("scenario"),
                ),
        )
        .subcommand(
            SubCommand::with_name("scenarios")
                .about("📋 List the scenarios each device supports"),
        )
        .get_matches();

    let config_path = match matches.value_of("config") {
        Some(path) => path,
        None => {
            eprintln!("{}", "--config <FILE> is required".red());
            std::process::exit(1);
        }
    };
    let pretty = matches.is_present("pretty");
    let raw = std::fs::read_to_string(config_path)?;
    let config: FleetConfig = serde_json::from_str(&raw)?;
    let emulator = Arc::new(build_emulator(config, pretty)?);

    match matches.subcommand() {
        ("run", Some(sub)) => {
            let options = StartOptions { emit_immediately: sub.is_present("immediate") };
            emulator.start_all(options)?;
            info!(devices = emulator.device_ids().len(), "fleet running, Ctrl-C to stop");
            println!(
                "{} {} devices emitting, press Ctrl-C to stop",
                "▶".green().bold(),
                emulator.device_ids().len()
            );

            tokio::signal::ctrl_c().await?;
            emulator.stop_all();
            println!("{} fleet stopped", "■".red().bold());
        }
        ("emit", Some(sub)) => {
            let device_id = sub.value_of("device").expect("device is required");
            if let Some(trigger_id) = sub.value_of("trigger") {
                emulator.emit_alarm(device_id, trigger_id)?;
            } else {
                let scenario_id = sub.value_of("scenario").unwrap_or("normal");
                emulator.emit_once(device_id, scenario_id)?;
            }
        }
        ("scenarios", _) => {
            for device_id in emulator.device_ids() {
                let device = emulator.device(&device_id)?;
                let profile = emulator.profile(&device.profile_id)?;
                println!("{} (profile: {})", device_id.cyan().bold(), profile.id);
                for scenario in emulator.catalog().device_scenarios(device, profile) {
                    println!("  - {} ({})", scenario.id.green(), scenario.name);
                }
            }
        }
        _ => {
            eprintln!("{}", "No subcommand given; try `fleetsim run --config fleet.json`".yellow());
        }
    }

    Ok(())
}
