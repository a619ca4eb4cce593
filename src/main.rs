/* 3rd party libraries */
use clap::{Arg, Command};
use crossbeam_channel as cbc;
use log::{error, info};
use std::thread::Builder;
use std::time::Duration;

/* Custom libraries */
use coordinator::Coordinator;
use elevator::ElevatorDriver;
use network::messages::{BackupMessage, OrderMessage};
use network::Network;
use shared::{ButtonEvent, Direction, FloorEvent, LightCommand};

/* Modules */
#[macro_use]
mod shared;
mod config;
mod coordinator;
mod elevator;
mod network;

/// How long the hardware gets to calibrate to a floor before startup is
/// declared failed.
const CALIBRATION_TIMEOUT: Duration = Duration::from_secs(30);

/* Main */
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("elevator-node")
        .about("Distributed elevator controller node")
        .arg(
            Arg::new("config")
                .long("config")
                .takes_value(true)
                .default_value("config.toml")
                .help("Path to the configuration file"),
        )
        .get_matches();
    let config_path = matches.value_of("config").unwrap_or("config.toml");

    // Load the configuration
    let config = unwrap_or_exit!(config::load_config(config_path));

    // Initialize channels
    let (hw_button_tx, hw_button_rx) = cbc::bounded::<ButtonEvent>(10);
    let (hw_floor_tx, hw_floor_rx) = cbc::bounded::<FloorEvent>(10);
    let (hw_obstruction_tx, hw_obstruction_rx) = cbc::bounded::<bool>(10);
    let (hw_motor_tx, hw_motor_rx) = cbc::unbounded::<Direction>();
    let (hw_light_tx, hw_light_rx) = cbc::unbounded::<LightCommand>();
    let (hw_terminate_tx, hw_terminate_rx) = cbc::unbounded::<()>();

    let (net_order_send_tx, net_order_send_rx) = cbc::unbounded::<OrderMessage>();
    let (net_backup_send_tx, net_backup_send_rx) = cbc::unbounded::<BackupMessage>();
    let (net_order_recv_tx, net_order_recv_rx) = cbc::bounded::<OrderMessage>(16);
    let (net_backup_recv_tx, net_backup_recv_rx) = cbc::bounded::<BackupMessage>(16);
    let (net_self_echo_tx, net_self_echo_rx) = cbc::bounded::<()>(1);
    let (_coordinator_terminate_tx, coordinator_terminate_rx) = cbc::unbounded::<()>();

    // Start the hardware module
    let driver = unwrap_or_exit!(ElevatorDriver::new(
        &config.hardware,
        config.elevator.n_floors,
        hw_button_tx,
        hw_floor_tx,
        hw_obstruction_tx,
        hw_motor_rx,
        hw_light_rx,
        hw_terminate_rx,
    ));
    unwrap_or_exit!(Builder::new().name("hardware".into()).spawn(move || driver.run()));

    // Start the network module
    let network = unwrap_or_exit!(Network::new(
        &config.network,
        config.elevator.n_floors as usize,
        net_order_send_rx,
        net_backup_send_rx,
        net_order_recv_tx,
        net_backup_recv_tx,
        net_self_echo_tx,
    ));

    // The hardware calibrates to a floor before the coordinator starts
    let initial_floor = match hw_floor_rx.recv_timeout(CALIBRATION_TIMEOUT) {
        Ok(event) => event.floor,
        Err(e) => {
            error!("never reached a floor during startup: {}", e);
            let _ = hw_terminate_tx.send(());
            std::process::exit(1);
        }
    };
    info!("starting from floor {}", initial_floor);

    // Run the coordinator on the main thread
    let mut coordinator = Coordinator::new(
        &config,
        network.local_ip.clone(),
        initial_floor,
        hw_button_rx,
        hw_floor_rx,
        hw_obstruction_rx,
        hw_motor_tx,
        hw_light_tx,
        net_order_send_tx,
        net_backup_send_tx,
        net_order_recv_rx,
        net_backup_recv_rx,
        net_self_echo_rx,
        coordinator_terminate_rx,
    );
    coordinator.run();

    // Only reached through a terminate signal; stop the cabin on the way out
    let _ = hw_terminate_tx.send(());
}
