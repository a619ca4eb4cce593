/***************************************/
/*        3rd party libraries          */
/***************************************/
use serde::Deserialize;
use std::fs;
use std::io;

/***************************************/
/*       Public data structures        */
/***************************************/
#[derive(Deserialize, Clone)]
pub struct Config {
    pub network: NetworkConfig,
    pub elevator: ElevatorConfig,
    pub hardware: HardwareConfig,
    pub coordinator: CoordinatorConfig,
}

#[derive(Deserialize, Clone)]
pub struct NetworkConfig {
    pub msg_port: u16,
    pub bcast_port: u16,
    pub id_gen_attempts: u32,
    pub id_gen_retry_ms: u64,
}

#[derive(Deserialize, Clone)]
pub struct ElevatorConfig {
    pub n_floors: u8,
    pub door_open_time: u64,
}

#[derive(Deserialize, Clone)]
pub struct HardwareConfig {
    pub driver_address: String,
    pub driver_port: u16,
    pub poll_period: u64,
}

/// Tick periods in milliseconds. The matching timeouts (peer liveness,
/// order and backup handshakes) are thirty ticks each.
#[derive(Deserialize, Clone)]
pub struct CoordinatorConfig {
    pub peer_tick: u64,
    pub heartbeat_tick: u64,
    pub sweep_tick: u64,
    pub recovery_window: u64,
}

/***************************************/
/*             Public API              */
/***************************************/
pub fn load_config(path: &str) -> io::Result<Config> {
    let config_str = fs::read_to_string(path)?;
    toml::from_str(&config_str).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
