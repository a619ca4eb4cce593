/**
 * # Elevator Driver
 * Polling adapter between the coordinator and the physical elevator.
 *
 * Runs as an owned thread. Every poll period it reads the floor sensor, the
 * call buttons, the stop button and the obstruction switch, and forwards
 * edge-detected events over bounded channels. Lamp and motor commands from
 * the coordinator are applied in the same loop.
 *
 * Button presses are reported on edges only: a press is reported once and
 * the button must be released before it can trigger again. Floor events are
 * reported only on floor changes and carry the last commanded motor
 * direction.
 *
 * # Fields
 * - `elevator`:          Instance of `Elevator` for low-level hardware control.
 * - `poll_period`:       Duration in milliseconds between hardware polls.
 * - `n_floors`:          The number of floors serviced by the elevator.
 * - `current_floor`:     Last floor the sensor reported, if any.
 * - `last_direction`:    Last commanded motor direction.
 * - `button_levels`:     Previous poll's button levels, for edge detection.
 * - `stop_level`:        Previous poll's stop button level.
 * - `obstruction`:       Previous poll's obstruction level.
 * - `hw_button_tx`:      Sender for button press events.
 * - `hw_floor_tx`:       Sender for floor arrival events.
 * - `hw_obstruction_tx`: Sender for obstruction changes.
 * - `hw_motor_rx`:       Receiver for motor direction commands.
 * - `hw_light_rx`:       Receiver for lamp commands.
 * - `terminate_rx`:      Receiver for termination signal. Used for testing.
 */

/***************************************/
/*        3rd party libraries          */
/***************************************/
use crossbeam_channel as cbc;
use driver_rust::elevio::elev::Elevator;
use log::warn;
use std::time::Duration;

/***************************************/
/*           Local modules             */
/***************************************/
use crate::config::HardwareConfig;
use crate::shared::{ButtonEvent, ButtonKind, Direction, FloorEvent, LightCommand};

/***************************************/
/*             Constants               */
/***************************************/
const CALL_KINDS: [ButtonKind; 3] = [ButtonKind::HallDown, ButtonKind::HallUp, ButtonKind::Cab];

/***************************************/
/*             Public API              */
/***************************************/
pub struct ElevatorDriver {
    elevator: Elevator,
    poll_period: u64,
    n_floors: u8,
    current_floor: Option<u8>,
    last_direction: Direction,
    button_levels: Vec<Vec<bool>>,
    stop_level: bool,
    obstruction: bool,
    hw_button_tx: cbc::Sender<ButtonEvent>,
    hw_floor_tx: cbc::Sender<FloorEvent>,
    hw_obstruction_tx: cbc::Sender<bool>,
    hw_motor_rx: cbc::Receiver<Direction>,
    hw_light_rx: cbc::Receiver<LightCommand>,
    terminate_rx: cbc::Receiver<()>,
}

impl ElevatorDriver {
    pub fn new(
        config: &HardwareConfig,
        n_floors: u8,
        hw_button_tx: cbc::Sender<ButtonEvent>,
        hw_floor_tx: cbc::Sender<FloorEvent>,
        hw_obstruction_tx: cbc::Sender<bool>,
        hw_motor_rx: cbc::Receiver<Direction>,
        hw_light_rx: cbc::Receiver<LightCommand>,
        terminate_rx: cbc::Receiver<()>,
    ) -> std::io::Result<ElevatorDriver> {
        let address = format!("{}:{}", config.driver_address, config.driver_port);
        Ok(ElevatorDriver {
            elevator: Elevator::init(&address, n_floors)?,
            poll_period: config.poll_period,
            n_floors,
            current_floor: None,
            last_direction: Direction::Stop,
            button_levels: vec![vec![false; CALL_KINDS.len()]; n_floors as usize],
            stop_level: false,
            obstruction: false,
            hw_button_tx,
            hw_floor_tx,
            hw_obstruction_tx,
            terminate_rx,
            hw_motor_rx,
            hw_light_rx,
        })
    }

    pub fn run(mut self) {
        // Reset all lamps
        for floor in 0..self.n_floors {
            for kind in CALL_KINDS {
                self.elevator.call_button_light(floor, kind.to_driver(), false);
            }
        }
        self.elevator.door_light(false);
        self.elevator.stop_button_light(false);
        self.obstruction = self.elevator.obstruction();

        self.find_initial_floor();

        // Main loop
        loop {
            self.poll_floor_sensor();
            self.poll_buttons();

            cbc::select! {
                recv(self.hw_motor_rx) -> msg => {
                    match msg {
                        Ok(direction) => {
                            self.last_direction = direction;
                            self.elevator.motor_direction(direction.to_driver());
                        }
                        Err(e) => {
                            eprintln!("ERROR - hw_motor_rx: {}", e);
                            std::process::exit(1);
                        }
                    }
                }
                recv(self.hw_light_rx) -> msg => {
                    match msg {
                        Ok(command) => self.apply_light(command),
                        Err(e) => {
                            eprintln!("ERROR - hw_light_rx: {}", e);
                            std::process::exit(1);
                        }
                    }
                }
                recv(self.terminate_rx) -> _ => {
                    self.elevator.motor_direction(Direction::Stop.to_driver());
                    break;
                }
                default(Duration::from_millis(self.poll_period)) => {}
            }
        }
    }

    /// Drives down until a floor sensor fires if the cabin starts between
    /// floors, then reports the starting floor.
    fn find_initial_floor(&mut self) {
        let floor = match self.elevator.floor_sensor() {
            Some(floor) => floor,
            None => {
                self.elevator.motor_direction(Direction::Down.to_driver());
                loop {
                    if let Some(floor) = self.elevator.floor_sensor() {
                        self.elevator.motor_direction(Direction::Stop.to_driver());
                        break floor;
                    }
                    std::thread::sleep(Duration::from_millis(self.poll_period));
                }
            }
        };
        self.current_floor = Some(floor);
        self.elevator.floor_indicator(floor);
        if self
            .hw_floor_tx
            .send(FloorEvent { floor, direction: Direction::Stop })
            .is_err()
        {
            eprintln!("ERROR - hw_floor_tx closed during init");
            std::process::exit(1);
        }
    }

    fn poll_floor_sensor(&mut self) {
        if let Some(floor) = self.elevator.floor_sensor() {
            if self.current_floor != Some(floor) {
                self.current_floor = Some(floor);
                let event = FloorEvent { floor, direction: self.last_direction };
                if self.hw_floor_tx.try_send(event).is_err() {
                    warn!("floor event queue full, dropping floor {}", floor);
                }
            }
        }
    }

    fn poll_buttons(&mut self) {
        for floor in 0..self.n_floors {
            for (index, kind) in CALL_KINDS.iter().enumerate() {
                let level = self.elevator.call_button(floor, kind.to_driver());
                let previous = self.button_levels[floor as usize][index];
                self.button_levels[floor as usize][index] = level;
                if level && !previous {
                    let event = ButtonEvent { kind: *kind, floor };
                    if self.hw_button_tx.try_send(event).is_err() {
                        warn!("button event queue full, dropping {:?}", event);
                    }
                }
            }
        }

        let stop = self.elevator.stop_button();
        if stop && !self.stop_level {
            let event = ButtonEvent { kind: ButtonKind::Stop, floor: 0 };
            if self.hw_button_tx.try_send(event).is_err() {
                warn!("button event queue full, dropping stop press");
            }
        }
        self.stop_level = stop;

        if self.elevator.obstruction() != self.obstruction {
            self.obstruction = !self.obstruction;
            let _ = self.hw_obstruction_tx.try_send(self.obstruction);
        }
    }

    fn apply_light(&mut self, command: LightCommand) {
        match command {
            LightCommand::CallButton { floor, kind, on } => {
                self.elevator.call_button_light(floor, kind.to_driver(), on);
            }
            LightCommand::Door(on) => self.elevator.door_light(on),
            LightCommand::StopLamp(on) => self.elevator.stop_button_light(on),
            LightCommand::FloorIndicator(floor) => self.elevator.floor_indicator(floor),
        }
    }
}
