/**
 * Shared data model for the elevator cluster.
 *
 * `ElevatorState` is the per-elevator record every node keeps for itself and
 * for each known peer. The motion predicates (`should_stop`,
 * `next_direction`, queue introspection) live here because the coordinator,
 * the cost function and the tests all query the same rules.
 */

/***************************************/
/*        3rd party libraries          */
/***************************************/
use driver_rust::elevio::elev::{CAB, DIRN_DOWN, DIRN_STOP, DIRN_UP, HALL_DOWN, HALL_UP};
use std::time::Instant;

/***************************************/
/*             Constants               */
/***************************************/
pub const HALL_DOWN_IDX: usize = 0;
pub const HALL_UP_IDX: usize = 1;

/***************************************/
/*       Public data structures        */
/***************************************/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Down,
    Stop,
    Up,
}

impl Direction {
    pub fn as_i8(&self) -> i8 {
        match *self {
            Direction::Down => -1,
            Direction::Stop => 0,
            Direction::Up => 1,
        }
    }

    pub fn from_i8(value: i8) -> Option<Direction> {
        match value {
            -1 => Some(Direction::Down),
            0 => Some(Direction::Stop),
            1 => Some(Direction::Up),
            _ => None,
        }
    }

    pub fn to_driver(&self) -> u8 {
        match *self {
            Direction::Up => DIRN_UP,
            Direction::Down => DIRN_DOWN,
            Direction::Stop => DIRN_STOP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonKind {
    HallDown,
    HallUp,
    Cab,
    Stop,
}

impl ButtonKind {
    /// Integer value used on the wire (`Order.Type`).
    pub fn wire_value(&self) -> u8 {
        match *self {
            ButtonKind::HallDown => 0,
            ButtonKind::HallUp => 1,
            ButtonKind::Cab => 2,
            ButtonKind::Stop => 3,
        }
    }

    pub fn from_wire(value: u8) -> Option<ButtonKind> {
        match value {
            0 => Some(ButtonKind::HallDown),
            1 => Some(ButtonKind::HallUp),
            2 => Some(ButtonKind::Cab),
            3 => Some(ButtonKind::Stop),
            _ => None,
        }
    }

    /// Row into `hall_calls` for the two hall kinds.
    pub fn hall_index(&self) -> usize {
        match *self {
            ButtonKind::HallDown => HALL_DOWN_IDX,
            ButtonKind::HallUp => HALL_UP_IDX,
            _ => panic!("not a hall button"),
        }
    }

    /// The travel direction a hall kind asks for.
    pub fn direction(&self) -> Direction {
        match *self {
            ButtonKind::HallUp => Direction::Up,
            ButtonKind::HallDown => Direction::Down,
            _ => Direction::Stop,
        }
    }

    /// The button constant the elevator driver expects. Not defined for the
    /// stop button, which has its own lamp channel.
    pub fn to_driver(&self) -> u8 {
        match *self {
            ButtonKind::HallUp => HALL_UP,
            ButtonKind::HallDown => HALL_DOWN,
            ButtonKind::Cab => CAB,
            ButtonKind::Stop => panic!("stop button has no call lamp"),
        }
    }
}

/// Button event emitted by the hardware adapter. `floor` is 0 for the stop
/// button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub kind: ButtonKind,
    pub floor: u8,
}

/// Floor-sensor event; `direction` is the last commanded motor direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloorEvent {
    pub floor: u8,
    pub direction: Direction,
}

/// Lamp commands accepted by the hardware adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightCommand {
    CallButton { floor: u8, kind: ButtonKind, on: bool },
    Door(bool),
    StopLamp(bool),
    FloorIndicator(u8),
}

/// A hall order in flight between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub order_id: u32,
    pub floor: u8,
    pub kind: ButtonKind,
}

/// Calls cleared when servicing a floor; the coordinator mirrors these to
/// the button lamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearedCalls {
    pub cab: bool,
    pub hall_down: bool,
    pub hall_up: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElevatorState {
    pub ip: String,
    pub internal_calls: Vec<bool>,
    /// Indexed `[HALL_DOWN_IDX | HALL_UP_IDX][floor]`.
    pub hall_calls: Vec<Vec<bool>>,
    pub last_floor: u8,
    pub direction: Direction,
    pub moving: bool,
    pub door_open: bool,
}

/// A peer as the coordinator tracks it: its last reported state plus the
/// local receive time of its last message.
#[derive(Debug, Clone)]
pub struct KnownElevator {
    pub state: ElevatorState,
    pub last_heard: Instant,
}

impl KnownElevator {
    pub fn new(ip: String, n_floors: usize) -> KnownElevator {
        KnownElevator {
            state: ElevatorState::new(ip, n_floors),
            last_heard: Instant::now(),
        }
    }
}

impl ElevatorState {
    pub fn new(ip: String, n_floors: usize) -> ElevatorState {
        ElevatorState {
            ip,
            internal_calls: vec![false; n_floors],
            hall_calls: vec![vec![false; n_floors]; 2],
            last_floor: 0,
            direction: Direction::Stop,
            moving: false,
            door_open: false,
        }
    }

    pub fn n_floors(&self) -> usize {
        self.internal_calls.len()
    }

    fn top_floor(&self) -> u8 {
        (self.n_floors() - 1) as u8
    }

    /// Registers a hall call. Calls that cannot be served (UP at the top
    /// floor, DOWN at the bottom floor) are ignored; returns whether the
    /// call was accepted.
    pub fn set_hall_call(&mut self, kind: ButtonKind, floor: u8) -> bool {
        if floor >= self.n_floors() as u8 {
            return false;
        }
        if kind == ButtonKind::HallUp && floor == self.top_floor() {
            return false;
        }
        if kind == ButtonKind::HallDown && floor == 0 {
            return false;
        }
        self.hall_calls[kind.hall_index()][floor as usize] = true;
        true
    }

    pub fn orders_above(&self) -> bool {
        for floor in (self.last_floor as usize + 1)..self.n_floors() {
            if self.internal_calls[floor]
                || self.hall_calls[HALL_DOWN_IDX][floor]
                || self.hall_calls[HALL_UP_IDX][floor]
            {
                return true;
            }
        }
        false
    }

    pub fn orders_below(&self) -> bool {
        for floor in 0..self.last_floor as usize {
            if self.internal_calls[floor]
                || self.hall_calls[HALL_DOWN_IDX][floor]
                || self.hall_calls[HALL_UP_IDX][floor]
            {
                return true;
            }
        }
        false
    }

    pub fn order_at_floor(&self) -> bool {
        let floor = self.last_floor as usize;
        self.internal_calls[floor]
            || self.hall_calls[HALL_DOWN_IDX][floor]
            || self.hall_calls[HALL_UP_IDX][floor]
    }

    pub fn have_orders(&self) -> bool {
        self.orders_above() || self.orders_below() || self.order_at_floor()
    }

    /// Whether the cabin should stop at `last_floor` travelling in
    /// `direction`.
    pub fn should_stop(&self) -> bool {
        let floor = self.last_floor as usize;
        match self.direction {
            Direction::Stop => true,
            Direction::Up => {
                self.internal_calls[floor]
                    || self.hall_calls[HALL_UP_IDX][floor]
                    || !self.orders_above()
                    || self.last_floor == self.top_floor()
            }
            Direction::Down => {
                self.internal_calls[floor]
                    || self.hall_calls[HALL_DOWN_IDX][floor]
                    || !self.orders_below()
                    || self.last_floor == 0
            }
        }
    }

    /// Continue in the current direction while orders remain in it,
    /// otherwise reverse if orders exist on the other side, otherwise stop.
    pub fn next_direction(&self) -> Direction {
        match self.direction {
            Direction::Up => {
                if self.orders_above() {
                    Direction::Up
                } else if self.orders_below() {
                    Direction::Down
                } else {
                    Direction::Stop
                }
            }
            Direction::Down => {
                if self.orders_below() {
                    Direction::Down
                } else if self.orders_above() {
                    Direction::Up
                } else {
                    Direction::Stop
                }
            }
            Direction::Stop => {
                if self.orders_above() {
                    Direction::Up
                } else if self.orders_below() {
                    Direction::Down
                } else {
                    Direction::Stop
                }
            }
        }
    }

    /// Clears the calls served by stopping at `last_floor`. The cabin call
    /// always clears. A hall call clears when it points along the travel
    /// direction, or when the cabin is turning around here (no orders left
    /// beyond this floor), so the last order at a turnaround floor is
    /// honored regardless of label.
    pub fn clear_calls_at_floor(&mut self) -> ClearedCalls {
        let floor = self.last_floor as usize;
        let mut cleared = ClearedCalls::default();

        if self.internal_calls[floor] {
            self.internal_calls[floor] = false;
            cleared.cab = true;
        }

        let clear_down = match self.direction {
            Direction::Down => true,
            Direction::Up => !self.orders_above(),
            Direction::Stop => true,
        };
        let clear_up = match self.direction {
            Direction::Up => true,
            Direction::Down => !self.orders_below(),
            Direction::Stop => true,
        };

        if clear_down && self.hall_calls[HALL_DOWN_IDX][floor] {
            self.hall_calls[HALL_DOWN_IDX][floor] = false;
            cleared.hall_down = true;
        }
        if clear_up && self.hall_calls[HALL_UP_IDX][floor] {
            self.hall_calls[HALL_UP_IDX][floor] = false;
            cleared.hall_up = true;
        }
        cleared
    }
}
