#[macro_use]
pub mod macros;
pub mod structs;

#[cfg(test)]
mod structs_tests;

pub use structs::ButtonEvent;
pub use structs::ButtonKind;
pub use structs::ClearedCalls;
pub use structs::Direction;
pub use structs::ElevatorState;
pub use structs::FloorEvent;
pub use structs::KnownElevator;
pub use structs::LightCommand;
pub use structs::Order;
pub use structs::HALL_DOWN_IDX;
pub use structs::HALL_UP_IDX;
