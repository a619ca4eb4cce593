/**
 * Wire format for the elevator cluster.
 *
 * Two message families share one JSON envelope discriminated by the integer
 * `Event` field: order messages (the three-way dispatch handshake) and
 * backup messages (heartbeats, cabin-call replication and state recovery).
 * The field names and event integers are the cluster contract; nodes are
 * upgraded one at a time, so they must never change.
 */

/***************************************/
/*        3rd party libraries          */
/***************************************/
use serde::{Deserialize, Serialize};
use thiserror::Error;

/***************************************/
/*           Local modules             */
/***************************************/
use crate::shared::{ButtonKind, Direction, ElevatorState, Order};

/***************************************/
/*               Events                */
/***************************************/
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(into = "u8", try_from = "u8")]
pub enum Event {
    SendOrderToElevator = 0,
    AckOrderFromElevator = 1,
    ConfirmAckFromElevator = 2,
    SendBackupToAll = 3,
    RequestStateFromElevator = 4,
    StillOnline = 5,
    AckBackup = 6,
    BackupAllConfirmed = 7,
    AnswerStateRequest = 8,
    ButtonPressed = 9,
    FloorReached = 10,
}

impl From<Event> for u8 {
    fn from(event: Event) -> u8 {
        event as u8
    }
}

impl TryFrom<u8> for Event {
    type Error = String;

    fn try_from(value: u8) -> Result<Event, String> {
        match value {
            0 => Ok(Event::SendOrderToElevator),
            1 => Ok(Event::AckOrderFromElevator),
            2 => Ok(Event::ConfirmAckFromElevator),
            3 => Ok(Event::SendBackupToAll),
            4 => Ok(Event::RequestStateFromElevator),
            5 => Ok(Event::StillOnline),
            6 => Ok(Event::AckBackup),
            7 => Ok(Event::BackupAllConfirmed),
            8 => Ok(Event::AnswerStateRequest),
            9 => Ok(Event::ButtonPressed),
            10 => Ok(Event::FloorReached),
            _ => Err(format!("unknown event tag {}", value)),
        }
    }
}

/***************************************/
/*       Public data structures        */
/***************************************/
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireOrder {
    #[serde(rename = "OrderID")]
    pub order_id: u32,
    #[serde(rename = "Floor")]
    pub floor: u8,
    #[serde(rename = "Type")]
    pub kind: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OrderMessage {
    #[serde(rename = "Event")]
    pub event: Event,
    #[serde(rename = "SentFrom")]
    pub sent_from: String,
    #[serde(rename = "SendTo")]
    pub send_to: String,
    #[serde(rename = "OrderID")]
    pub order_id: u32,
    #[serde(rename = "Order")]
    pub order: WireOrder,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WireState {
    #[serde(rename = "LocalIP")]
    pub local_ip: String,
    #[serde(rename = "InternalOrders")]
    pub internal_orders: Vec<bool>,
    #[serde(rename = "ExternalOrders")]
    pub external_orders: Vec<Vec<bool>>,
    #[serde(rename = "PrevFloor")]
    pub prev_floor: u8,
    #[serde(rename = "CurrentDirection")]
    pub current_direction: i8,
    #[serde(rename = "Moving")]
    pub moving: bool,
    #[serde(rename = "OpenDoor")]
    pub open_door: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackupData {
    #[serde(rename = "CurrentState")]
    pub current_state: WireState,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackupMessage {
    #[serde(rename = "Event")]
    pub event: Event,
    #[serde(rename = "SentFrom")]
    pub sent_from: String,
    #[serde(rename = "SendTo")]
    pub send_to: String,
    #[serde(rename = "BackupData", default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupData>,
}

/// A datagram after codec inspection. Self-addressed datagrams are not
/// delivered as messages; their arrival is still reported because a node's
/// own broadcast echoing back is the proof that its network path works.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Order(OrderMessage),
    Backup(BackupMessage),
    SelfEcho,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed datagram: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing or non-integer Event field")]
    MissingEvent,
    #[error("unknown event tag {0}")]
    UnknownEvent(u64),
    #[error("empty sender address")]
    EmptySender,
    #[error("order floor {floor} out of range (n_floors = {n_floors})")]
    BadFloor { floor: u8, n_floors: usize },
    #[error("order type {0} is not a hall button")]
    BadOrderKind(u8),
    #[error("backup vectors do not match the floor count")]
    BadStateShape,
    #[error("invalid direction value {0}")]
    BadDirection(i8),
}

/***************************************/
/*             Public API              */
/***************************************/
impl OrderMessage {
    pub fn new(event: Event, order: &Order, sent_from: &str, send_to: &str) -> OrderMessage {
        OrderMessage {
            event,
            sent_from: sent_from.to_string(),
            send_to: send_to.to_string(),
            order_id: order.order_id,
            order: WireOrder {
                order_id: order.order_id,
                floor: order.floor,
                kind: order.kind.wire_value(),
            },
        }
    }

    /// An in-flight order can only carry a hall call; cabin and stop
    /// buttons never travel between nodes.
    pub fn to_order(&self) -> Option<Order> {
        let kind = ButtonKind::from_wire(self.order.kind)?;
        if kind != ButtonKind::HallUp && kind != ButtonKind::HallDown {
            return None;
        }
        Some(Order {
            order_id: self.order.order_id,
            floor: self.order.floor,
            kind,
        })
    }
}

impl BackupMessage {
    /// A payload-free broadcast (heartbeat, state request, commit signal).
    pub fn broadcast(event: Event, sent_from: &str) -> BackupMessage {
        BackupMessage {
            event,
            sent_from: sent_from.to_string(),
            send_to: String::new(),
            backup: None,
        }
    }

    /// A payload-free unicast (backup acknowledgement).
    pub fn unicast(event: Event, sent_from: &str, send_to: &str) -> BackupMessage {
        BackupMessage {
            event,
            sent_from: sent_from.to_string(),
            send_to: send_to.to_string(),
            backup: None,
        }
    }

    /// A message carrying a state snapshot; broadcast when `send_to` is
    /// empty.
    pub fn with_state(
        event: Event,
        sent_from: &str,
        send_to: &str,
        state: &ElevatorState,
    ) -> BackupMessage {
        BackupMessage {
            event,
            sent_from: sent_from.to_string(),
            send_to: send_to.to_string(),
            backup: Some(BackupData {
                current_state: WireState::from_state(state),
            }),
        }
    }
}

impl WireState {
    pub fn from_state(state: &ElevatorState) -> WireState {
        WireState {
            local_ip: state.ip.clone(),
            internal_orders: state.internal_calls.clone(),
            external_orders: state.hall_calls.clone(),
            prev_floor: state.last_floor,
            current_direction: state.direction.as_i8(),
            moving: state.moving,
            open_door: state.door_open,
        }
    }

    pub fn into_state(self) -> Option<ElevatorState> {
        Some(ElevatorState {
            ip: self.local_ip,
            internal_calls: self.internal_orders,
            hall_calls: self.external_orders,
            last_floor: self.prev_floor,
            direction: Direction::from_i8(self.current_direction)?,
            moving: self.moving,
            door_open: self.open_door,
        })
    }
}

/// Decodes one datagram. The `Event` tag selects the family; everything the
/// coordinator would have to bounds-check later is rejected here instead so
/// that handlers can index floors without further validation.
pub fn decode(raw: &[u8], local_ip: &str, n_floors: usize) -> Result<Decoded, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(raw)?;
    let event = value
        .get("Event")
        .and_then(|v| v.as_u64())
        .ok_or(DecodeError::MissingEvent)?;

    match event {
        0..=2 => {
            let msg: OrderMessage = serde_json::from_slice(raw)?;
            if let Some(echo) = check_sender(&msg.sent_from, local_ip)? {
                return Ok(echo);
            }
            if msg.order.floor >= n_floors as u8 {
                return Err(DecodeError::BadFloor {
                    floor: msg.order.floor,
                    n_floors,
                });
            }
            if msg.to_order().is_none() {
                return Err(DecodeError::BadOrderKind(msg.order.kind));
            }
            Ok(Decoded::Order(msg))
        }
        3..=8 => {
            let msg: BackupMessage = serde_json::from_slice(raw)?;
            if let Some(echo) = check_sender(&msg.sent_from, local_ip)? {
                return Ok(echo);
            }
            if let Some(ref data) = msg.backup {
                let state = &data.current_state;
                if state.internal_orders.len() != n_floors
                    || state.external_orders.len() != 2
                    || state.external_orders.iter().any(|row| row.len() != n_floors)
                {
                    return Err(DecodeError::BadStateShape);
                }
                if state.prev_floor >= n_floors as u8 {
                    return Err(DecodeError::BadFloor { floor: state.prev_floor, n_floors });
                }
                if Direction::from_i8(state.current_direction).is_none() {
                    return Err(DecodeError::BadDirection(state.current_direction));
                }
            }
            Ok(Decoded::Backup(msg))
        }
        _ => Err(DecodeError::UnknownEvent(event)),
    }
}

fn check_sender(sent_from: &str, local_ip: &str) -> Result<Option<Decoded>, DecodeError> {
    if sent_from.is_empty() {
        return Err(DecodeError::EmptySender);
    }
    if sent_from == local_ip {
        return Ok(Some(Decoded::SelfEcho));
    }
    Ok(None)
}
