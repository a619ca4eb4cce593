/**
 * Picks the elevator that should serve a hall call.
 *
 * Every node runs the same function over the same replicated peer table, so
 * the result must be identical everywhere: candidates are visited in sorted
 * IP order and ties keep the first (lowest) IP. The cost of a candidate is
 * found by simulating its route with the new call inserted, two cost units
 * per floor travelled and per intermediate stop, with a small head start
 * for elevators already moving.
 */

/***************************************/
/*             Libraries               */
/***************************************/
use std::collections::HashMap;
use thiserror::Error;

/***************************************/
/*           Local modules             */
/***************************************/
use crate::shared::{ButtonKind, Direction, ElevatorState, KnownElevator};

/***************************************/
/*             Constants               */
/***************************************/
const MOVING_HEAD_START: u32 = 1;
const IDLE_START: u32 = 2;
const STEP_COST: u32 = 2;
const STOP_COST: u32 = 2;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CostError {
    #[error("hall call kind {0:?} cannot be assigned")]
    NotAHallCall(ButtonKind),
    #[error("no candidate elevator could serve floor {0}")]
    NoCandidate(u8),
}

/***************************************/
/*             Public API              */
/***************************************/
/// Returns the IP of the elevator that should serve `kind` at `floor`.
/// Candidates are the active elevators plus the local node.
pub fn assign_order(
    known_elevators: &HashMap<String, KnownElevator>,
    active_elevators: &HashMap<String, bool>,
    local_ip: &str,
    kind: ButtonKind,
    floor: u8,
) -> Result<String, CostError> {
    if kind != ButtonKind::HallUp && kind != ButtonKind::HallDown {
        return Err(CostError::NotAHallCall(kind));
    }

    let mut candidates = known_elevators
        .iter()
        .filter(|(ip, _)| {
            active_elevators.get(*ip).copied().unwrap_or(false) || *ip == local_ip
        })
        .collect::<Vec<_>>();
    candidates.sort_by(|a, b| a.0.cmp(b.0));

    let mut best: Option<(u32, &str)> = None;
    for (ip, elevator) in candidates {
        let state = &elevator.state;

        // Already responsible for this exact call
        if state.hall_calls[kind.hall_index()][floor as usize] {
            return Ok(ip.clone());
        }

        // Standing at the ordered floor and not headed the wrong way
        if !state.moving && state.last_floor == floor {
            let next = state.next_direction();
            if next == kind.direction() || next == Direction::Stop {
                return Ok(ip.clone());
            }
        }

        if let Some(cost) = simulate_route(state, kind, floor) {
            if best.map_or(true, |(best_cost, _)| cost < best_cost) {
                best = Some((cost, ip.as_str()));
            }
        }
    }

    match best {
        Some((_, ip)) => Ok(ip.to_string()),
        None => Err(CostError::NoCandidate(floor)),
    }
}

/***************************************/
/*           Local functions           */
/***************************************/
/// Replays the candidate's route on a copy of its state with the test call
/// inserted, accumulating cost until the call would be served. The step
/// count is bounded so a corrupt peer snapshot cannot loop forever; such a
/// candidate simply records no cost.
fn simulate_route(state: &ElevatorState, kind: ButtonKind, floor: u8) -> Option<u32> {
    let mut sim = state.clone();
    sim.set_hall_call(kind, floor);

    let mut cost = if sim.moving { MOVING_HEAD_START } else { IDLE_START };
    let top = (sim.n_floors() - 1) as u8;

    for _ in 0..(2 * sim.n_floors()) {
        let direction = sim.next_direction();
        sim.direction = direction;
        match direction {
            Direction::Up if sim.last_floor < top => sim.last_floor += 1,
            Direction::Down if sim.last_floor > 0 => sim.last_floor -= 1,
            _ => {}
        }
        cost += STEP_COST;

        let arrived = sim.last_floor == floor
            && (direction == kind.direction() || direction == Direction::Stop);
        let out_of_orders = direction == Direction::Stop && !sim.have_orders();
        let at_matching_terminal =
            sim.last_floor == floor && (sim.last_floor == 0 || sim.last_floor == top);
        if arrived || out_of_orders || at_matching_terminal {
            return Some(cost);
        }

        if sim.should_stop() {
            sim.clear_calls_at_floor();
            cost += STOP_COST;
        }
    }
    None
}
