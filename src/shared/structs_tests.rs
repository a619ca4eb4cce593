/*
 * Unit tests for the shared elevator data model
 *
 * The unit tests follows the Arrange, Act, Assert pattern.
 *
 * Tests:
 * - test_should_stop_while_stopped
 * - test_should_stop_going_up
 * - test_should_stop_going_down
 * - test_should_stop_at_terminal_floors
 * - test_next_direction_continues_and_reverses
 * - test_next_direction_from_standstill
 * - test_hall_call_clamped_at_terminal_floors
 * - test_clear_calls_travelling_up
 * - test_clear_calls_at_turnaround
 */

/***************************************/
/*             Unit tests              */
/***************************************/
#[cfg(test)]
mod structs_tests {
    use crate::shared::structs::{ButtonKind, Direction, ElevatorState};
    use crate::shared::{HALL_DOWN_IDX, HALL_UP_IDX};

    fn setup_state() -> ElevatorState {
        ElevatorState::new("10.0.0.1".to_string(), 4)
    }

    #[test]
    fn test_should_stop_while_stopped() {
        // Arrange
        let mut state = setup_state();
        state.direction = Direction::Stop;

        // Act & Assert
        assert!(state.should_stop());
    }

    #[test]
    fn test_should_stop_going_up() {
        // Arrange
        let mut state = setup_state();
        state.direction = Direction::Up;
        state.last_floor = 1;
        state.internal_calls[3] = true;

        // Act
        let passing = state.should_stop();
        state.hall_calls[HALL_UP_IDX][1] = true;
        let hall_here = state.should_stop();
        state.hall_calls[HALL_UP_IDX][1] = false;
        state.internal_calls[1] = true;
        let cab_here = state.should_stop();

        // Assert
        assert!(!passing, "must keep going while orders wait above");
        assert!(hall_here, "must stop for a hall call in the travel direction");
        assert!(cab_here, "must stop for a cabin call at the current floor");
    }

    #[test]
    fn test_should_stop_going_down() {
        // Arrange
        let mut state = setup_state();
        state.direction = Direction::Down;
        state.last_floor = 2;
        state.internal_calls[0] = true;

        // Act
        let passing = state.should_stop();
        state.hall_calls[HALL_DOWN_IDX][2] = true;
        let hall_here = state.should_stop();

        // Assert
        assert!(!passing);
        assert!(hall_here);
    }

    #[test]
    fn test_should_stop_at_terminal_floors() {
        // Arrange
        let mut top = setup_state();
        top.direction = Direction::Up;
        top.last_floor = 3;

        let mut bottom = setup_state();
        bottom.direction = Direction::Down;
        bottom.last_floor = 0;

        // Act & Assert
        assert!(top.should_stop());
        assert!(bottom.should_stop());
    }

    #[test]
    fn test_next_direction_continues_and_reverses() {
        // Arrange
        let mut state = setup_state();
        state.last_floor = 1;
        state.direction = Direction::Up;
        state.internal_calls[3] = true;

        // Act
        let continuing = state.next_direction();
        state.internal_calls[3] = false;
        state.internal_calls[0] = true;
        let reversing = state.next_direction();
        state.internal_calls[0] = false;
        let idle = state.next_direction();

        // Assert
        assert_eq!(continuing, Direction::Up);
        assert_eq!(reversing, Direction::Down);
        assert_eq!(idle, Direction::Stop);
    }

    #[test]
    fn test_next_direction_from_standstill() {
        // Arrange
        let mut state = setup_state();
        state.last_floor = 1;
        state.direction = Direction::Stop;

        // Act
        state.hall_calls[HALL_UP_IDX][2] = true;
        let up = state.next_direction();
        state.hall_calls[HALL_UP_IDX][2] = false;
        state.internal_calls[0] = true;
        let down = state.next_direction();

        // Assert
        assert_eq!(up, Direction::Up);
        assert_eq!(down, Direction::Down);
    }

    #[test]
    fn test_hall_call_clamped_at_terminal_floors() {
        // Arrange
        let mut state = setup_state();

        // Act
        let up_at_top = state.set_hall_call(ButtonKind::HallUp, 3);
        let down_at_bottom = state.set_hall_call(ButtonKind::HallDown, 0);
        let up_at_bottom = state.set_hall_call(ButtonKind::HallUp, 0);

        // Assert
        assert!(!up_at_top);
        assert!(!down_at_bottom);
        assert!(up_at_bottom);
        assert!(!state.hall_calls[HALL_UP_IDX][3]);
        assert!(!state.hall_calls[HALL_DOWN_IDX][0]);
        assert!(state.hall_calls[HALL_UP_IDX][0]);
    }

    #[test]
    fn test_clear_calls_travelling_up() {
        // Arrange
        let mut state = setup_state();
        state.direction = Direction::Up;
        state.last_floor = 1;
        state.internal_calls[1] = true;
        state.hall_calls[HALL_UP_IDX][1] = true;
        state.hall_calls[HALL_DOWN_IDX][1] = true;
        state.internal_calls[3] = true; // orders remain above

        // Act
        let cleared = state.clear_calls_at_floor();

        // Assert
        assert!(cleared.cab);
        assert!(cleared.hall_up);
        assert!(!cleared.hall_down, "opposite call stays while continuing up");
        assert!(state.hall_calls[HALL_DOWN_IDX][1]);
    }

    #[test]
    fn test_clear_calls_at_turnaround() {
        // Purpose: the last order at a turnaround floor is honored
        // regardless of its direction label

        // Arrange
        let mut state = setup_state();
        state.direction = Direction::Up;
        state.last_floor = 2;
        state.internal_calls[2] = true;
        state.hall_calls[HALL_UP_IDX][2] = true;
        state.hall_calls[HALL_DOWN_IDX][2] = true;

        // Act
        let cleared = state.clear_calls_at_floor();

        // Assert
        assert!(cleared.cab);
        assert!(cleared.hall_up);
        assert!(cleared.hall_down, "no orders above, so the down call clears too");
        assert!(!state.have_orders());
    }
}
