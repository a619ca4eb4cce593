/*
 * Unit tests for the coordinator module
 *
 * The unit tests follows the Arrange, Act, Assert pattern. Handlers are
 * driven directly through the test shims; one test runs the full loop on a
 * thread the way the node does in production.
 *
 * Tests:
 * - test_coordinator_init
 * - test_hall_call_served_locally
 * - test_hall_call_refused_while_offline
 * - test_hall_call_dispatched_to_peer
 * - test_assignee_side_of_handshake
 * - test_originator_side_of_handshake
 * - test_confirm_installs_at_most_once
 * - test_dispatched_order_timeout_reassigns
 * - test_waiting_order_timeout_drops
 * - test_backup_two_phase_commit
 * - test_state_request_answered_from_backup
 * - test_recovery_restores_cabin_calls
 * - test_floor_reached_turnaround_clears_everything
 * - test_door_timeout_resumes_motion
 * - test_heartbeat_kind_follows_state_changes
 * - test_lost_peer_orders_are_reassigned
 * - test_run_loop_serves_cabin_call
 */

/***************************************/
/*             Unit tests              */
/***************************************/
#[cfg(test)]
mod coordinator_tests {
    use crate::config::{
        Config, CoordinatorConfig, ElevatorConfig, HardwareConfig, NetworkConfig,
    };
    use crate::coordinator::Coordinator;
    use crate::network::messages::{BackupMessage, Event, OrderMessage};
    use crate::shared::{
        ButtonEvent, ButtonKind, Direction, ElevatorState, FloorEvent, LightCommand, Order,
        HALL_DOWN_IDX, HALL_UP_IDX,
    };
    use crossbeam_channel as cbc;
    use crossbeam_channel::unbounded;
    use std::thread::{sleep, spawn};
    use std::time::Duration;

    const LOCAL_IP: &str = "10.0.0.1";
    const PEER_IP: &str = "10.0.0.2";
    const N_FLOORS: usize = 4;

    fn test_config() -> Config {
        Config {
            network: NetworkConfig {
                msg_port: 22301,
                bcast_port: 22302,
                id_gen_attempts: 1,
                id_gen_retry_ms: 10,
            },
            elevator: ElevatorConfig { n_floors: N_FLOORS as u8, door_open_time: 50 },
            hardware: HardwareConfig {
                driver_address: "localhost".to_string(),
                driver_port: 15657,
                poll_period: 50,
            },
            // 1 ms sweeps give 30 ms handshake timeouts, short enough to
            // exercise in a test
            coordinator: CoordinatorConfig {
                peer_tick: 1,
                heartbeat_tick: 100,
                sweep_tick: 1,
                recovery_window: 3000,
            },
        }
    }

    fn setup_coordinator() -> (
        Coordinator,
        cbc::Sender<ButtonEvent>,       // hw_button_tx
        cbc::Sender<FloorEvent>,        // hw_floor_tx
        cbc::Sender<bool>,              // hw_obstruction_tx
        cbc::Receiver<Direction>,       // hw_motor_rx
        cbc::Receiver<LightCommand>,    // hw_light_rx
        cbc::Receiver<OrderMessage>,    // net_order_send_rx
        cbc::Receiver<BackupMessage>,   // net_backup_send_rx
        cbc::Sender<OrderMessage>,      // net_order_recv_tx
        cbc::Sender<BackupMessage>,     // net_backup_recv_tx
        cbc::Sender<()>,                // net_self_echo_tx
        cbc::Sender<()>,                // coordinator_terminate_tx
    ) {
        // Arrange mock channels
        let (hw_button_tx, hw_button_rx) = unbounded::<ButtonEvent>();
        let (hw_floor_tx, hw_floor_rx) = unbounded::<FloorEvent>();
        let (hw_obstruction_tx, hw_obstruction_rx) = unbounded::<bool>();
        let (hw_motor_tx, hw_motor_rx) = unbounded::<Direction>();
        let (hw_light_tx, hw_light_rx) = unbounded::<LightCommand>();
        let (net_order_send_tx, net_order_send_rx) = unbounded::<OrderMessage>();
        let (net_backup_send_tx, net_backup_send_rx) = unbounded::<BackupMessage>();
        let (net_order_recv_tx, net_order_recv_rx) = unbounded::<OrderMessage>();
        let (net_backup_recv_tx, net_backup_recv_rx) = unbounded::<BackupMessage>();
        let (net_self_echo_tx, net_self_echo_rx) = unbounded::<()>();
        let (coordinator_terminate_tx, coordinator_terminate_rx) = unbounded::<()>();

        (
            Coordinator::new(
                &test_config(),
                LOCAL_IP.to_string(),
                0,
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
            ),
            hw_button_tx,
            hw_floor_tx,
            hw_obstruction_tx,
            hw_motor_rx,
            hw_light_rx,
            net_order_send_rx,
            net_backup_send_rx,
            net_order_recv_tx,
            net_backup_recv_tx,
            net_self_echo_tx,
            coordinator_terminate_tx,
        )
    }

    fn peer_moving_down_from_top() -> ElevatorState {
        let mut state = ElevatorState::new(PEER_IP.to_string(), N_FLOORS);
        state.last_floor = 3;
        state.direction = Direction::Down;
        state.moving = true;
        state.internal_calls[0] = true;
        state
    }

    #[test]
    fn test_coordinator_init() {
        // Arrange
        let (coordinator, ..) = setup_coordinator();

        // Assert
        let state = coordinator.test_local_state();
        assert_eq!(state.ip, LOCAL_IP);
        assert_eq!(state.last_floor, 0);
        assert_eq!(state.direction, Direction::Stop);
        assert!(!state.moving);
        assert!(coordinator.test_dispatched_order_ids().is_empty());
        assert!(coordinator.test_waiting_order_ids().is_empty());
    }

    #[test]
    fn test_hall_call_served_locally() {
        // Arrange
        let (mut coordinator, _b, _f, _o, hw_motor_rx, hw_light_rx, ..) = setup_coordinator();

        // Act
        coordinator.test_handle_button(ButtonEvent { kind: ButtonKind::HallUp, floor: 2 });

        // Assert
        let state = coordinator.test_local_state();
        assert!(state.hall_calls[HALL_UP_IDX][2]);
        assert!(state.moving);
        assert_eq!(state.direction, Direction::Up);
        assert_eq!(
            hw_light_rx.recv(),
            Ok(LightCommand::CallButton { floor: 2, kind: ButtonKind::HallUp, on: true })
        );
        assert_eq!(hw_motor_rx.recv(), Ok(Direction::Up));
    }

    #[test]
    fn test_hall_call_refused_while_offline() {
        // Arrange
        let (mut coordinator, _b, _f, _o, hw_motor_rx, hw_light_rx, net_order_send_rx, ..) =
            setup_coordinator();
        coordinator.test_set_active(LOCAL_IP, false);

        // Act
        coordinator.test_handle_button(ButtonEvent { kind: ButtonKind::HallUp, floor: 2 });

        // Assert: no lamp, no motion, no message
        assert!(hw_light_rx.try_recv().is_err());
        assert!(hw_motor_rx.try_recv().is_err());
        assert!(net_order_send_rx.try_recv().is_err());
        assert!(!coordinator.test_local_state().hall_calls[HALL_UP_IDX][2]);
    }

    #[test]
    fn test_hall_call_dispatched_to_peer() {
        // Arrange: the peer is already headed toward the call
        let (mut coordinator, _b, _f, _o, hw_motor_rx, _l, net_order_send_rx, ..) =
            setup_coordinator();
        coordinator.test_set_peer(PEER_IP, peer_moving_down_from_top(), true);

        // Act
        coordinator.test_handle_button(ButtonEvent { kind: ButtonKind::HallDown, floor: 2 });

        // Assert
        let msg = net_order_send_rx.recv().unwrap();
        assert_eq!(msg.event, Event::SendOrderToElevator);
        assert_eq!(msg.send_to, PEER_IP);
        assert_eq!(msg.sent_from, LOCAL_IP);
        assert_eq!(msg.order.floor, 2);
        assert_eq!(coordinator.test_dispatched_order_ids().len(), 1);
        assert!(hw_motor_rx.try_recv().is_err(), "the call is not ours to serve");
    }

    #[test]
    fn test_assignee_side_of_handshake() {
        // Arrange
        let (mut coordinator, _b, _f, _o, hw_motor_rx, _l, net_order_send_rx, ..) =
            setup_coordinator();
        let order = Order { order_id: 2042, floor: 2, kind: ButtonKind::HallUp };

        // Act: the offer is acknowledged but not yet installed
        coordinator.test_handle_order_message(OrderMessage::new(
            Event::SendOrderToElevator,
            &order,
            PEER_IP,
            LOCAL_IP,
        ));

        // Assert
        let ack = net_order_send_rx.recv().unwrap();
        assert_eq!(ack.event, Event::AckOrderFromElevator);
        assert_eq!(ack.send_to, PEER_IP);
        assert_eq!(ack.order_id, 2042);
        assert_eq!(coordinator.test_waiting_order_ids(), vec![2042]);
        assert!(!coordinator.test_local_state().hall_calls[HALL_UP_IDX][2]);

        // Act: the confirm installs the order and starts the cabin
        coordinator.test_handle_order_message(OrderMessage::new(
            Event::ConfirmAckFromElevator,
            &order,
            PEER_IP,
            LOCAL_IP,
        ));

        // Assert
        assert!(coordinator.test_waiting_order_ids().is_empty());
        assert!(coordinator.test_local_state().hall_calls[HALL_UP_IDX][2]);
        assert_eq!(hw_motor_rx.recv(), Ok(Direction::Up));
    }

    #[test]
    fn test_originator_side_of_handshake() {
        // Arrange
        let (mut coordinator, _b, _f, _o, _m, _l, net_order_send_rx, ..) = setup_coordinator();
        coordinator.test_set_peer(PEER_IP, peer_moving_down_from_top(), true);
        coordinator.test_handle_button(ButtonEvent { kind: ButtonKind::HallDown, floor: 2 });
        let offer = net_order_send_rx.recv().unwrap();

        // Act
        let order = Order { order_id: offer.order_id, floor: 2, kind: ButtonKind::HallDown };
        coordinator.test_handle_order_message(OrderMessage::new(
            Event::AckOrderFromElevator,
            &order,
            PEER_IP,
            LOCAL_IP,
        ));

        // Assert
        let confirm = net_order_send_rx.recv().unwrap();
        assert_eq!(confirm.event, Event::ConfirmAckFromElevator);
        assert_eq!(confirm.order_id, offer.order_id);
        assert!(coordinator.test_dispatched_order_ids().is_empty());
    }

    #[test]
    fn test_confirm_installs_at_most_once() {
        // Arrange
        let (mut coordinator, _b, _f, _o, hw_motor_rx, _l, net_order_send_rx, ..) =
            setup_coordinator();
        let order = Order { order_id: 2042, floor: 2, kind: ButtonKind::HallUp };
        coordinator.test_handle_order_message(OrderMessage::new(
            Event::SendOrderToElevator,
            &order,
            PEER_IP,
            LOCAL_IP,
        ));
        let _ack = net_order_send_rx.recv().unwrap();
        coordinator.test_handle_order_message(OrderMessage::new(
            Event::ConfirmAckFromElevator,
            &order,
            PEER_IP,
            LOCAL_IP,
        ));
        let _ = hw_motor_rx.recv();

        // Act: a duplicated confirm finds no waiting record
        coordinator.test_handle_order_message(OrderMessage::new(
            Event::ConfirmAckFromElevator,
            &order,
            PEER_IP,
            LOCAL_IP,
        ));

        // Assert
        assert!(hw_motor_rx.try_recv().is_err());
        assert!(coordinator.test_waiting_order_ids().is_empty());
    }

    #[test]
    fn test_dispatched_order_timeout_reassigns() {
        // Arrange
        let (mut coordinator, _b, _f, _o, _m, _l, net_order_send_rx, ..) = setup_coordinator();
        coordinator.test_set_peer(PEER_IP, peer_moving_down_from_top(), true);
        coordinator.test_handle_button(ButtonEvent { kind: ButtonKind::HallDown, floor: 2 });
        let first = net_order_send_rx.recv().unwrap();

        // Act: no ack arrives within the timeout
        sleep(Duration::from_millis(50));
        coordinator.test_sweep_dispatched_orders();

        // Assert: a fresh order id goes out for the same call
        let second = net_order_send_rx.recv().unwrap();
        assert_eq!(second.event, Event::SendOrderToElevator);
        assert_eq!(second.order.floor, 2);
        assert!(second.order_id > first.order_id);
        assert_eq!(coordinator.test_dispatched_order_ids(), vec![second.order_id]);
    }

    #[test]
    fn test_waiting_order_timeout_drops() {
        // Arrange
        let (mut coordinator, _b, _f, _o, _m, _l, net_order_send_rx, ..) = setup_coordinator();
        let order = Order { order_id: 2042, floor: 2, kind: ButtonKind::HallUp };
        coordinator.test_handle_order_message(OrderMessage::new(
            Event::SendOrderToElevator,
            &order,
            PEER_IP,
            LOCAL_IP,
        ));
        let _ack = net_order_send_rx.recv().unwrap();

        // Act: the confirm never arrives
        sleep(Duration::from_millis(50));
        coordinator.test_sweep_waiting_orders();

        // Assert
        assert!(coordinator.test_waiting_order_ids().is_empty());
        assert!(!coordinator.test_local_state().hall_calls[HALL_UP_IDX][2]);
    }

    #[test]
    fn test_backup_two_phase_commit() {
        // Arrange
        let (mut coordinator, _b, _f, _o, _m, _l, _os, net_backup_send_rx, ..) =
            setup_coordinator();
        let mut peer_state = ElevatorState::new(PEER_IP.to_string(), N_FLOORS);
        peer_state.internal_calls[1] = true;
        peer_state.internal_calls[3] = true;

        // Act: the snapshot is held as waiting and acked
        coordinator.test_handle_backup_message(BackupMessage::with_state(
            Event::SendBackupToAll,
            PEER_IP,
            "",
            &peer_state,
        ));

        // Assert
        let ack = net_backup_send_rx.recv().unwrap();
        assert_eq!(ack.event, Event::AckBackup);
        assert_eq!(ack.send_to, PEER_IP);
        assert!(!coordinator.test_has_backup_for(PEER_IP));
        assert_ne!(coordinator.test_peer_state(PEER_IP).unwrap(), &peer_state);

        // Act: the commit signal moves it into the elevator table
        coordinator
            .test_handle_backup_message(BackupMessage::broadcast(Event::BackupAllConfirmed, PEER_IP));

        // Assert
        assert!(coordinator.test_has_backup_for(PEER_IP));
        assert_eq!(coordinator.test_peer_state(PEER_IP).unwrap(), &peer_state);
    }

    #[test]
    fn test_state_request_answered_from_backup() {
        // Arrange: a committed backup for the peer
        let (mut coordinator, _b, _f, _o, _m, _l, _os, net_backup_send_rx, ..) =
            setup_coordinator();
        let mut peer_state = ElevatorState::new(PEER_IP.to_string(), N_FLOORS);
        peer_state.internal_calls[1] = true;
        peer_state.internal_calls[3] = true;
        coordinator.test_handle_backup_message(BackupMessage::with_state(
            Event::SendBackupToAll,
            PEER_IP,
            "",
            &peer_state,
        ));
        let _ack = net_backup_send_rx.recv().unwrap();
        coordinator
            .test_handle_backup_message(BackupMessage::broadcast(Event::BackupAllConfirmed, PEER_IP));

        // Act: the peer restarts and asks for its state back
        coordinator.test_handle_backup_message(BackupMessage::broadcast(
            Event::RequestStateFromElevator,
            PEER_IP,
        ));

        // Assert
        let answer = net_backup_send_rx.recv().unwrap();
        assert_eq!(answer.event, Event::AnswerStateRequest);
        assert_eq!(answer.send_to, PEER_IP);
        let restored = answer.backup.unwrap().current_state.into_state().unwrap();
        assert_eq!(restored.internal_calls, vec![false, true, false, true]);
    }

    #[test]
    fn test_recovery_restores_cabin_calls() {
        // Arrange
        let (mut coordinator, _b, _f, _o, _m, hw_light_rx, _os, net_backup_send_rx, ..) =
            setup_coordinator();
        coordinator.test_request_state();
        let request = net_backup_send_rx.recv().unwrap();
        assert_eq!(request.event, Event::RequestStateFromElevator);

        let mut snapshot = ElevatorState::new(LOCAL_IP.to_string(), N_FLOORS);
        snapshot.internal_calls[1] = true;
        snapshot.internal_calls[3] = true;

        // Act
        coordinator.test_handle_backup_message(BackupMessage::with_state(
            Event::AnswerStateRequest,
            PEER_IP,
            LOCAL_IP,
            &snapshot,
        ));

        // Assert
        let state = coordinator.test_local_state();
        assert_eq!(state.internal_calls, vec![false, true, false, true]);
        assert_eq!(
            hw_light_rx.recv(),
            Ok(LightCommand::CallButton { floor: 1, kind: ButtonKind::Cab, on: true })
        );
        assert_eq!(
            hw_light_rx.recv(),
            Ok(LightCommand::CallButton { floor: 3, kind: ButtonKind::Cab, on: true })
        );

        // Act: a second reply lands after the window closed
        let mut late = ElevatorState::new(LOCAL_IP.to_string(), N_FLOORS);
        late.internal_calls[0] = true;
        coordinator.test_handle_backup_message(BackupMessage::with_state(
            Event::AnswerStateRequest,
            PEER_IP,
            LOCAL_IP,
            &late,
        ));

        // Assert
        assert!(!coordinator.test_local_state().internal_calls[0]);
    }

    #[test]
    fn test_floor_reached_turnaround_clears_everything() {
        // Arrange: moving up through floor 2 with every call type set there
        // and nothing above
        let (mut coordinator, _b, _f, _o, hw_motor_rx, hw_light_rx, ..) = setup_coordinator();
        let mut state = ElevatorState::new(LOCAL_IP.to_string(), N_FLOORS);
        state.last_floor = 1;
        state.direction = Direction::Up;
        state.moving = true;
        state.internal_calls[2] = true;
        state.hall_calls[HALL_UP_IDX][2] = true;
        state.hall_calls[HALL_DOWN_IDX][2] = true;
        coordinator.test_set_local_state(state);

        // Act
        coordinator.test_handle_floor(FloorEvent { floor: 2, direction: Direction::Up });

        // Assert
        assert_eq!(hw_light_rx.recv(), Ok(LightCommand::FloorIndicator(2)));
        assert_eq!(hw_motor_rx.recv(), Ok(Direction::Stop));
        let state = coordinator.test_local_state();
        assert!(!state.moving);
        assert!(state.door_open);
        assert!(!state.internal_calls[2]);
        assert!(!state.hall_calls[HALL_UP_IDX][2]);
        assert!(!state.hall_calls[HALL_DOWN_IDX][2]);
    }

    #[test]
    fn test_door_timeout_resumes_motion() {
        // Arrange: door open at floor 0 with a cabin call above
        let (mut coordinator, _b, _f, _o, hw_motor_rx, _l, _os, net_backup_send_rx, ..) =
            setup_coordinator();
        let mut state = ElevatorState::new(LOCAL_IP.to_string(), N_FLOORS);
        state.door_open = true;
        state.internal_calls[3] = true;
        coordinator.test_set_local_state(state);

        // Act
        coordinator.test_handle_door_timeout();

        // Assert
        let state = coordinator.test_local_state();
        assert!(!state.door_open);
        assert!(state.moving);
        assert_eq!(state.direction, Direction::Up);
        assert_eq!(hw_motor_rx.recv(), Ok(Direction::Up));
        let backup = net_backup_send_rx.recv().unwrap();
        assert_eq!(backup.event, Event::SendBackupToAll);
    }

    #[test]
    fn test_heartbeat_kind_follows_state_changes() {
        // Arrange
        let (mut coordinator, _b, _f, _o, _m, _l, _os, net_backup_send_rx, ..) =
            setup_coordinator();

        // Act: nothing has changed since the last backup
        coordinator.test_send_heartbeat();

        // Assert
        assert_eq!(net_backup_send_rx.recv().unwrap().event, Event::StillOnline);

        // Act: a cabin call changes the state
        coordinator.test_handle_button(ButtonEvent { kind: ButtonKind::Cab, floor: 2 });
        coordinator.test_send_heartbeat();

        // Assert
        let backup = net_backup_send_rx.recv().unwrap();
        assert_eq!(backup.event, Event::SendBackupToAll);
        let snapshot = backup.backup.unwrap().current_state;
        assert!(snapshot.internal_orders[2]);

        // Act: and the next heartbeat is a plain keep-alive again
        coordinator.test_send_heartbeat();

        // Assert
        assert_eq!(net_backup_send_rx.recv().unwrap().event, Event::StillOnline);
    }

    #[test]
    fn test_lost_peer_orders_are_reassigned() {
        // Arrange: the peer owns a hall call, then stops heartbeating
        let (mut coordinator, ..) = setup_coordinator();
        let mut peer_state = ElevatorState::new(PEER_IP.to_string(), N_FLOORS);
        peer_state.hall_calls[HALL_UP_IDX][1] = true;
        coordinator.test_set_peer(PEER_IP, peer_state, true);

        // Act: longer than the 30 ms peer timeout of the test config
        sleep(Duration::from_millis(50));
        coordinator.test_sweep_active();

        // Assert: the only live node takes the call over
        assert!(coordinator.test_local_state().hall_calls[HALL_UP_IDX][1]);
        assert!(!coordinator.test_peer_state(PEER_IP).unwrap().hall_calls[HALL_UP_IDX][1]);
    }

    #[test]
    fn test_run_loop_serves_cabin_call() {
        // Arrange
        let (
            mut coordinator,
            hw_button_tx,
            _hw_floor_tx,
            _hw_obstruction_tx,
            hw_motor_rx,
            hw_light_rx,
            _net_order_send_rx,
            net_backup_send_rx,
            _net_order_recv_tx,
            _net_backup_recv_tx,
            _net_self_echo_tx,
            coordinator_terminate_tx,
        ) = setup_coordinator();
        let coordinator_thread = spawn(move || coordinator.run());

        // Assert: startup asks the cluster for our pre-crash state
        let request = net_backup_send_rx.recv_timeout(Duration::from_secs(3)).unwrap();
        assert_eq!(request.event, Event::RequestStateFromElevator);

        // Act
        hw_button_tx.send(ButtonEvent { kind: ButtonKind::Cab, floor: 2 }).unwrap();

        // Assert
        assert_eq!(
            hw_light_rx.recv_timeout(Duration::from_secs(3)),
            Ok(LightCommand::CallButton { floor: 2, kind: ButtonKind::Cab, on: true })
        );
        assert_eq!(hw_motor_rx.recv_timeout(Duration::from_secs(3)), Ok(Direction::Up));

        // Cleanup
        coordinator_terminate_tx.send(()).unwrap();
        coordinator_thread.join().unwrap();
    }
}
