/**
 * The per-node coordination engine.
 *
 * A single thread owns every piece of mutable cluster state: the table of
 * known elevators, the active set, the in-flight order handshakes, the
 * pending backup snapshots and the local elevator itself. Hardware events,
 * peer messages and timer ticks are multiplexed through one `select!`; each
 * event is handled to completion before the next is considered, so no other
 * locking exists anywhere in the node.
 *
 * Hall calls are assigned through the cost function and, when another node
 * wins, handed over with a three-way handshake
 * (`SendOrderToElevator` / `AckOrder` / `ConfirmAck`). The originator keeps
 * the order in its dispatched table until acked and reassigns it on
 * timeout; the assignee installs it only on the final confirm, so an order
 * is executed at most once per (originator, id) but is never lost while the
 * originator lives.
 *
 * Cabin calls cannot be re-derived from the hall network, so they are
 * replicated: every state change broadcasts a snapshot which peers hold as
 * "waiting" until the sender has seen an ack from every active peer and
 * broadcasts the commit signal. A restarting node asks the cluster for its
 * own last committed snapshot and restores its cabin calls from the first
 * reply.
 *
 * # Fields
 * - `hw_button_rx`:        Receives button presses from the hardware thread.
 * - `hw_floor_rx`:         Receives floor arrivals from the hardware thread.
 * - `hw_obstruction_rx`:   Receives obstruction switch changes.
 * - `hw_motor_tx`:         Sends motor direction commands.
 * - `hw_light_tx`:         Sends lamp commands.
 * - `net_order_send_tx`:   Sends order messages (unicast).
 * - `net_backup_send_tx`:  Sends backup messages (unicast or broadcast).
 * - `net_order_recv_rx`:   Receives decoded peer order messages.
 * - `net_backup_recv_rx`:  Receives decoded peer backup messages.
 * - `net_self_echo_rx`:    Receives one tick per own broadcast heard back.
 * - `terminate_rx`:        Receives a signal to stop the loop. Used for testing.
 */

/***************************************/
/*             Libraries               */
/***************************************/
use crossbeam_channel as cbc;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::thread::sleep;
use std::time::{Duration, Instant};

/***************************************/
/*           Local modules             */
/***************************************/
use crate::config::Config;
use crate::coordinator::cost;
use crate::network::messages::{BackupMessage, Event, OrderMessage};
use crate::shared::{
    ButtonEvent, ButtonKind, Direction, ElevatorState, FloorEvent, KnownElevator, LightCommand,
    Order, HALL_DOWN_IDX, HALL_UP_IDX,
};

/***************************************/
/*             Constants               */
/***************************************/
/// Liveness and handshake timeouts are this many ticks of their sweep.
const TIMEOUT_TICKS: u32 = 30;
/// Order-ID seed multiplier; keeps ID ranges per originator disjoint.
const ORDER_ID_SEED_STRIDE: u32 = 1000;
/// Time given to the hardware thread to drive the motor to a stop before
/// the process exits.
const MOTOR_SETTLE_TIME: Duration = Duration::from_millis(300);

/***************************************/
/*        Private data structures      */
/***************************************/
struct DispatchedOrder {
    order: Order,
    send_to: String,
    dispatched_at: Instant,
}

struct WaitingOrder {
    order: Order,
    sent_from: String,
    received_at: Instant,
}

struct WaitingBackup {
    state: ElevatorState,
    backup_time: Instant,
}

/***************************************/
/*             Public API              */
/***************************************/
pub struct Coordinator {
    // Private fields
    local_ip: String,
    n_floors: usize,
    order_counter: u32,
    known_elevators: HashMap<String, KnownElevator>,
    active_elevators: HashMap<String, bool>,
    dispatched_orders: HashMap<u32, DispatchedOrder>,
    waiting_orders: HashMap<u32, WaitingOrder>,
    waiting_backups: HashMap<String, WaitingBackup>,
    backup_acks: HashSet<String>,
    backup_commit_sent: bool,
    have_backup: HashSet<String>,
    state_changed: bool,
    obstruction: bool,
    own_last_heard: Instant,
    recovery_deadline: Option<Instant>,
    door_timer: cbc::Receiver<Instant>,

    // Timing
    peer_tick: Duration,
    heartbeat_tick: Duration,
    sweep_tick: Duration,
    peer_timeout: Duration,
    handshake_timeout: Duration,
    door_open_time: Duration,
    recovery_window: Duration,

    // Hardware channels
    hw_button_rx: cbc::Receiver<ButtonEvent>,
    hw_floor_rx: cbc::Receiver<FloorEvent>,
    hw_obstruction_rx: cbc::Receiver<bool>,
    hw_motor_tx: cbc::Sender<Direction>,
    hw_light_tx: cbc::Sender<LightCommand>,

    // Network channels
    net_order_send_tx: cbc::Sender<OrderMessage>,
    net_backup_send_tx: cbc::Sender<BackupMessage>,
    net_order_recv_rx: cbc::Receiver<OrderMessage>,
    net_backup_recv_rx: cbc::Receiver<BackupMessage>,
    net_self_echo_rx: cbc::Receiver<()>,

    terminate_rx: cbc::Receiver<()>,
}

impl Coordinator {
    pub fn new(
        config: &Config,
        local_ip: String,
        initial_floor: u8,

        hw_button_rx: cbc::Receiver<ButtonEvent>,
        hw_floor_rx: cbc::Receiver<FloorEvent>,
        hw_obstruction_rx: cbc::Receiver<bool>,
        hw_motor_tx: cbc::Sender<Direction>,
        hw_light_tx: cbc::Sender<LightCommand>,

        net_order_send_tx: cbc::Sender<OrderMessage>,
        net_backup_send_tx: cbc::Sender<BackupMessage>,
        net_order_recv_rx: cbc::Receiver<OrderMessage>,
        net_backup_recv_rx: cbc::Receiver<BackupMessage>,
        net_self_echo_rx: cbc::Receiver<()>,

        terminate_rx: cbc::Receiver<()>,
    ) -> Coordinator {
        let n_floors = config.elevator.n_floors as usize;
        let peer_tick = Duration::from_millis(config.coordinator.peer_tick);
        let sweep_tick = Duration::from_millis(config.coordinator.sweep_tick);

        let mut local = KnownElevator::new(local_ip.clone(), n_floors);
        local.state.last_floor = initial_floor;

        let mut known_elevators = HashMap::new();
        known_elevators.insert(local_ip.clone(), local);
        let mut active_elevators = HashMap::new();
        active_elevators.insert(local_ip.clone(), true);

        Coordinator {
            order_counter: order_id_seed(&local_ip),
            local_ip,
            n_floors,
            known_elevators,
            active_elevators,
            dispatched_orders: HashMap::new(),
            waiting_orders: HashMap::new(),
            waiting_backups: HashMap::new(),
            backup_acks: HashSet::new(),
            backup_commit_sent: false,
            have_backup: HashSet::new(),
            state_changed: false,
            obstruction: false,
            own_last_heard: Instant::now(),
            recovery_deadline: None,
            door_timer: cbc::never(),

            peer_tick,
            heartbeat_tick: Duration::from_millis(config.coordinator.heartbeat_tick),
            sweep_tick,
            peer_timeout: peer_tick * TIMEOUT_TICKS,
            handshake_timeout: sweep_tick * TIMEOUT_TICKS,
            door_open_time: Duration::from_millis(config.elevator.door_open_time),
            recovery_window: Duration::from_millis(config.coordinator.recovery_window),

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

            terminate_rx,
        }
    }

    pub fn run(&mut self) {
        let peer_sweep = cbc::tick(self.peer_tick);
        let heartbeat = cbc::tick(self.heartbeat_tick);
        let backup_sweep = cbc::tick(self.sweep_tick);
        let waiting_order_sweep = cbc::tick(self.sweep_tick);
        let dispatched_order_sweep = cbc::tick(self.sweep_tick);

        self.request_state();

        // Main loop
        loop {
            cbc::select! {
                recv(self.hw_button_rx) -> event => {
                    match event {
                        Ok(event) => self.handle_button(event),
                        Err(e) => {
                            error!("hw_button_rx closed: {}", e);
                            std::process::exit(1);
                        }
                    }
                }
                recv(self.hw_floor_rx) -> event => {
                    match event {
                        Ok(event) => self.handle_floor_reached(event),
                        Err(e) => {
                            error!("hw_floor_rx closed: {}", e);
                            std::process::exit(1);
                        }
                    }
                }
                recv(self.hw_obstruction_rx) -> value => {
                    match value {
                        Ok(value) => self.obstruction = value,
                        Err(e) => {
                            error!("hw_obstruction_rx closed: {}", e);
                            std::process::exit(1);
                        }
                    }
                }
                recv(self.net_order_recv_rx) -> msg => {
                    match msg {
                        Ok(msg) => self.handle_order_message(msg),
                        Err(e) => {
                            error!("net_order_recv_rx closed: {}", e);
                            std::process::exit(1);
                        }
                    }
                }
                recv(self.net_backup_recv_rx) -> msg => {
                    match msg {
                        Ok(msg) => self.handle_backup_message(msg),
                        Err(e) => {
                            error!("net_backup_recv_rx closed: {}", e);
                            std::process::exit(1);
                        }
                    }
                }
                recv(self.net_self_echo_rx) -> _ => {
                    self.own_last_heard = Instant::now();
                }
                recv(self.door_timer) -> _ => {
                    self.handle_door_timeout();
                }
                recv(peer_sweep) -> _ => {
                    self.sweep_active();
                }
                recv(heartbeat) -> _ => {
                    self.send_heartbeat();
                }
                recv(backup_sweep) -> _ => {
                    self.sweep_waiting_backups();
                }
                recv(waiting_order_sweep) -> _ => {
                    self.sweep_waiting_orders();
                }
                recv(dispatched_order_sweep) -> _ => {
                    self.sweep_dispatched_orders();
                }
                recv(self.terminate_rx) -> _ => {
                    break;
                }
            }
        }
    }

    /***************************************/
    /*        Hardware event handling      */
    /***************************************/
    fn handle_button(&mut self, event: ButtonEvent) {
        debug!("button pressed: {:?}", event);
        match event.kind {
            ButtonKind::HallUp | ButtonKind::HallDown => {
                self.handle_hall_call(event.kind, event.floor)
            }
            ButtonKind::Cab => self.handle_cabin_call(event.floor),
            ButtonKind::Stop => self.handle_stop_button(),
        }
    }

    fn handle_hall_call(&mut self, kind: ButtonKind, floor: u8) {
        if !self.is_locally_active() {
            warn!("offline, refusing hall call {:?} at floor {}", kind, floor);
            return;
        }
        self.dispatch_hall_call(kind, floor);
    }

    /// Assigns a hall call through the cost function and either serves it
    /// here or hands it to the winner with the order handshake.
    fn dispatch_hall_call(&mut self, kind: ButtonKind, floor: u8) {
        let assignee = match cost::assign_order(
            &self.known_elevators,
            &self.active_elevators,
            &self.local_ip,
            kind,
            floor,
        ) {
            Ok(ip) => ip,
            Err(e) => {
                error!("cost function failed ({}), serving locally", e);
                self.local_ip.clone()
            }
        };

        if assignee == self.local_ip {
            self.apply_hall_call_locally(kind, floor);
            return;
        }

        let order = Order { order_id: self.next_order_id(), floor, kind };
        info!(
            "dispatching order {} ({:?} at floor {}) to {}",
            order.order_id, kind, floor, assignee
        );
        let msg = OrderMessage::new(Event::SendOrderToElevator, &order, &self.local_ip, &assignee);
        self.dispatched_orders.insert(
            order.order_id,
            DispatchedOrder { order, send_to: assignee, dispatched_at: Instant::now() },
        );
        let _ = self.net_order_send_tx.send(msg);
    }

    /// Puts a hall call into the local queue. A call for the floor the
    /// cabin is already resting at just opens the door.
    fn apply_hall_call_locally(&mut self, kind: ButtonKind, floor: u8) {
        let me = self.known_elevators.get_mut(&self.local_ip).unwrap();
        if !me.state.moving && me.state.last_floor == floor {
            self.open_door();
        } else if me.state.set_hall_call(kind, floor) {
            let _ = self.hw_light_tx.send(LightCommand::CallButton { floor, kind, on: true });
            self.start_motion_if_idle();
        }
        self.state_changed = true;
    }

    fn handle_cabin_call(&mut self, floor: u8) {
        let me = self.known_elevators.get_mut(&self.local_ip).unwrap();
        if !me.state.moving && me.state.last_floor == floor {
            self.open_door();
        } else {
            me.state.internal_calls[floor as usize] = true;
            let _ = self.hw_light_tx.send(LightCommand::CallButton {
                floor,
                kind: ButtonKind::Cab,
                on: true,
            });
            self.start_motion_if_idle();
        }
        self.state_changed = true;
    }

    fn handle_stop_button(&mut self) {
        let _ = self.hw_motor_tx.send(Direction::Stop);
        let _ = self.hw_light_tx.send(LightCommand::StopLamp(true));
        warn!("stop button pressed, shutting down");
        sleep(MOTOR_SETTLE_TIME);
        std::process::exit(1);
    }

    fn handle_floor_reached(&mut self, event: FloorEvent) {
        debug!("reached floor {} going {:?}", event.floor, event.direction);
        let _ = self.hw_light_tx.send(LightCommand::FloorIndicator(event.floor));

        let me = self.known_elevators.get_mut(&self.local_ip).unwrap();
        me.state.last_floor = event.floor;
        self.state_changed = true;
        if !me.state.should_stop() {
            return;
        }

        me.state.moving = false;
        let cleared = me.state.clear_calls_at_floor();
        let _ = self.hw_motor_tx.send(Direction::Stop);
        if cleared.cab {
            let _ = self.hw_light_tx.send(LightCommand::CallButton {
                floor: event.floor,
                kind: ButtonKind::Cab,
                on: false,
            });
        }
        if cleared.hall_down {
            let _ = self.hw_light_tx.send(LightCommand::CallButton {
                floor: event.floor,
                kind: ButtonKind::HallDown,
                on: false,
            });
        }
        if cleared.hall_up {
            let _ = self.hw_light_tx.send(LightCommand::CallButton {
                floor: event.floor,
                kind: ButtonKind::HallUp,
                on: false,
            });
        }
        self.open_door();
    }

    fn handle_door_timeout(&mut self) {
        if self.obstruction {
            // Hold the door while the doorway is blocked
            self.door_timer = cbc::after(self.door_open_time);
            return;
        }
        self.door_timer = cbc::never();

        let me = self.known_elevators.get_mut(&self.local_ip).unwrap();
        me.state.door_open = false;
        let _ = self.hw_light_tx.send(LightCommand::Door(false));
        let direction = me.state.next_direction();
        me.state.direction = direction;
        let last_floor = me.state.last_floor;
        if direction == Direction::Stop {
            me.state.moving = false;
        } else {
            me.state.moving = true;
            let _ = self.hw_motor_tx.send(direction);
            let _ = self.hw_light_tx.send(LightCommand::CallButton {
                floor: last_floor,
                kind: ButtonKind::Cab,
                on: false,
            });
        }
        self.broadcast_backup();
    }

    /***************************************/
    /*        Order message handling       */
    /***************************************/
    fn handle_order_message(&mut self, msg: OrderMessage) {
        self.ensure_peer(&msg.sent_from);
        match msg.event {
            Event::SendOrderToElevator => {
                // Codec has already validated floor and kind
                let order = match msg.to_order() {
                    Some(order) => order,
                    None => return,
                };
                debug!(
                    "order {} ({:?} at floor {}) offered by {}",
                    order.order_id, order.kind, order.floor, msg.sent_from
                );
                let reply = OrderMessage::new(
                    Event::AckOrderFromElevator,
                    &order,
                    &self.local_ip,
                    &msg.sent_from,
                );
                self.waiting_orders.insert(
                    order.order_id,
                    WaitingOrder {
                        order,
                        sent_from: msg.sent_from,
                        received_at: Instant::now(),
                    },
                );
                let _ = self.net_order_send_tx.send(reply);
            }
            Event::AckOrderFromElevator => {
                if let Some(dispatched) = self.dispatched_orders.remove(&msg.order_id) {
                    let reply = OrderMessage::new(
                        Event::ConfirmAckFromElevator,
                        &dispatched.order,
                        &self.local_ip,
                        &msg.sent_from,
                    );
                    let _ = self.net_order_send_tx.send(reply);
                }
            }
            Event::ConfirmAckFromElevator => {
                // A confirm racing a reassignment finds no waiting entry
                // and installs nothing
                if let Some(waiting) = self.waiting_orders.remove(&msg.order_id) {
                    info!(
                        "installing order {} ({:?} at floor {}) from {}",
                        waiting.order.order_id,
                        waiting.order.kind,
                        waiting.order.floor,
                        waiting.sent_from
                    );
                    self.apply_hall_call_locally(waiting.order.kind, waiting.order.floor);
                }
            }
            _ => debug!("unexpected order event {:?}", msg.event),
        }
    }

    /***************************************/
    /*       Backup message handling       */
    /***************************************/
    fn handle_backup_message(&mut self, msg: BackupMessage) {
        let sender = msg.sent_from.clone();
        match msg.event {
            Event::SendBackupToAll | Event::StillOnline => self.refresh_peer(&sender),
            _ => self.ensure_peer(&sender),
        }
        match msg.event {
            Event::SendBackupToAll => {
                let state = match msg.backup.and_then(|d| d.current_state.into_state()) {
                    Some(state) => state,
                    None => return,
                };
                self.waiting_backups.insert(
                    sender.clone(),
                    WaitingBackup { state, backup_time: Instant::now() },
                );
                let reply = BackupMessage::unicast(Event::AckBackup, &self.local_ip, &sender);
                let _ = self.net_backup_send_tx.send(reply);
            }
            Event::StillOnline => {}
            Event::AckBackup => {
                self.backup_acks.insert(sender);
                self.try_commit_backup();
            }
            Event::BackupAllConfirmed => {
                if let Some(waiting) = self.waiting_backups.remove(&sender) {
                    debug!("committing backup from {}", sender);
                    let entry = self
                        .known_elevators
                        .entry(sender.clone())
                        .or_insert_with(|| KnownElevator::new(sender.clone(), self.n_floors));
                    entry.state = waiting.state;
                    self.have_backup.insert(sender);
                }
            }
            Event::RequestStateFromElevator => {
                if self.have_backup.contains(&sender) {
                    if let Some(peer) = self.known_elevators.get(&sender) {
                        info!("answering state request from {}", sender);
                        let reply = BackupMessage::with_state(
                            Event::AnswerStateRequest,
                            &self.local_ip,
                            &sender,
                            &peer.state,
                        );
                        let _ = self.net_backup_send_tx.send(reply);
                    }
                }
            }
            Event::AnswerStateRequest => self.handle_recovery_reply(msg),
            _ => debug!("unexpected backup event {:?}", msg.event),
        }
    }

    /// Sends the commit signal once every currently-active peer has acked
    /// the outstanding backup. Membership is recomputed live, so a peer
    /// joining mid-commit simply becomes part of the requirement.
    fn try_commit_backup(&mut self) {
        if self.backup_commit_sent {
            return;
        }
        let all_acked = self
            .active_elevators
            .iter()
            .filter(|(ip, active)| **active && ip.as_str() != self.local_ip)
            .all(|(ip, _)| self.backup_acks.contains(ip));
        if all_acked {
            let msg = BackupMessage::broadcast(Event::BackupAllConfirmed, &self.local_ip);
            let _ = self.net_backup_send_tx.send(msg);
            self.backup_commit_sent = true;
        }
    }

    /// Restores cabin calls from the first valid recovery reply inside the
    /// startup window. Restored calls are merged in rather than assigned,
    /// so a call pressed during the window survives the reply.
    fn handle_recovery_reply(&mut self, msg: BackupMessage) {
        let within_window = self
            .recovery_deadline
            .map_or(false, |deadline| Instant::now() <= deadline);
        if !within_window {
            debug!("ignoring recovery reply from {} outside the window", msg.sent_from);
            return;
        }
        if !msg.send_to.is_empty() && msg.send_to != self.local_ip {
            return;
        }
        let snapshot = match msg.backup.and_then(|d| d.current_state.into_state()) {
            Some(state) => state,
            None => return,
        };

        info!("restoring cabin calls from {}: {:?}", msg.sent_from, snapshot.internal_calls);
        self.recovery_deadline = None;
        let me = self.known_elevators.get_mut(&self.local_ip).unwrap();
        for (floor, restored) in snapshot.internal_calls.iter().enumerate() {
            if *restored && !me.state.internal_calls[floor] {
                me.state.internal_calls[floor] = true;
                let _ = self.hw_light_tx.send(LightCommand::CallButton {
                    floor: floor as u8,
                    kind: ButtonKind::Cab,
                    on: true,
                });
            }
        }
        self.state_changed = true;
        self.start_motion_if_idle();
    }

    /***************************************/
    /*                Timers               */
    /***************************************/
    fn send_heartbeat(&mut self) {
        if self.state_changed {
            self.broadcast_backup();
        } else {
            let msg = BackupMessage::broadcast(Event::StillOnline, &self.local_ip);
            let _ = self.net_backup_send_tx.send(msg);
        }
    }

    fn broadcast_backup(&mut self) {
        let me = self.known_elevators.get(&self.local_ip).unwrap();
        let msg =
            BackupMessage::with_state(Event::SendBackupToAll, &self.local_ip, "", &me.state);
        let _ = self.net_backup_send_tx.send(msg);
        self.backup_acks.clear();
        self.backup_commit_sent = false;
        self.state_changed = false;
    }

    /// Recomputes the active set from `last_heard`. The local entry is
    /// special: it tracks whether our own broadcasts still echo back, and
    /// gates the acceptance of new hall calls. Peers that drop out get
    /// their recorded hall calls reassigned.
    fn sweep_active(&mut self) {
        let now = Instant::now();

        let locally_active = now.duration_since(self.own_last_heard) <= self.peer_timeout;
        let was_active = self
            .active_elevators
            .insert(self.local_ip.clone(), locally_active)
            .unwrap_or(false);
        if was_active && !locally_active {
            warn!("own heartbeats no longer confirmed, refusing new hall calls");
        } else if !was_active && locally_active {
            info!("heartbeats confirmed again, accepting hall calls");
        }

        let mut went_offline: Vec<String> = Vec::new();
        let peers: Vec<(String, Instant)> = self
            .known_elevators
            .iter()
            .filter(|(ip, _)| ip.as_str() != self.local_ip)
            .map(|(ip, peer)| (ip.clone(), peer.last_heard))
            .collect();
        for (ip, last_heard) in peers {
            let active = now.duration_since(last_heard) <= self.peer_timeout;
            let was_active = self.active_elevators.insert(ip.clone(), active).unwrap_or(false);
            if was_active && !active {
                warn!("elevator {} went offline", ip);
                went_offline.push(ip);
            } else if !was_active && active {
                info!("elevator {} is online", ip);
            }
        }

        for ip in went_offline {
            self.reassign_peer_orders(&ip);
        }
    }

    /// Takes over the hall calls a dead peer was responsible for.
    fn reassign_peer_orders(&mut self, ip: &str) {
        let mut orphaned: Vec<(ButtonKind, u8)> = Vec::new();
        if let Some(peer) = self.known_elevators.get_mut(ip) {
            for (index, kind) in
                [(HALL_DOWN_IDX, ButtonKind::HallDown), (HALL_UP_IDX, ButtonKind::HallUp)]
            {
                for floor in 0..peer.state.n_floors() {
                    if peer.state.hall_calls[index][floor] {
                        peer.state.hall_calls[index][floor] = false;
                        orphaned.push((kind, floor as u8));
                    }
                }
            }
        }
        for (kind, floor) in orphaned {
            info!("reassigning {:?} at floor {} after losing {}", kind, floor, ip);
            self.dispatch_hall_call(kind, floor);
        }
    }

    fn sweep_waiting_backups(&mut self) {
        let timeout = self.handshake_timeout;
        self.waiting_backups.retain(|_, waiting| waiting.backup_time.elapsed() <= timeout);
    }

    /// Waiting orders whose confirm never arrived are dropped silently;
    /// the originator's own timeout reassigns them.
    fn sweep_waiting_orders(&mut self) {
        let timeout = self.handshake_timeout;
        self.waiting_orders.retain(|id, waiting| {
            let keep = waiting.received_at.elapsed() <= timeout;
            if !keep {
                debug!("dropping unconfirmed order {} from {}", id, waiting.sent_from);
            }
            keep
        });
    }

    fn sweep_dispatched_orders(&mut self) {
        let timeout = self.handshake_timeout;
        let expired: Vec<u32> = self
            .dispatched_orders
            .iter()
            .filter(|(_, dispatched)| dispatched.dispatched_at.elapsed() > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(dispatched) = self.dispatched_orders.remove(&id) {
                warn!(
                    "order {} to {} was never acknowledged, reassigning",
                    id, dispatched.send_to
                );
                self.dispatch_hall_call(dispatched.order.kind, dispatched.order.floor);
            }
        }
    }

    /***************************************/
    /*               Helpers               */
    /***************************************/
    /// Asks the cluster for the cabin calls this node held before its last
    /// crash and opens the acceptance window for replies.
    fn request_state(&mut self) {
        info!("requesting previous state from the cluster");
        let msg = BackupMessage::broadcast(Event::RequestStateFromElevator, &self.local_ip);
        let _ = self.net_backup_send_tx.send(msg);
        self.recovery_deadline = Some(Instant::now() + self.recovery_window);
    }

    fn is_locally_active(&self) -> bool {
        self.active_elevators.get(&self.local_ip).copied().unwrap_or(false)
    }

    fn next_order_id(&mut self) -> u32 {
        self.order_counter += 1;
        self.order_counter
    }

    /// Creates the table entry for a peer on its first message of any
    /// kind. Does not count as liveness evidence; only `refresh_peer`
    /// moves `last_heard`.
    fn ensure_peer(&mut self, ip: &str) {
        if ip.is_empty() || ip == self.local_ip {
            return;
        }
        if !self.known_elevators.contains_key(ip) {
            info!("new elevator on the network: {}", ip);
            self.known_elevators
                .insert(ip.to_string(), KnownElevator::new(ip.to_string(), self.n_floors));
        }
    }

    /// Refreshes `last_heard` for a peer. Only the heartbeat events
    /// (`SendBackupToAll`, `StillOnline`) call this: handshake and
    /// recovery traffic proves nothing about a peer's heartbeat path, and
    /// must not keep a stalled peer in the active set.
    fn refresh_peer(&mut self, ip: &str) {
        if ip.is_empty() || ip == self.local_ip {
            return;
        }
        self.ensure_peer(ip);
        if let Some(peer) = self.known_elevators.get_mut(ip) {
            peer.last_heard = Instant::now();
        }
    }

    fn open_door(&mut self) {
        let me = self.known_elevators.get_mut(&self.local_ip).unwrap();
        me.state.door_open = true;
        let _ = self.hw_light_tx.send(LightCommand::Door(true));
        self.door_timer = cbc::after(self.door_open_time);
        self.state_changed = true;
    }

    fn start_motion_if_idle(&mut self) {
        let me = self.known_elevators.get_mut(&self.local_ip).unwrap();
        if me.state.moving || me.state.door_open {
            return;
        }
        let direction = me.state.next_direction();
        if direction != Direction::Stop {
            me.state.direction = direction;
            me.state.moving = true;
            let _ = self.hw_motor_tx.send(direction);
        }
    }
}

/***************************************/
/*           Local functions           */
/***************************************/
/// Seeds the order counter from the last octet of the local IP so each
/// originator allocates from its own range.
fn order_id_seed(local_ip: &str) -> u32 {
    local_ip
        .rsplit('.')
        .next()
        .and_then(|octet| octet.parse::<u32>().ok())
        .unwrap_or(0)
        * ORDER_ID_SEED_STRIDE
}

/***************************************/
/*              Test API               */
/***************************************/
