/**
 * UDP transport for the elevator cluster.
 *
 * Two sockets are held for the process lifetime: one bound to the unicast
 * message port (also used for all sending, so peers see a stable source
 * port) and one bound to the broadcast port. Three named threads run the
 * transport: one transmitter draining the coordinator's outgoing channels
 * and two receivers, one per socket, pushing decoded messages into the
 * coordinator's bounded input queues.
 *
 * Sending is fire-and-forget. Socket errors are logged and skipped;
 * reliability is the job of the application-level handshakes, not of the
 * transport.
 *
 * # Constructor arguments
 * - `config`:              Ports and local-IP discovery settings.
 * - `n_floors`:            Floor count, used by the codec validity checks.
 * - `net_order_send_rx`:   Outgoing order messages (always unicast).
 * - `net_backup_send_rx`:  Outgoing backup messages (unicast or broadcast).
 * - `net_order_recv_tx`:   Decoded inbound order messages.
 * - `net_backup_recv_tx`:  Decoded inbound backup messages.
 * - `net_self_echo_tx`:    Node-health ticks; one per own broadcast heard
 *                          back on the wire.
 */

/***************************************/
/*             Libraries               */
/***************************************/
use crossbeam_channel as cbc;
use log::{debug, error, info, warn};
use std::net::UdpSocket;
use std::thread::{sleep, Builder};
use std::time::Duration;

/***************************************/
/*           Local modules             */
/***************************************/
use crate::config::NetworkConfig;
use crate::network::messages::{self, BackupMessage, Decoded, OrderMessage};

/***************************************/
/*             Constants               */
/***************************************/
const BROADCAST_ADDR: &str = "255.255.255.255";
const MAX_DATAGRAM: usize = 4096;

/***************************************/
/*             Public API              */
/***************************************/
pub struct Network {
    pub local_ip: String,
}

impl Network {
    pub fn new(
        config: &NetworkConfig,
        n_floors: usize,
        net_order_send_rx: cbc::Receiver<OrderMessage>,
        net_backup_send_rx: cbc::Receiver<BackupMessage>,
        net_order_recv_tx: cbc::Sender<OrderMessage>,
        net_backup_recv_tx: cbc::Sender<BackupMessage>,
        net_self_echo_tx: cbc::Sender<()>,
    ) -> std::io::Result<Network> {
        let msg_port = config.msg_port;
        let bcast_port = config.bcast_port;

        let local_ip = find_local_ip(
            bcast_port,
            config.id_gen_attempts,
            Duration::from_millis(config.id_gen_retry_ms),
        )?;
        info!("Local IP: {}", local_ip);

        let msg_socket = UdpSocket::bind(("0.0.0.0", msg_port))?;
        msg_socket.set_broadcast(true)?;
        let bcast_socket = UdpSocket::bind(("0.0.0.0", bcast_port))?;

        // Transmitter thread
        let tx_socket = msg_socket.try_clone()?;
        let tx_thread = Builder::new().name("net_tx".into());
        tx_thread
            .spawn(move || loop {
                cbc::select! {
                    recv(net_order_send_rx) -> msg => {
                        match msg {
                            Ok(msg) => send_json(&tx_socket, &msg.send_to, msg_port, bcast_port, serde_json::to_vec(&msg)),
                            Err(e) => {
                                error!("net_order_send_rx closed: {}", e);
                                break;
                            }
                        }
                    }
                    recv(net_backup_send_rx) -> msg => {
                        match msg {
                            Ok(msg) => send_json(&tx_socket, &msg.send_to, msg_port, bcast_port, serde_json::to_vec(&msg)),
                            Err(e) => {
                                error!("net_backup_send_rx closed: {}", e);
                                break;
                            }
                        }
                    }
                }
            })?;

        // One receiver per socket
        for (name, socket) in [("net_rx", msg_socket), ("net_rx_bcast", bcast_socket)] {
            let order_tx = net_order_recv_tx.clone();
            let backup_tx = net_backup_recv_tx.clone();
            let self_echo_tx = net_self_echo_tx.clone();
            let ip = local_ip.clone();
            let rx_thread = Builder::new().name(name.into());
            rx_thread
                .spawn(move || {
                    receive_loop(socket, &ip, n_floors, order_tx, backup_tx, self_echo_tx)
                })?;
        }

        Ok(Network { local_ip })
    }
}

/***************************************/
/*           Local functions           */
/***************************************/
fn receive_loop(
    socket: UdpSocket,
    local_ip: &str,
    n_floors: usize,
    order_tx: cbc::Sender<OrderMessage>,
    backup_tx: cbc::Sender<BackupMessage>,
    self_echo_tx: cbc::Sender<()>,
) {
    let mut buffer = [0u8; MAX_DATAGRAM];
    loop {
        let (length, source) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(e) => {
                error!("recv_from failed: {}", e);
                continue;
            }
        };

        match messages::decode(&buffer[..length], local_ip, n_floors) {
            Ok(Decoded::Order(msg)) => {
                if order_tx.try_send(msg).is_err() {
                    warn!("order queue full, dropping datagram from {}", source);
                }
            }
            Ok(Decoded::Backup(msg)) => {
                if backup_tx.try_send(msg).is_err() {
                    warn!("backup queue full, dropping datagram from {}", source);
                }
            }
            Ok(Decoded::SelfEcho) => {
                // Queue holds one tick; a full queue already says "healthy"
                let _ = self_echo_tx.try_send(());
            }
            Err(e) => {
                debug!("rejected datagram from {}: {}", source, e);
            }
        }
    }
}

fn send_json(
    socket: &UdpSocket,
    send_to: &str,
    msg_port: u16,
    bcast_port: u16,
    payload: serde_json::Result<Vec<u8>>,
) {
    let payload = match payload {
        Ok(payload) => payload,
        Err(e) => {
            error!("failed to serialize outgoing message: {}", e);
            return;
        }
    };
    if payload.len() > MAX_DATAGRAM {
        error!("outgoing message of {} bytes exceeds datagram limit", payload.len());
        return;
    }

    let result = if send_to.is_empty() {
        socket.send_to(&payload, (BROADCAST_ADDR, bcast_port))
    } else {
        socket.send_to(&payload, (send_to, msg_port))
    };
    if let Err(e) = result {
        warn!("send to {:?} failed: {}", send_to, e);
    }
}

/// Discovers the address this node is reachable on by opening a socket
/// toward the broadcast address and reading its local endpoint. Retried a
/// bounded number of times; a node without a network is not allowed to join
/// the cluster.
fn find_local_ip(bcast_port: u16, max_attempts: u32, retry_delay: Duration) -> std::io::Result<String> {
    let mut attempts = 0;
    loop {
        let result = UdpSocket::bind(("0.0.0.0", 0)).and_then(|socket| {
            socket.connect((BROADCAST_ADDR, bcast_port))?;
            socket.local_addr()
        });
        match result {
            Ok(addr) => return Ok(addr.ip().to_string()),
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(e);
                }
                error!("attempt {} to find local IP failed: {}", attempts, e);
                sleep(retry_delay);
            }
        }
    }
}
