use crate::net::error::{NetworkError, NetworkResult};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use trust_dns_proto::op::{Message, MessageType, OpCode, Query};
use trust_dns_proto::rr::{Name, RData, RecordType};

pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_PORT: u16 = 5353;

/// How long a query stays open for responses before its channel closes.
const QUERY_TIMEOUT: Duration = Duration::from_secs(1);
const RESPONSE_CHANNEL_DEPTH: usize = 4;

/// One answer to an outstanding query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdnsResponse {
    pub name: String,
    pub addr: Ipv4Addr,
}

struct PendingQuery {
    id: u64,
    tx: mpsc::Sender<MdnsResponse>,
}

/// Outstanding queries keyed by (lowercased name, record type). A
/// response is delivered to every query it matches and to nothing else,
/// so concurrent independent queries never cross-deliver.
type InflightMap = HashMap<(String, RecordType), Vec<PendingQuery>>;

/// Multicast DNS query client.
///
/// One socket joined to the mDNS group, one background receive task.
/// Each query gets its own response channel which closes at the query
/// timeout; zero responses by then simply closes the channel empty.
pub struct MdnsClient {
    socket: Arc<UdpSocket>,
    inflight: Arc<Mutex<InflightMap>>,
    next_id: AtomicU64,
    recv_task: tokio::task::JoinHandle<()>,
}

impl MdnsClient {
    pub async fn new() -> NetworkResult<Self> {
        let socket = Arc::new(multicast_socket()?);
        let inflight: Arc<Mutex<InflightMap>> = Arc::new(Mutex::new(HashMap::new()));

        let recv_socket = Arc::clone(&socket);
        let recv_inflight = Arc::clone(&inflight);
        let recv_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((len, _src)) => {
                        if let Ok(msg) = Message::from_vec(&buf[..len]) {
                            dispatch(&recv_inflight, &msg);
                        }
                    }
                    Err(e) => {
                        tracing::debug!("mdns receive error: {}", e);
                    }
                }
            }
        });

        Ok(Self {
            socket,
            inflight,
            next_id: AtomicU64::new(0),
            recv_task,
        })
    }

    /// Transmit one query and return the channel its responses arrive
    /// on. The channel closes at the query timeout.
    pub async fn send_query(
        &self,
        name: &str,
        record_type: RecordType,
    ) -> NetworkResult<mpsc::Receiver<MdnsResponse>> {
        let qname = Name::from_ascii(name)
            .map_err(|e| NetworkError::Config(format!("invalid query name '{}': {}", name, e)))?;

        let mut msg = Message::new();
        msg.set_id(0)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .add_query(Query::query(qname.clone(), record_type));
        let packet = msg
            .to_vec()
            .map_err(|e| NetworkError::Config(format!("query encoding failed: {}", e)))?;

        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_DEPTH);
        let key = (qname.to_ascii().to_lowercase(), record_type);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inflight
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push(PendingQuery { id, tx });

        if let Err(e) = self
            .socket
            .send_to(&packet, SocketAddrV4::new(MDNS_GROUP, MDNS_PORT))
            .await
        {
            // Nothing was transmitted, so nothing can answer; take the
            // registration back out instead of leaving a dead entry.
            remove_pending(&self.inflight, &key, id);
            return Err(NetworkError::Io(e));
        }

        // Dropping the sender at timeout is what closes the receiver.
        let inflight = Arc::clone(&self.inflight);
        tokio::spawn(async move {
            tokio::time::sleep(QUERY_TIMEOUT).await;
            remove_pending(&inflight, &key, id);
        });

        Ok(rx)
    }

    pub fn shutdown(&self) {
        self.recv_task.abort();
    }
}

impl Drop for MdnsClient {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// Drop one query's registration, releasing its sender. The key itself
/// goes away with its last query.
fn remove_pending(inflight: &Mutex<InflightMap>, key: &(String, RecordType), id: u64) {
    let mut map = inflight.lock().unwrap();
    if let Some(pending) = map.get_mut(key) {
        pending.retain(|p| p.id != id);
        if pending.is_empty() {
            map.remove(key);
        }
    }
}

/// Deliver each A answer to every query it matches. Queries echoed back
/// from the group carry no answers and fall through untouched.
fn dispatch(inflight: &Mutex<InflightMap>, msg: &Message) {
    for record in msg.answers() {
        let addr = match record.data() {
            Some(RData::A(a)) => a.0,
            _ => continue,
        };
        let key = (
            record.name().to_ascii().to_lowercase(),
            record.record_type(),
        );
        let map = inflight.lock().unwrap();
        if let Some(pending) = map.get(&key) {
            let response = MdnsResponse {
                name: record.name().to_ascii(),
                addr,
            };
            for query in pending {
                let _ = query.tx.try_send(response.clone());
            }
        }
    }
}

fn multicast_socket() -> NetworkResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(NetworkError::Io)?;
    socket.set_reuse_address(true).map_err(NetworkError::Io)?;
    socket.set_nonblocking(true).map_err(NetworkError::Io)?;
    socket
        .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT).into())
        .map_err(NetworkError::Io)?;
    socket
        .join_multicast_v4(&MDNS_GROUP, &Ipv4Addr::UNSPECIFIED)
        .map_err(NetworkError::Io)?;
    socket.set_multicast_loop_v4(true).map_err(NetworkError::Io)?;
    UdpSocket::from_std(socket.into()).map_err(NetworkError::Io)
}
