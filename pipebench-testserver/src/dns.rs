//! Minimal authoritative nameserver: answers `A` queries for provisioned
//! `<label>.<base_domain>` names with 127.0.0.1 and NXDOMAIN for everything
//! else.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{RData, Record, RecordType};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
pub struct Zone {
    base_domain: Arc<str>,
    labels: Arc<Mutex<HashSet<String>>>,
}

impl Zone {
    pub fn new(base_domain: &str) -> Self {
        Self {
            base_domain: Arc::from(base_domain.trim_end_matches('.').to_ascii_lowercase()),
            labels: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn provision(&self, label: &str) {
        self.labels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(label.to_ascii_lowercase());
    }

    pub fn clear(&self) {
        self.labels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn contains(&self, fqdn: &str) -> bool {
        let fqdn = fqdn.trim_end_matches('.').to_ascii_lowercase();
        let Some(label) = fqdn
            .strip_suffix(self.base_domain.as_ref())
            .and_then(|rest| rest.strip_suffix('.'))
        else {
            return false;
        };
        if label.is_empty() || label.contains('.') {
            return false;
        }
        self.labels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(label)
    }
}

pub struct DnsServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl DnsServer {
    pub async fn start(zone: Zone) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = socket.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    recv = socket.recv_from(&mut buf) => {
                        let Ok((n, peer)) = recv else { continue };
                        if let Some(reply) = answer(&buf[..n], &zone) {
                            let _ = socket.send_to(&reply, peer).await;
                        }
                    }
                }
            }
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for DnsServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Builds the reply to one datagram. `None` drops anything that is not a
/// single-question query.
fn answer(datagram: &[u8], zone: &Zone) -> Option<Vec<u8>> {
    let request = Message::from_vec(datagram).ok()?;
    if request.message_type() != MessageType::Query || request.queries().len() != 1 {
        return None;
    }
    let query = request.queries()[0].clone();
    let known = zone.contains(&query.name().to_string());

    let mut reply = Message::new();
    reply
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_authoritative(true)
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(true)
        .set_response_code(if known {
            ResponseCode::NoError
        } else {
            ResponseCode::NXDomain
        });
    if let Some(edns) = request.extensions() {
        reply.set_edns(edns.clone());
    }
    if known && query.query_type() == RecordType::A {
        reply.add_answer(Record::from_rdata(
            query.name().clone(),
            0,
            RData::A(A(Ipv4Addr::LOCALHOST)),
        ));
    }
    reply.add_query(query);
    reply.to_vec().ok()
}
