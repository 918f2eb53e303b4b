//! UDP echo traffic.
//!
//! A flow pairs an echo client with an echo server. The client sends
//! `max_packets` datagrams of `packet_size` bytes, `interval` apart, starting
//! at `client_start`. While active, the server answers each request with a
//! datagram of the same size.

use serde::{Deserialize, Serialize};
use wormroute::{Address, DataPacket, DropReason, Duration, NodeId, Timestamp};

use crate::error::ScenarioError;

/// Well-known echo port.
pub const ECHO_PORT: u16 = 9;
/// First ephemeral port handed to clients.
pub const EPHEMERAL_PORT_BASE: u16 = 49153;

/// One echo flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoFlow {
    pub client: NodeId,
    pub server: NodeId,
    pub port: u16,
    /// Application payload per datagram.
    pub packet_size: u32,
    pub max_packets: u32,
    pub interval: Duration,
    pub client_start: Timestamp,
    pub client_stop: Timestamp,
    pub server_start: Timestamp,
    pub server_stop: Timestamp,
    /// Whether the server answers.
    pub echo: bool,
}

impl Default for EchoFlow {
    fn default() -> Self {
        Self {
            client: 0,
            server: 1,
            port: ECHO_PORT,
            packet_size: 1024,
            max_packets: 1,
            interval: Duration::from_secs(1),
            client_start: Timestamp::from_secs(2),
            client_stop: Timestamp::from_secs(100),
            server_start: Timestamp::from_secs(1),
            server_stop: Timestamp::from_secs(100),
            echo: true,
        }
    }
}

impl EchoFlow {
    pub fn new(client: NodeId, server: NodeId) -> Self {
        Self {
            client,
            server,
            ..Self::default()
        }
    }

    pub fn with_packets(mut self, count: u32, interval: Duration) -> Self {
        self.max_packets = count;
        self.interval = interval;
        self
    }

    pub fn with_packet_size(mut self, size: u32) -> Self {
        self.packet_size = size;
        self
    }

    pub fn with_start(mut self, start: Timestamp) -> Self {
        self.client_start = start;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Check the flow against a network of `node_count` nodes.
    pub fn validate(&self, index: usize, node_count: usize) -> Result<(), ScenarioError> {
        for node in [self.client, self.server] {
            if node >= node_count {
                return Err(ScenarioError::TrafficNodeOutOfRange { flow: index, node });
            }
        }
        if self.client == self.server {
            return Err(ScenarioError::ClientIsServer {
                flow: index,
                node: self.client,
            });
        }
        if self.packet_size == 0 {
            return Err(ScenarioError::ZeroPacketSize { flow: index });
        }
        if self.interval == Duration::ZERO {
            return Err(ScenarioError::ZeroInterval { flow: index });
        }
        if self.client_stop < self.client_start {
            return Err(ScenarioError::StopBeforeStart {
                what: format!("flow {index} client"),
                start: self.client_start,
                stop: self.client_stop,
            });
        }
        if self.server_stop < self.server_start {
            return Err(ScenarioError::StopBeforeStart {
                what: format!("flow {index} server"),
                start: self.server_start,
                stop: self.server_stop,
            });
        }
        Ok(())
    }
}

/// Sending side of a flow.
#[derive(Debug, Clone)]
pub struct EchoClient {
    flow: EchoFlow,
    local: Address,
    remote: Address,
    local_port: u16,
    sent: u32,
    replies: u32,
    failures: u32,
}

impl EchoClient {
    pub fn new(flow: EchoFlow, local: Address, remote: Address, local_port: u16) -> Self {
        Self {
            flow,
            local,
            remote,
            local_port,
            sent: 0,
            replies: 0,
            failures: 0,
        }
    }

    pub fn flow(&self) -> &EchoFlow {
        &self.flow
    }

    pub fn node(&self) -> NodeId {
        self.flow.client
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }

    pub fn replies(&self) -> u32 {
        self.replies
    }

    /// Requests the source node reported as undeliverable.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Build the next request, or `None` once the budget or window is spent.
    pub fn next_packet(&mut self, uid: u64, now: Timestamp) -> Option<DataPacket> {
        if self.sent >= self.flow.max_packets || now > self.flow.client_stop {
            return None;
        }
        self.sent += 1;
        Some(DataPacket {
            uid,
            src: self.local,
            dst: self.remote,
            src_port: self.local_port,
            dst_port: self.flow.port,
            payload_size: self.flow.packet_size,
        })
    }

    /// When to send again after a send at `now`.
    pub fn next_send(&self, now: Timestamp) -> Option<Timestamp> {
        if self.sent >= self.flow.max_packets {
            return None;
        }
        let next = now + self.flow.interval;
        (next <= self.flow.client_stop).then_some(next)
    }

    /// Whether `packet` is an answer addressed to this client.
    pub fn accepts(&self, packet: &DataPacket) -> bool {
        packet.dst == self.local && packet.dst_port == self.local_port
    }

    /// Whether `packet` is one of this client's requests.
    pub fn sent_packet(&self, packet: &DataPacket) -> bool {
        packet.src == self.local && packet.src_port == self.local_port
    }

    pub fn on_failure(&mut self, packet: &DataPacket, reason: DropReason, now: Timestamp) {
        self.failures += 1;
        tracing::debug!(
            client = self.flow.client,
            uid = packet.uid,
            %reason,
            time = %now,
            "echo request undeliverable"
        );
    }

    pub fn on_reply(&mut self, packet: &DataPacket, now: Timestamp) {
        self.replies += 1;
        tracing::debug!(
            client = self.flow.client,
            uid = packet.uid,
            size = packet.payload_size,
            time = %now,
            "echo reply received"
        );
    }
}

/// Answering side of a flow.
#[derive(Debug, Clone)]
pub struct EchoServer {
    node: NodeId,
    address: Address,
    port: u16,
    start: Timestamp,
    stop: Timestamp,
    echo: bool,
    received: u32,
}

impl EchoServer {
    pub fn new(flow: &EchoFlow, address: Address) -> Self {
        Self {
            node: flow.server,
            address,
            port: flow.port,
            start: flow.server_start,
            stop: flow.server_stop,
            echo: flow.echo,
            received: 0,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn is_active(&self, now: Timestamp) -> bool {
        now >= self.start && now <= self.stop
    }

    pub fn accepts(&self, packet: &DataPacket) -> bool {
        packet.dst == self.address && packet.dst_port == self.port
    }

    /// Take a request; returns the reply to send, if any.
    pub fn on_request(&mut self, packet: &DataPacket, uid: u64, now: Timestamp) -> Option<DataPacket> {
        if !self.is_active(now) {
            return None;
        }
        self.received += 1;
        if !self.echo {
            return None;
        }
        Some(DataPacket {
            uid,
            src: packet.dst,
            dst: packet.src,
            src_port: packet.dst_port,
            dst_port: packet.src_port,
            payload_size: packet.payload_size,
        })
    }
}
