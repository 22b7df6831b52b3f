//! Raw video over RTP/UDP
//!
//! Each sample is split into RTP packets no larger than the configured MTU.
//! Every packet carries a small payload header so a receiver can place the
//! chunk inside the frame without any session description:
//!
//! ```text
//! 0               2               4                               8                              12
//! +---------------+---------------+-------------------------------+-------------------------------+
//! | width (u16)   | height (u16)  | byte offset in frame (u32)    | frame size in bytes (u32)     |
//! +---------------+---------------+-------------------------------+-------------------------------+
//! ```
//!
//! The marker bit is set on the last packet of a frame; all packets of a
//! frame share the same 90 kHz timestamp.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, info};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use tokio::net::UdpSocket;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::util::Marshal;

use super::TransmitPipeline;
use crate::assets::{MAX_FRAME_HEIGHT, MAX_FRAME_WIDTH, RTP_CLOCK_RATE, RTP_PAYLOAD_TYPE};
use crate::config::TransmitConfig;
use crate::pipeline::bus::BusSender;
use crate::pipeline::caps::{CapsDescriptor, CapsFilter};
use crate::pipeline::error::RelayError;
use crate::pipeline::stage::{EndpointState, PipelineEndpoint};
use crate::pipeline::types::{Sample, Timestamp};

pub const RTP_HEADER_SIZE: usize = 12;
pub const PAYLOAD_HEADER_SIZE: usize = 12;

/// Splits frames into RTP packets
#[derive(Debug, Clone)]
pub struct Packetizer {
    ssrc: u32,
    sequence: u16,
    mtu: usize,
}

impl Packetizer {
    pub fn new(ssrc: u32, mtu: usize) -> Self {
        Self {
            ssrc,
            sequence: 0,
            mtu,
        }
    }

    /// Frame bytes carried by one packet
    pub fn chunk_size(&self) -> usize {
        self.mtu.saturating_sub(RTP_HEADER_SIZE + PAYLOAD_HEADER_SIZE).max(1)
    }

    pub fn packetize(
        &mut self,
        frame: &[u8],
        caps: &CapsDescriptor,
        pts: Timestamp,
    ) -> Result<Vec<Bytes>, RelayError> {
        let total = u32::try_from(frame.len())
            .map_err(|_| RelayError::push(format!("frame of {} bytes too large", frame.len())))?;
        let timestamp = pts.to_clock_rate(RTP_CLOCK_RATE) as u32;
        let chunks: Vec<&[u8]> = frame.chunks(self.chunk_size()).collect();
        let last = chunks.len().saturating_sub(1);

        let mut packets = Vec::with_capacity(chunks.len());
        let mut offset = 0u32;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut payload = BytesMut::with_capacity(PAYLOAD_HEADER_SIZE + chunk.len());
            payload.put_u16(caps.width as u16);
            payload.put_u16(caps.height as u16);
            payload.put_u32(offset);
            payload.put_u32(total);
            payload.put_slice(chunk);

            let packet = Packet {
                header: Header {
                    version: 2,
                    marker: i == last,
                    payload_type: RTP_PAYLOAD_TYPE,
                    sequence_number: self.sequence,
                    timestamp,
                    ssrc: self.ssrc,
                    ..Default::default()
                },
                payload: payload.freeze(),
            };
            packets.push(
                packet
                    .marshal()
                    .map_err(|e| RelayError::push(format!("rtp: {}", e)))?,
            );

            self.sequence = self.sequence.wrapping_add(1);
            offset += chunk.len() as u32;
        }
        Ok(packets)
    }
}

fn new_ssrc() -> u32 {
    chrono::Utc::now().timestamp_subsec_nanos() ^ std::process::id().rotate_left(16)
}

/// Transmit pipeline sending raw frames over RTP/UDP
pub struct UdpTransmit {
    target: SocketAddr,
    bus: BusSender,
    socket: Option<UdpSocket>,
    caps: Option<CapsDescriptor>,
    packetizer: Packetizer,
    state: EndpointState,
}

impl UdpTransmit {
    /// Resolve the destination; failure means the sink cannot be created
    pub fn new(config: &TransmitConfig, bus: BusSender) -> Result<Self, RelayError> {
        let target = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| RelayError::element(bus.role(), "udpsink", e))?
            .next()
            .ok_or_else(|| {
                RelayError::element(bus.role(), "udpsink", format!("no address for {}", config.host))
            })?;

        debug!(
            "udpsink: raw payload, encoder settings ignored (bitrate {} kbps, low latency {}, preset {})",
            config.bitrate_kbps, config.low_latency, config.speed_preset
        );

        Ok(Self {
            target,
            bus,
            socket: None,
            caps: None,
            packetizer: Packetizer::new(new_ssrc(), config.mtu),
            state: EndpointState::Idle,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    fn bind(&self) -> std::io::Result<UdpSocket> {
        let local: SocketAddr = if self.target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = std::net::UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        UdpSocket::from_std(socket)
    }
}

#[async_trait]
impl PipelineEndpoint for UdpTransmit {
    fn name(&self) -> &'static str {
        "udpsink"
    }

    fn caps_filter(&self) -> CapsFilter {
        CapsFilter::any(MAX_FRAME_WIDTH, MAX_FRAME_HEIGHT)
    }

    fn link(&mut self) -> Result<(), RelayError> {
        if self.socket.is_none() {
            let socket = self.bind().map_err(|e| RelayError::link(self.bus.role(), e))?;
            self.socket = Some(socket);
        }
        Ok(())
    }

    fn configure(&mut self, caps: &CapsDescriptor) -> Result<(), RelayError> {
        self.caps_filter().check(caps).map_err(RelayError::negotiation)?;
        self.caps = Some(*caps);
        Ok(())
    }

    async fn set_state(&mut self, state: EndpointState) -> Result<(), RelayError> {
        let role = self.bus.role();
        if !self.state.can_transition_to(&state) {
            return Err(RelayError::start(
                role,
                state,
                format!("not reachable from {}", self.state),
            ));
        }
        match state {
            EndpointState::Ready | EndpointState::Active if self.socket.is_none() => {
                return Err(RelayError::start(role, state, "socket not bound"));
            }
            EndpointState::Active if self.caps.is_none() => {
                return Err(RelayError::start(role, state, "caps not configured"));
            }
            EndpointState::Active => {
                info!("udpsink: sending to {}", self.target);
            }
            _ => {}
        }
        self.state = state;
        self.bus.state_changed(state);
        Ok(())
    }

    fn state(&self) -> EndpointState {
        self.state
    }

    async fn release(&mut self) {
        self.socket = None;
        self.caps = None;
    }
}

#[async_trait]
impl TransmitPipeline for UdpTransmit {
    async fn push_sample(&mut self, sample: Sample) -> Result<(), RelayError> {
        if self.state != EndpointState::Active {
            return Err(RelayError::push(format!("udpsink is {}", self.state)));
        }
        let (Some(socket), Some(caps)) = (self.socket.as_ref(), self.caps.as_ref()) else {
            return Err(RelayError::push("udpsink not configured"));
        };
        if sample.caps() != caps {
            return Err(RelayError::negotiation(format!(
                "udpsink configured for {} but got {}",
                caps,
                sample.caps()
            )));
        }

        let packets = self
            .packetizer
            .packetize(sample.buffer(), caps, sample.pts())?;
        for packet in packets {
            socket
                .send_to(&packet, self.target)
                .await
                .map_err(|e| RelayError::push(format!("udpsink: {}", e)))?;
        }
        Ok(())
    }

    async fn end_of_stream(&mut self) {
        debug!("udpsink: end of stream");
        self.bus.eos();
    }
}
