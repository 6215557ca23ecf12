//! Demonstration marshal: a thin `UdpMarshal`
//! wiring one `FragmentSender` and one `FragmentReceiver` to a
//! non-blocking `UdpSocket`, modeled on the shape of reliudp's
//! `RUdpSocket`/`RUdpServer` (bind/connect + `next_tick` draining a socket
//! in a loop) but pared down to a single remote: this crate's protocol
//! is fragmentation-and-framing, not connection/session management, so
//! there is no handshake, timeout, or multi-remote table here.
//!
//! Not part of the protocol itself — the fragment engines neither know nor
//! care that this is how their packets reach the wire. This module exists
//! so the crate has a runnable end-to-end demonstration of submit -> split
//! -> reassemble -> deliver over a real socket.

use std::io::{Error as IoError, ErrorKind as IoErrorKind, Result as IoResult};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use uuid::Uuid;

use crate::external::digest::{Crc32Digest, DigestProvider};
use crate::factory::PacketFactory;
use crate::fragment::{FragmentReceiver, FragmentSender, FragmentationOptions};
use crate::loader::PacketLoader;
use crate::packet::AnyPacket;

const RECV_BUFFER_SIZE: usize = 65536;

/// Pairs one `FragmentSender` and one `FragmentReceiver` with a bound,
/// non-blocking UDP socket talking to a single `remote_addr`.
///
/// `tick()` is the moral equivalent of reliudp's `next_tick`: drain
/// whatever arrived since the last call, feed it to both engines (a
/// fragment-protocol frame is routed to whichever engine's registry it
/// actually belongs to; `ingest` on the other side is simply a no-op),
/// then flush whatever either engine now has queued to send.
pub struct UdpMarshal {
    socket: UdpSocket,
    remote_addr: SocketAddr,
    loader: PacketLoader,
    factory: PacketFactory,
    sender: FragmentSender,
    receiver: FragmentReceiver,
}

impl UdpMarshal {
    /// Binds `local_addr` and targets `remote_addr` for every send; since
    /// this crate has no handshake, "connect" just means "remember who to
    /// talk to", the same as reliudp's `RUdpSocket::connect` minus the
    /// syn/synack exchange.
    pub fn bind<L: ToSocketAddrs, R: ToSocketAddrs>(
        local_addr: L,
        remote_addr: R,
        options: FragmentationOptions,
    ) -> IoResult<Self> {
        let socket = UdpSocket::bind(local_addr)?;
        socket.set_nonblocking(true)?;
        let remote_addr = remote_addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| IoError::new(IoErrorKind::InvalidInput, "remote_addr resolved to no address"))?;

        let sender = FragmentSender::new(options)
            .map_err(|e| IoError::new(IoErrorKind::InvalidInput, e.to_string()))?;
        let receiver = FragmentReceiver::new(options)
            .map_err(|e| IoError::new(IoErrorKind::InvalidInput, e.to_string()))?;

        log::info!("marshal bound on {} talking to {}", socket.local_addr()?, remote_addr);

        Ok(UdpMarshal {
            socket,
            remote_addr,
            loader: PacketLoader::new().with_digest_provider(Arc::new(Crc32Digest) as Arc<dyn DigestProvider>),
            factory: PacketFactory::new(),
            sender,
            receiver,
        })
    }

    /// Convenience over [`bind`] that picks an ephemeral local port, the
    /// same shorthand reliudp's `RUdpSocket::connect` provides.
    pub fn connect<R: ToSocketAddrs>(remote_addr: R, options: FragmentationOptions) -> IoResult<Self> {
        Self::bind("0.0.0.0:0", remote_addr, options)
    }

    pub fn local_addr(&self) -> IoResult<SocketAddr> {
        self.socket.local_addr()
    }

    /// Queues `bytes` for fragmented delivery. Returns the allocation uuid
    /// the caller can correlate against `poll_finished` once the remote has
    /// acknowledged full receipt.
    pub fn send(&self, bytes: Vec<u8>) -> IoResult<Uuid> {
        self.sender.submit(bytes).map_err(|e| IoError::new(IoErrorKind::InvalidInput, e.to_string()))
    }

    /// Drains pending datagrams, feeds fragment-protocol frames to both
    /// engines, flushes anything either engine now wants to emit, and
    /// returns any fully-reassembled application packets delivered this
    /// tick. Call this in a loop, same cadence as reliudp's
    /// `next_tick`.
    pub fn tick(&self) -> IoResult<Vec<AnyPacket>> {
        self.drain_incoming()?;
        self.flush_outgoing()?;
        let mut delivered = Vec::new();
        while let Some(packet) = self.receiver.poll_recv() {
            delivered.push(packet);
        }
        Ok(delivered)
    }

    fn drain_incoming(&self) -> IoResult<()> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    if from != self.remote_addr {
                        log::trace!("marshal: dropping {} bytes from unexpected sender {}", len, from);
                        continue;
                    }
                    self.ingest_datagram(&buf[..len]);
                }
                Err(ref err) if err.kind() == IoErrorKind::WouldBlock => break,
                Err(err) => {
                    log::error!("marshal: socket recv error: {:?}", err);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn ingest_datagram(&self, datagram: &[u8]) {
        let mut cursor = datagram;
        let packet = match self.loader.read(&mut cursor, &self.factory, None) {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                log::debug!("marshal: dropped unrecognized or corrupt frame ({} bytes)", datagram.len());
                return;
            }
            Err(err) => {
                log::warn!("marshal: failed to decode incoming frame: {}", err);
                return;
            }
        };
        log::trace!("marshal: received {:?}", packet.tag());
        let handled_by_sender = self.sender.ingest(&packet);
        let handled_by_receiver = self.receiver.ingest(&packet);
        if !handled_by_sender && !handled_by_receiver {
            log::debug!("marshal: {:?} matched neither engine's registry", packet.tag());
        }
    }

    fn flush_outgoing(&self) -> IoResult<()> {
        for packet in self.sender.poll_outbound() {
            self.send_frame(&packet)?;
        }
        for packet in self.receiver.poll_outbound() {
            self.send_frame(&packet)?;
        }
        Ok(())
    }

    fn send_frame(&self, packet: &AnyPacket) -> IoResult<()> {
        let mut buf = Vec::new();
        self.loader
            .write(&mut buf, packet, true)
            .map_err(|e| IoError::new(IoErrorKind::InvalidData, e.to_string()))?;
        self.socket.send_to(&buf, self.remote_addr)?;
        Ok(())
    }

    pub fn poll_finished_send(&self) -> Option<u32> {
        self.sender.poll_finished()
    }

    pub fn poll_finished_recv(&self) -> Option<u32> {
        self.receiver.poll_finished()
    }
}
