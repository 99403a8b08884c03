//! Transport-level message endpoints.
//!
//! An [`Endpoint`] knows nothing about proxies, targets or wire values: it
//! moves opaque byte packets (plus any raw transfer buffers riding alongside
//! them) between two peers and lets a caller subscribe to arrivals. This
//! mirrors the teacher's `rs::socket` framing layer, generalized from a Unix
//! socket carrying fixed-shape Wayland messages with ancillary fds to an
//! arbitrary-length JSON payload carrying arbitrary-length transfer buffers.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ConnectionError;

/// A single message plus any byte buffers marked for transfer, in the order
/// the serializer encountered them.
#[derive(Debug, Clone)]
pub struct Packet {
    /// The serialized protocol message.
    pub bytes: Vec<u8>,
    /// Raw buffers moved alongside the message, in encounter order.
    pub transfers: Vec<Vec<u8>>,
}

/// Invoked once per packet that arrives from the peer.
pub type Listener = Arc<dyn Fn(Packet) + Send + Sync>;

/// A bidirectional, message-oriented transport between two connection
/// endpoints.
///
/// Exactly one listener is active at a time, matching the single `onmessage`
/// slot of a JS `MessagePort`: a second `subscribe` call replaces the first.
/// Packets that arrive before anyone has subscribed are held and delivered,
/// in order, the moment a listener attaches - the handshake race that would
/// otherwise exist between one side calling `expose` and the other calling
/// `wrap` is resolved this way rather than by requiring a fixed startup
/// order.
pub trait Endpoint: Send + Sync {
    /// Send a packet to the peer.
    fn send(&self, packet: Packet) -> Result<(), ConnectionError>;

    /// Register the callback invoked for each packet the peer sends.
    fn subscribe(&self, listener: Listener);

    /// Remove any currently registered listener.
    fn unsubscribe(&self);
}

#[derive(Default)]
struct Inbox {
    listener: Option<Listener>,
    queued: VecDeque<Packet>,
}

fn subscribe(inbox: &Mutex<Inbox>, listener: Listener) {
    let queued: Vec<Packet> = {
        let mut inbox = inbox.lock();
        inbox.listener = Some(listener.clone());
        inbox.queued.drain(..).collect()
    };
    for packet in queued {
        listener(packet);
    }
}

fn unsubscribe(inbox: &Mutex<Inbox>) {
    inbox.lock().listener = None;
}

struct LocalEndpoint {
    sender: Mutex<Sender<Packet>>,
    inbox: Arc<Mutex<Inbox>>,
}

impl Endpoint for LocalEndpoint {
    fn send(&self, packet: Packet) -> Result<(), ConnectionError> {
        self.sender
            .lock()
            .send(packet)
            .map_err(|_| ConnectionError::Transport("peer endpoint dropped".into()))
    }

    fn subscribe(&self, listener: Listener) {
        subscribe(&self.inbox, listener);
    }

    fn unsubscribe(&self) {
        unsubscribe(&self.inbox);
    }
}

fn deliver(inbox: &Mutex<Inbox>, packet: Packet) {
    let callback = {
        let mut guard = inbox.lock();
        if guard.listener.is_some() {
            guard.listener.clone()
        } else {
            guard.queued.push_back(packet);
            return;
        }
    };
    if let Some(callback) = callback {
        callback(packet);
    }
}

fn spawn_pump(rx: Receiver<Packet>, inbox: Arc<Mutex<Inbox>>) {
    std::thread::Builder::new()
        .name("duplex-rpc-pump".into())
        .spawn(move || {
            while let Ok(packet) = rx.recv() {
                deliver(&inbox, packet);
            }
        })
        .expect("failed to spawn endpoint pump thread");
}

/// Build a pair of in-process endpoints wired directly to each other, the
/// programmatic analogue of a `MessageChannel`'s two ports. Mainly useful
/// for tests and for exposing/wrapping within a single process.
pub fn local_pair() -> (Arc<dyn Endpoint>, Arc<dyn Endpoint>) {
    let (tx_a, rx_a) = std::sync::mpsc::channel::<Packet>();
    let (tx_b, rx_b) = std::sync::mpsc::channel::<Packet>();
    let inbox_a: Arc<Mutex<Inbox>> = Arc::new(Mutex::new(Inbox::default()));
    let inbox_b: Arc<Mutex<Inbox>> = Arc::new(Mutex::new(Inbox::default()));

    let endpoint_a = Arc::new(LocalEndpoint { sender: Mutex::new(tx_b), inbox: inbox_a.clone() });
    let endpoint_b = Arc::new(LocalEndpoint { sender: Mutex::new(tx_a), inbox: inbox_b.clone() });

    spawn_pump(rx_a, inbox_a);
    spawn_pump(rx_b, inbox_b);

    (endpoint_a, endpoint_b)
}

/// An endpoint over a raw byte stream, framing each packet as a length
/// header followed by the message bytes and then each transfer buffer.
///
/// Frame layout (all integers little-endian `u32`):
/// `[msg_len][msg_bytes][transfer_count][transfer_len][transfer_bytes]...`
pub struct FramedIoEndpoint {
    writer: Mutex<Box<dyn Write + Send>>,
    inbox: Arc<Mutex<Inbox>>,
}

impl std::fmt::Debug for FramedIoEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedIoEndpoint").finish_non_exhaustive()
    }
}

impl FramedIoEndpoint {
    /// Wrap `reader`/`writer` as an endpoint, spawning a background thread
    /// that reads frames and dispatches them to whatever listener is
    /// registered at the time each frame completes (or queues them for
    /// whichever listener attaches next).
    pub fn new(reader: Box<dyn Read + Send>, writer: Box<dyn Write + Send>) -> Arc<dyn Endpoint> {
        let inbox: Arc<Mutex<Inbox>> = Arc::new(Mutex::new(Inbox::default()));
        let endpoint = Arc::new(FramedIoEndpoint { writer: Mutex::new(writer), inbox: inbox.clone() });
        spawn_reader(reader, inbox);
        endpoint
    }
}

impl Endpoint for FramedIoEndpoint {
    fn send(&self, packet: Packet) -> Result<(), ConnectionError> {
        let mut writer = self.writer.lock();
        write_frame(&mut *writer, &packet).map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    fn subscribe(&self, listener: Listener) {
        subscribe(&self.inbox, listener);
    }

    fn unsubscribe(&self) {
        unsubscribe(&self.inbox);
    }
}

fn write_frame(writer: &mut dyn Write, packet: &Packet) -> io::Result<()> {
    writer.write_all(&(packet.bytes.len() as u32).to_le_bytes())?;
    writer.write_all(&packet.bytes)?;
    writer.write_all(&(packet.transfers.len() as u32).to_le_bytes())?;
    for transfer in &packet.transfers {
        writer.write_all(&(transfer.len() as u32).to_le_bytes())?;
        writer.write_all(transfer)?;
    }
    writer.flush()
}

fn read_frame(reader: &mut dyn Read) -> io::Result<Packet> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let mut bytes = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    reader.read_exact(&mut bytes)?;

    reader.read_exact(&mut len_buf)?;
    let count = u32::from_le_bytes(len_buf);
    let mut transfers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        reader.read_exact(&mut len_buf)?;
        let mut buf = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        reader.read_exact(&mut buf)?;
        transfers.push(buf);
    }

    Ok(Packet { bytes, transfers })
}

fn spawn_reader(mut reader: Box<dyn Read + Send>, inbox: Arc<Mutex<Inbox>>) {
    std::thread::Builder::new()
        .name("duplex-rpc-reader".into())
        .spawn(move || loop {
            match read_frame(&mut *reader) {
                Ok(packet) => deliver(&inbox, packet),
                Err(_) => break,
            }
        })
        .expect("failed to spawn endpoint reader thread");
}
