use crate::{
    configure_keepalive, connect_retry, ChannelClosed, JoinOnDrop, Source, TransportEvent,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const READ_BUFFER_SIZE: usize = 4096;

/// One TCP connection with dedicated read and write worker threads.
///
/// The writer drains a channel and issues a single `write_all` per frame, so
/// frames are serialized in submission order and never interleave. The reader
/// forwards raw segments; framing is the consumer's business.
pub struct TcpChannel {
    stream: Arc<TcpStream>,
    write: Sender<Vec<u8>>,
    events: Receiver<TransportEvent>,
    _workers: Box<(JoinOnDrop<()>, JoinOnDrop<()>)>,
}

impl TcpChannel {
    pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> std::io::Result<Self> {
        let stream = connect_retry(addr, timeout)?;
        configure_keepalive(&stream)?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let stream = Arc::new(stream);
        let (write_tx, write_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        let read_handle = thread::spawn({
            let stream = Arc::clone(&stream);
            let events = event_tx.clone();
            move || read_worker(stream, events)
        });

        let write_handle = thread::spawn({
            let stream = Arc::clone(&stream);
            move || write_worker(stream, event_tx, write_rx)
        });

        Self {
            stream,
            write: write_tx,
            events: event_rx,
            _workers: Box::new((JoinOnDrop::new(read_handle), JoinOnDrop::new(write_handle))),
        }
    }

    pub fn send_frame(&self, frame: Vec<u8>) -> Result<(), ChannelClosed> {
        self.write.send(frame).map_err(|_| ChannelClosed)
    }

    pub fn writer(&self) -> FrameWriter {
        FrameWriter {
            sender: self.write.clone(),
        }
    }

    pub fn events(&self) -> &Receiver<TransportEvent> {
        &self.events
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stream: Arc::clone(&self.stream),
        }
    }

    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        // Unblocks the read worker; the write worker exits when the sender
        // side of its channel is dropped with the struct.
        self.shutdown();
    }
}

/// Cloneable handle for submitting frames to the write worker.
#[derive(Clone)]
pub struct FrameWriter {
    sender: Sender<Vec<u8>>,
}

impl FrameWriter {
    pub fn send(&self, frame: Vec<u8>) -> Result<(), ChannelClosed> {
        self.sender.send(frame).map_err(|_| ChannelClosed)
    }
}

/// Lets router threads tear a connection down without owning it.
#[derive(Clone)]
pub struct ShutdownHandle {
    stream: Arc<TcpStream>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn read_worker(stream: Arc<TcpStream>, events: Sender<TransportEvent>) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match Read::read(&mut (&*stream), &mut buffer[..]) {
            // The syscall succeeded with nothing left to read: the peer
            // closed the stream.
            Ok(0) => {
                let _ = events.send(TransportEvent::Shutdown(Source::Read));
                return;
            }
            Ok(read) => {
                let segment = buffer[.. read].to_vec();
                if events.send(TransportEvent::Segment(segment)).is_err() {
                    return;
                }
            }
            Err(error) => {
                let _ = events.send(TransportEvent::Error(error));
                return;
            }
        }
    }
}

fn write_worker(
    stream: Arc<TcpStream>,
    events: Sender<TransportEvent>,
    frames: Receiver<Vec<u8>>,
) {
    while let Ok(frame) = frames.recv() {
        if let Err(error) = (&*stream).write_all(&frame) {
            let _ = events.send(TransportEvent::Error(error));
            return;
        }
    }
    let _ = events.send(TransportEvent::Shutdown(Source::Write));
}
