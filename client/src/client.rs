use crate::error::{Error, Failure, Result};
use crate::router::{self, RouterContext};
use crate::transaction::{EventCallback, Subscriber, TransactionEvent};
use crate::vendor::VendorExtensions;
use crate::fuji;
use common::packets::{FrameAssembler, InitCommandAckPacket, PtpIpPacket};
use common::ptp::{TransactionId, VendorExtension, VE_FUJI_PHOTO_FILM};
use crossbeam_channel::unbounded;
use io::{FrameWriter, JoinOnDrop, TcpChannel, TransportEvent};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const INITIATOR_FRIENDLY_NAME: &str = "Rust PTP/IP client";
pub const DEFAULT_PORT: u16 = 15740;
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The local identity announced during the handshake. Immutable once the
/// client exists.
#[derive(Clone, Debug)]
pub struct Initiator {
    pub guid: Uuid,
    pub friendly_name: String,
}

impl Initiator {
    pub fn new(friendly_name: Option<&str>, guid: Option<&str>) -> Result<Self> {
        let guid = match guid {
            Some(raw) if !raw.is_empty() => {
                Uuid::parse_str(raw).map_err(|_| Error::InvalidGuid(raw.to_owned()))?
            }
            _ => Uuid::new_v4(),
        };

        let friendly_name = match friendly_name {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => INITIATOR_FRIENDLY_NAME.to_owned(),
        };

        Ok(Self {
            guid,
            friendly_name,
        })
    }
}

/// The remote identity and address. The GUID, name and protocol version are
/// filled in by the handshake and read-only afterwards.
#[derive(Clone, Debug)]
pub struct Responder {
    pub vendor: VendorExtension,
    pub host: String,
    pub command_data_port: u16,
    pub event_port: u16,
    pub streamer_port: u16,
    pub guid: Uuid,
    pub friendly_name: String,
    pub protocol_version: u32,
}

impl Responder {
    /// A `port` of 0 selects the vendor's customary ports.
    pub fn new(vendor: VendorExtension, host: &str, port: u16) -> Self {
        let (command_data_port, event_port, streamer_port) = if port != 0 {
            (port, port, port)
        } else if vendor == VE_FUJI_PHOTO_FILM {
            (
                fuji::FUJI_COMMAND_DATA_PORT,
                fuji::FUJI_EVENT_PORT,
                fuji::FUJI_STREAMER_PORT,
            )
        } else {
            (DEFAULT_PORT, DEFAULT_PORT, DEFAULT_PORT)
        };

        Self {
            vendor,
            host: host.to_owned(),
            command_data_port,
            event_port,
            streamer_port,
            guid: Uuid::nil(),
            friendly_name: String::new(),
            protocol_version: 0,
        }
    }

    pub fn command_data_address(&self) -> String {
        format!("{}:{}", self.host, self.command_data_port)
    }

    pub fn event_address(&self) -> String {
        format!("{}:{}", self.host, self.event_port)
    }

    pub fn streamer_address(&self) -> String {
        format!("{}:{}", self.host, self.streamer_port)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Closed,
    Dialing,
    CmdDataOpen,
    EventOpen,
    Ready,
    StreamerOpen,
    Closing,
    Failed,
}

/// State the router threads share with the client proper.
pub(crate) struct Shared {
    pub state: Mutex<State>,
    pub failure: Mutex<Option<Failure>>,
    pub subs: Mutex<HashMap<TransactionId, Subscriber>>,
    pub event_subs: Mutex<Vec<EventCallback>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(State::Closed),
            failure: Mutex::new(None),
            subs: Mutex::new(HashMap::new()),
            event_subs: Mutex::new(Vec::new()),
        }
    }

    pub fn failure_error(&self) -> Option<Error> {
        (*lock(&self.failure)).map(Failure::to_error)
    }
}

/// A connection plus the reassembly buffer for whatever the dial sequence has
/// not consumed yet. When the routers take over they inherit the residue.
pub(crate) struct Channel {
    pub tcp: TcpChannel,
    pub assembler: FrameAssembler,
}

impl Channel {
    fn new(tcp: TcpChannel) -> Self {
        Self {
            tcp,
            assembler: FrameAssembler::new(),
        }
    }

    pub fn send(&self, frame: Vec<u8>) -> Result<()> {
        self.tcp.send_frame(frame).map_err(|_| Error::Closed)
    }

    /// Blocks until one complete frame is available or the deadline passes.
    pub fn recv_frame(&mut self, deadline: Instant) -> Result<Vec<u8>> {
        loop {
            if let Some(frame) = self.assembler.next_frame().map_err(Error::from)? {
                return Ok(frame);
            }
            self.fill(deadline)?;
        }
    }

    /// Pulls one transport event into the reassembly buffer.
    pub fn fill(&mut self, deadline: Instant) -> Result<()> {
        use crossbeam_channel::RecvTimeoutError;

        match self.tcp.events().recv_deadline(deadline) {
            Ok(TransportEvent::Segment(segment)) => {
                self.assembler.push(&segment);
                Ok(())
            }
            Ok(TransportEvent::Shutdown(_)) => Err(Error::Closed),
            Ok(TransportEvent::Error(error)) => Err(Error::Transport(error)),
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Closed),
        }
    }
}

/// A PTP/IP Initiator: owns the three connections to one Responder and
/// drives transactions over them.
///
/// Lifecycle: `new` → [`dial`](Self::dial) → operations → [`close`](Self::close).
/// `close` is idempotent and joins every background thread.
pub struct Client {
    initiator: Initiator,
    responder: Responder,
    extensions: VendorExtensions,
    connection_number: u32,
    transaction_id: Mutex<TransactionId>,
    dial_timeout: Duration,
    operation_timeout: Duration,
    keepalive_interval: Duration,
    /// Distinguishes a client at rest from one that has been closed.
    dialed: bool,
    pub(crate) cmd_data: Option<Channel>,
    pub(crate) event: Option<Channel>,
    pub(crate) streamer: Option<Channel>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) cmd_lock: Mutex<()>,
    routers: Vec<JoinOnDrop<()>>,
}

impl Client {
    pub fn new(
        vendor: VendorExtension,
        host: &str,
        port: u16,
        friendly_name: Option<&str>,
        guid: Option<&str>,
    ) -> Result<Self> {
        let initiator = Initiator::new(friendly_name, guid)?;
        let responder = Responder::new(vendor, host, port);
        let extensions = VendorExtensions::for_vendor(vendor);

        Ok(Self {
            initiator,
            responder,
            extensions,
            connection_number: 0,
            transaction_id: Mutex::new(0),
            dial_timeout: io::DEFAULT_DIAL_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            dialed: false,
            cmd_data: None,
            event: None,
            streamer: None,
            shared: Arc::new(Shared::new()),
            cmd_lock: Mutex::new(()),
            routers: Vec::new(),
        })
    }

    pub fn initiator(&self) -> &Initiator {
        &self.initiator
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    pub fn connection_number(&self) -> u32 {
        self.connection_number
    }

    pub fn transaction_id(&self) -> TransactionId {
        *lock(&self.transaction_id)
    }

    pub fn state(&self) -> State {
        *lock(&self.shared.state)
    }

    pub(crate) fn set_state(&self, state: State) {
        *lock(&self.shared.state) = state;
    }

    pub(crate) fn extensions(&self) -> VendorExtensions {
        self.extensions
    }

    pub fn set_command_data_port(&mut self, port: u16) {
        self.responder.command_data_port = port;
    }

    pub fn set_event_port(&mut self, port: u16) {
        self.responder.event_port = port;
    }

    pub fn set_streamer_port(&mut self, port: u16) {
        self.responder.streamer_port = port;
    }

    pub fn set_dial_timeout(&mut self, timeout: Duration) {
        self.dial_timeout = timeout;
    }

    pub fn set_operation_timeout(&mut self, timeout: Duration) {
        self.operation_timeout = timeout;
    }

    pub fn set_keepalive_interval(&mut self, interval: Duration) {
        self.keepalive_interval = interval;
    }

    pub(crate) fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Bumps the outgoing transaction counter. 0 is reserved for "unset", so
    /// the wrap skips it.
    pub(crate) fn increment_transaction_id(&self) -> TransactionId {
        let mut transaction_id = lock(&self.transaction_id);
        *transaction_id = match *transaction_id {
            0xFFFF_FFFF => 1,
            current => current + 1,
        };
        *transaction_id
    }

    /// Runs the vendor's handshake across the command/data and event
    /// connections and starts the background routers.
    pub fn dial(&mut self) -> Result<()> {
        if self.state() != State::Closed {
            return Err(Error::NotReady);
        }
        self.dialed = true;
        self.set_state(State::Dialing);

        let extensions = self.extensions;
        if let Err(error) = extensions.cmd_data_init(self) {
            self.fail();
            return Err(error);
        }
        self.set_state(State::CmdDataOpen);

        if let Err(error) = extensions.event_init(self) {
            self.fail();
            return Err(error);
        }
        self.set_state(State::EventOpen);

        self.start_routers()?;
        self.set_state(State::Ready);
        info!(
            "connected to responder '{}' ({})",
            self.responder.friendly_name, self.responder.guid
        );
        Ok(())
    }

    /// Tears everything down: streamer, event and command/data connections in
    /// that order, then fails pending subscribers and joins the background
    /// threads. Calling it twice is a no-op.
    pub fn close(&mut self) {
        match self.state() {
            State::Closed | State::Closing => return,
            _ => {}
        }
        self.set_state(State::Closing);
        debug!("closing all connections");

        if let Some(channel) = &self.streamer {
            channel.tcp.shutdown();
        }
        if let Some(channel) = &self.event {
            channel.tcp.shutdown();
        }
        if let Some(channel) = &self.cmd_data {
            channel.tcp.shutdown();
        }

        for (_, subscriber) in lock(&self.shared.subs).drain() {
            let _ = subscriber.sender.send(TransactionEvent::Closed);
        }

        self.routers.clear();
        self.streamer = None;
        self.event = None;
        self.cmd_data = None;
        self.set_state(State::Closed);
    }

    /// Registers a callback invoked for every Event packet the Responder
    /// pushes on the event channel.
    pub fn subscribe_events<F>(&self, callback: F)
    where
        F: Fn(&common::packets::EventPacket) + Send + 'static,
    {
        lock(&self.shared.event_subs).push(Box::new(callback));
    }

    /// Opens the streamer connection and hands back the raw live-view byte
    /// stream.
    pub fn open_streamer(&mut self) -> Result<crossbeam_channel::Receiver<Vec<u8>>> {
        if self.state() != State::Ready {
            return Err(self.lifecycle_error());
        }

        let extensions = self.extensions;
        extensions.streamer_init(self)?;

        let channel = self.streamer.as_ref().ok_or(Error::NotReady)?;
        let events = channel.tcp.events().clone();
        let (sender, receiver) = unbounded();
        self.routers.push(JoinOnDrop::new(thread::spawn(move || {
            loop {
                match events.recv() {
                    Ok(TransportEvent::Segment(segment)) => {
                        if sender.send(segment).is_err() {
                            return;
                        }
                    }
                    Ok(TransportEvent::Shutdown(_)) | Ok(TransportEvent::Error(_)) | Err(_) => {
                        return;
                    }
                }
            }
        })));

        self.set_state(State::StreamerOpen);
        Ok(receiver)
    }

    /// Requests the Responder's device information through the vendor hook.
    pub fn get_device_info(&self) -> Result<crate::transaction::DeviceInfo> {
        self.ensure_ready()?;
        self.extensions.get_device_info(self)
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            State::Ready | State::StreamerOpen => Ok(()),
            State::Closing => Err(Error::Closed),
            State::Closed if self.dialed => Err(Error::Closed),
            State::Failed => Err(self.shared.failure_error().unwrap_or(Error::Closed)),
            _ => Err(Error::NotReady),
        }
    }

    fn lifecycle_error(&self) -> Error {
        match self.state() {
            State::Closing | State::Closed => Error::Closed,
            _ => Error::NotReady,
        }
    }

    fn fail(&mut self) {
        self.set_state(State::Failed);
        self.streamer = None;
        self.event = None;
        self.cmd_data = None;
    }

    pub(crate) fn connect_command_data(&mut self) -> Result<()> {
        let address = self.responder.command_data_address();
        let tcp = TcpChannel::connect(&address, self.dial_timeout).map_err(map_dial_error)?;
        debug!("command/data connection established with {address}");
        self.cmd_data = Some(Channel::new(tcp));
        Ok(())
    }

    pub(crate) fn connect_event(&mut self) -> Result<()> {
        let address = self.responder.event_address();
        let tcp = TcpChannel::connect(&address, self.dial_timeout).map_err(map_dial_error)?;
        debug!("event connection established with {address}");
        self.event = Some(Channel::new(tcp));
        Ok(())
    }

    pub(crate) fn connect_streamer(&mut self) -> Result<()> {
        let address = self.responder.streamer_address();
        let tcp = TcpChannel::connect(&address, self.dial_timeout).map_err(map_dial_error)?;
        debug!("streamer connection established with {address}");
        self.streamer = Some(Channel::new(tcp));
        Ok(())
    }

    pub(crate) fn drop_cmd_data(&mut self) {
        warn!("closing command/data connection");
        self.cmd_data = None;
    }

    pub(crate) fn drop_event(&mut self) {
        warn!("closing event connection");
        self.event = None;
    }

    pub(crate) fn cmd_channel_mut(&mut self) -> Result<&mut Channel> {
        self.cmd_data.as_mut().ok_or(Error::NotReady)
    }

    pub(crate) fn event_channel_mut(&mut self) -> Result<&mut Channel> {
        self.event.as_mut().ok_or(Error::NotReady)
    }

    pub(crate) fn cmd_writer(&self) -> Result<FrameWriter> {
        self.cmd_data
            .as_ref()
            .map(|channel| channel.tcp.writer())
            .ok_or(Error::NotReady)
    }

    pub(crate) fn send_cmd_frame(&self, frame: Vec<u8>) -> Result<()> {
        self.cmd_data
            .as_ref()
            .ok_or(Error::NotReady)?
            .send(frame)
    }

    pub(crate) fn send_event_frame(&self, frame: Vec<u8>) -> Result<()> {
        self.event.as_ref().ok_or(Error::NotReady)?.send(frame)
    }

    /// Escape hatch for vendor-specific flows: the raw frames of one
    /// transaction, terminal frame included.
    pub fn operation_request_raw(
        &self,
        code: common::ptp::OperationCode,
        parameters: &[u32],
    ) -> Result<Vec<Vec<u8>>> {
        self.ensure_ready()?;
        self.extensions.operation_request_raw(self, code, parameters)
    }

    /// Dial-phase synchronous read of one generic packet off the
    /// command/data connection. The routers are not running yet.
    pub(crate) fn recv_cmd_packet(&mut self) -> Result<PtpIpPacket> {
        let deadline = Instant::now() + self.operation_timeout;
        let frame = self.cmd_channel_mut()?.recv_frame(deadline)?;
        Ok(PtpIpPacket::decode(&frame)?)
    }

    pub(crate) fn recv_event_packet(&mut self) -> Result<PtpIpPacket> {
        let deadline = Instant::now() + self.operation_timeout;
        let frame = self.event_channel_mut()?.recv_frame(deadline)?;
        Ok(PtpIpPacket::decode(&frame)?)
    }

    pub(crate) fn apply_command_ack(&mut self, ack: InitCommandAckPacket) {
        debug!(
            "responder '{}' assigned connection number {}",
            ack.responder_friendly_name, ack.connection_number
        );
        self.connection_number = ack.connection_number;
        self.responder.guid = ack.responder_guid;
        self.responder.friendly_name = ack.responder_friendly_name;
        self.responder.protocol_version = ack.responder_protocol_version;
    }

    fn start_routers(&mut self) -> Result<()> {
        let cmd = self.cmd_data.as_mut().ok_or(Error::NotReady)?;
        let cmd_events = cmd.tcp.events().clone();
        let cmd_residue = std::mem::take(&mut cmd.assembler);
        let cmd_shutdown = cmd.tcp.shutdown_handle();

        let event = self.event.as_mut().ok_or(Error::NotReady)?;
        let event_events = event.tcp.events().clone();
        let event_residue = std::mem::take(&mut event.assembler);
        let event_shutdown = event.tcp.shutdown_handle();
        let event_writer = event.tcp.writer();

        let context = RouterContext {
            shared: Arc::clone(&self.shared),
            sockets: vec![cmd_shutdown, event_shutdown],
        };

        let extensions = self.extensions;
        self.routers.push(JoinOnDrop::new(thread::spawn({
            let context = context.clone();
            move || router::run_command_router(cmd_events, cmd_residue, context, extensions)
        })));

        let keepalive = self.keepalive_interval;
        self.routers.push(JoinOnDrop::new(thread::spawn(move || {
            router::run_event_router(event_events, event_residue, event_writer, context, keepalive)
        })));

        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

fn map_dial_error(error: std::io::Error) -> Error {
    if error.kind() == std::io::ErrorKind::TimedOut {
        Error::DialTimeout
    } else {
        Error::Transport(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ptp::{VE_FUJI_PHOTO_FILM, VE_GENERIC};

    #[test]
    fn test_new_client_defaults() {
        let guid = "cf2407bc-4b4c-4525-9622-afb30db356df";
        let client = Client::new(VE_GENERIC, "192.168.0.1", 26831, None, Some(guid)).unwrap();

        assert_eq!(client.state(), State::Closed);
        assert_eq!(client.connection_number(), 0);
        assert_eq!(client.transaction_id(), 0);
        assert_eq!(client.initiator().friendly_name, INITIATOR_FRIENDLY_NAME);
        assert_eq!(client.initiator().guid.to_string(), guid);
        assert_eq!(client.responder().vendor, VE_GENERIC);
        assert_eq!(client.responder().command_data_address(), "192.168.0.1:26831");
        assert_eq!(client.responder().event_address(), "192.168.0.1:26831");
        assert_eq!(client.responder().streamer_address(), "192.168.0.1:26831");
        assert_eq!(client.responder().friendly_name, "");
        assert!(client.responder().guid.is_nil());
    }

    #[test]
    fn test_new_client_generates_guid() {
        let client = Client::new(VE_GENERIC, "192.168.0.1", 0, Some("Friendly test"), None).unwrap();
        assert!(!client.initiator().guid.is_nil());
        assert_eq!(client.initiator().friendly_name, "Friendly test");
        assert_eq!(client.responder().command_data_port, DEFAULT_PORT);
    }

    #[test]
    fn test_new_client_rejects_bad_guid() {
        let result = Client::new(VE_GENERIC, "192.168.0.1", 0, None, Some("not-a-guid"));
        assert!(matches!(result, Err(Error::InvalidGuid(_))));
    }

    #[test]
    fn test_fuji_default_ports() {
        let client = Client::new(VE_FUJI_PHOTO_FILM, "192.168.0.1", 0, None, None).unwrap();
        assert_eq!(client.responder().command_data_address(), "192.168.0.1:55740");
        assert_eq!(client.responder().event_address(), "192.168.0.1:55741");
        assert_eq!(client.responder().streamer_address(), "192.168.0.1:55742");
    }

    #[test]
    fn test_set_ports() {
        let mut client = Client::new(VE_GENERIC, "192.168.0.1", 55286, None, None).unwrap();
        assert_eq!(client.responder().command_data_address(), "192.168.0.1:55286");

        client.set_command_data_port(55740);
        client.set_event_port(55741);
        client.set_streamer_port(55742);
        assert_eq!(client.responder().command_data_address(), "192.168.0.1:55740");
        assert_eq!(client.responder().event_address(), "192.168.0.1:55741");
        assert_eq!(client.responder().streamer_address(), "192.168.0.1:55742");
    }

    #[test]
    fn test_increment_transaction_id() {
        let client = Client::new(VE_GENERIC, "192.168.0.1", 0, None, None).unwrap();

        assert_eq!(client.transaction_id(), 0);
        assert_eq!(client.increment_transaction_id(), 1);
        assert_eq!(client.increment_transaction_id(), 2);
        assert_eq!(client.transaction_id(), 2);
    }

    #[test]
    fn test_transaction_id_wrap_skips_zero() {
        let client = Client::new(VE_GENERIC, "192.168.0.1", 0, None, None).unwrap();

        *lock(&client.transaction_id) = 0xFFFF_FFFE;
        assert_eq!(client.increment_transaction_id(), 0xFFFF_FFFF);
        assert_eq!(client.increment_transaction_id(), 1);
    }

    #[test]
    fn test_subscription_is_unique_per_transaction() {
        let client = Client::new(VE_GENERIC, "192.168.0.1", 0, None, None).unwrap();

        let _first = client.subscribe(55, false);
        let _second = client.subscribe(55, false);
        assert_eq!(lock(&client.shared.subs).len(), 1);

        client.unsubscribe(55);
        assert!(lock(&client.shared.subs).is_empty());
    }

    #[test]
    fn test_operations_require_ready_state() {
        let client = Client::new(VE_GENERIC, "192.168.0.1", 0, None, None).unwrap();
        assert!(matches!(
            client.operation_request(
                common::ptp::OC_GET_DEVICE_INFO,
                &[],
                common::packets::DataPhase::NoDataOrDataIn,
                None,
            ),
            Err(Error::NotReady)
        ));
    }
}
