//! Background demultiplexers, one per connection, started when the session
//! reaches Ready.
//!
//! The command router assembles frames and routes them to the transaction
//! subscribed under their TransactionID. The event router dispatches Event
//! packets to callbacks, answers inbound probes, and probes the Responder
//! itself when the channel goes idle.

use crate::client::{lock, Shared, State};
use crate::error::Failure;
use crate::transaction::TransactionEvent;
use crate::vendor::VendorExtensions;
use common::packets::fuji::{self, FujiOperationResponsePacket};
use common::packets::{self, FrameAssembler, OperationResponsePacket, PtpIpPacket};
use common::ptp::TransactionId;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use io::{FrameWriter, ShutdownHandle, TransportEvent};
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A probe must be answered within this long or the peer is presumed gone.
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub(crate) struct RouterContext {
    pub shared: Arc<Shared>,
    pub sockets: Vec<ShutdownHandle>,
}

impl RouterContext {
    /// Records a fatal failure, tears every connection down and fails all
    /// pending transactions.
    fn fail_session(&self, failure: Failure) {
        error!("fatal session failure: {failure:?}");
        lock(&self.shared.failure).get_or_insert(failure);
        *lock(&self.shared.state) = State::Failed;
        for socket in &self.sockets {
            socket.shutdown();
        }
        self.drain_subscribers();
    }

    /// The transport went away. During a deliberate close this is the
    /// expected end of the router; otherwise it is a session failure.
    fn connection_lost(&self) {
        match *lock(&self.shared.state) {
            State::Closing | State::Closed | State::Failed => return,
            _ => {}
        }
        lock(&self.shared.failure).get_or_insert(Failure::Transport);
        *lock(&self.shared.state) = State::Failed;
        for socket in &self.sockets {
            socket.shutdown();
        }
        self.drain_subscribers();
    }

    fn drain_subscribers(&self) {
        for (_, subscriber) in lock(&self.shared.subs).drain() {
            let _ = subscriber.sender.send(TransactionEvent::Closed);
        }
    }
}

pub(crate) fn run_command_router(
    events: Receiver<TransportEvent>,
    mut assembler: FrameAssembler,
    context: RouterContext,
    extensions: VendorExtensions,
) {
    let mut open_data: Option<TransactionId> = None;

    // The dial phase may have left complete frames in the buffer.
    if let Err(failure) = drain_command(&mut assembler, &context, extensions, &mut open_data) {
        context.fail_session(failure);
        return;
    }

    loop {
        match events.recv() {
            Ok(TransportEvent::Segment(segment)) => {
                assembler.push(&segment);
                if let Err(failure) =
                    drain_command(&mut assembler, &context, extensions, &mut open_data)
                {
                    context.fail_session(failure);
                    return;
                }
            }
            Ok(TransportEvent::Shutdown(_)) => {
                context.connection_lost();
                return;
            }
            Ok(TransportEvent::Error(error)) => {
                debug!("command/data transport error: {error}");
                context.connection_lost();
                return;
            }
            Err(_) => {
                context.connection_lost();
                return;
            }
        }
    }
}

fn drain_command(
    assembler: &mut FrameAssembler,
    context: &RouterContext,
    extensions: VendorExtensions,
    open_data: &mut Option<TransactionId>,
) -> Result<(), Failure> {
    match extensions {
        VendorExtensions::Generic => drain_generic(assembler, context),
        VendorExtensions::Fuji => drain_fuji(assembler, context, open_data),
    }
}

fn drain_generic(assembler: &mut FrameAssembler, context: &RouterContext) -> Result<(), Failure> {
    loop {
        let frame = match assembler.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(_) => return Err(Failure::Malformed),
        };

        // Unknown or unparseable packets on this channel orphan the
        // in-flight transaction, so they end the session.
        let packet = match PtpIpPacket::decode(&frame) {
            Ok(packet) => packet,
            Err(packets::Error::UnknownPacketType(raw)) => {
                return Err(Failure::UnknownPacketType(raw))
            }
            Err(_) => return Err(Failure::Malformed),
        };

        match packet {
            PtpIpPacket::OperationResponse(response) => {
                finish_transaction(context, response.transaction_id, response, frame);
            }
            PtpIpPacket::StartData(packet) => {
                route(
                    context,
                    packet.transaction_id,
                    TransactionEvent::Start(packet.total_data_length),
                    frame,
                );
            }
            PtpIpPacket::Data(packet) => {
                route(
                    context,
                    packet.transaction_id,
                    TransactionEvent::Data(packet.payload.clone()),
                    frame,
                );
            }
            PtpIpPacket::EndData(packet) => {
                route(
                    context,
                    packet.transaction_id,
                    TransactionEvent::End(packet.payload.clone()),
                    frame,
                );
            }
            PtpIpPacket::Cancel(packet) => {
                if let Some(subscriber) =
                    lock(&context.shared.subs).remove(&packet.transaction_id)
                {
                    let _ = subscriber.sender.send(TransactionEvent::Cancelled);
                }
            }
            PtpIpPacket::ProbeRequest | PtpIpPacket::ProbeResponse => {
                debug!("ignoring probe on the command/data connection");
            }
            other => warn!("unexpected {} on the command/data connection", other.name()),
        }
    }
}

fn drain_fuji(
    assembler: &mut FrameAssembler,
    context: &RouterContext,
    open_data: &mut Option<TransactionId>,
) -> Result<(), Failure> {
    loop {
        // Inside a data phase the bytes are unframed; everything up to the
        // end-of-data marker is payload.
        if let Some(transaction_id) = *open_data {
            match fuji::find_end_of_data(assembler.buffered(), transaction_id) {
                Some((payload_len, end)) => {
                    let payload = assembler.drain(payload_len);
                    let end_frame = assembler.drain(fuji::END_OF_DATA_SIZE);
                    *open_data = None;

                    route(
                        context,
                        transaction_id,
                        TransactionEvent::Data(payload.clone()),
                        payload,
                    );
                    finish_transaction(
                        context,
                        transaction_id,
                        convert_fuji_response(&end),
                        end_frame,
                    );
                }
                None => return Ok(()),
            }
            continue;
        }

        let frame = match assembler.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(_) => return Err(Failure::Malformed),
        };
        let response = match FujiOperationResponsePacket::from_frame(&frame) {
            Ok(response) => response,
            Err(_) => return Err(Failure::Malformed),
        };

        if response.announces_data() {
            route(
                context,
                response.transaction_id,
                TransactionEvent::Start(0),
                frame,
            );
            *open_data = Some(response.transaction_id);
        } else {
            finish_transaction(
                context,
                response.transaction_id,
                convert_fuji_response(&response),
                frame,
            );
        }
    }
}

fn convert_fuji_response(response: &FujiOperationResponsePacket) -> OperationResponsePacket {
    OperationResponsePacket {
        response_code: response.response_code,
        transaction_id: response.transaction_id,
        parameters: response.parameters.clone(),
    }
}

/// Delivers a non-terminal event, or the raw frame for raw subscriptions.
fn route(
    context: &RouterContext,
    transaction_id: TransactionId,
    event: TransactionEvent,
    frame: Vec<u8>,
) {
    let subs = lock(&context.shared.subs);
    match subs.get(&transaction_id) {
        Some(subscriber) => {
            let event = if subscriber.raw {
                TransactionEvent::Raw(frame)
            } else {
                event
            };
            let _ = subscriber.sender.send(event);
        }
        None => warn!("no subscriber for transaction {transaction_id}"),
    }
}

/// Delivers the terminal response and removes the subscription. Raw
/// subscriptions get the frame and end when their sender drops here.
fn finish_transaction(
    context: &RouterContext,
    transaction_id: TransactionId,
    response: OperationResponsePacket,
    frame: Vec<u8>,
) {
    match lock(&context.shared.subs).remove(&transaction_id) {
        Some(subscriber) => {
            let event = if subscriber.raw {
                TransactionEvent::Raw(frame)
            } else {
                TransactionEvent::Response(response)
            };
            let _ = subscriber.sender.send(event);
        }
        None => warn!("no subscriber for transaction {transaction_id}"),
    }
}

pub(crate) fn run_event_router(
    events: Receiver<TransportEvent>,
    mut assembler: FrameAssembler,
    writer: FrameWriter,
    context: RouterContext,
    keepalive: Duration,
) {
    let mut outstanding_probe: Option<Instant> = None;

    loop {
        let wait = match outstanding_probe {
            Some(sent) => PROBE_TIMEOUT.saturating_sub(sent.elapsed()),
            None => keepalive,
        };

        match events.recv_timeout(wait) {
            Ok(TransportEvent::Segment(segment)) => {
                assembler.push(&segment);
                process_event_frames(&mut assembler, &context, &writer, &mut outstanding_probe);
            }
            Ok(TransportEvent::Shutdown(_)) => {
                context.connection_lost();
                return;
            }
            Ok(TransportEvent::Error(error)) => {
                debug!("event transport error: {error}");
                context.connection_lost();
                return;
            }
            Err(RecvTimeoutError::Timeout) => match outstanding_probe {
                None => match PtpIpPacket::ProbeRequest.to_frame() {
                    Ok(frame) => {
                        debug!("event channel idle, probing responder");
                        if writer.send(frame).is_err() {
                            context.connection_lost();
                            return;
                        }
                        outstanding_probe = Some(Instant::now());
                    }
                    Err(error) => warn!("failed to build probe request: {error}"),
                },
                Some(sent) if sent.elapsed() >= PROBE_TIMEOUT => {
                    warn!("responder did not answer probe request within {PROBE_TIMEOUT:?}");
                    context.fail_session(Failure::PeerUnresponsive);
                    return;
                }
                Some(_) => {}
            },
            Err(RecvTimeoutError::Disconnected) => {
                context.connection_lost();
                return;
            }
        }
    }
}

fn process_event_frames(
    assembler: &mut FrameAssembler,
    context: &RouterContext,
    writer: &FrameWriter,
    outstanding_probe: &mut Option<Instant>,
) {
    loop {
        let frame = match assembler.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(error) => {
                // The length word itself is broken; the rest of the buffer
                // cannot be trusted either.
                warn!("discarding unframeable event data: {error}");
                assembler.drain(usize::MAX);
                return;
            }
        };

        match PtpIpPacket::decode(&frame) {
            Ok(PtpIpPacket::Event(event)) => {
                debug!("event {:#06x} for transaction {}", event.event_code, event.transaction_id);
                for callback in lock(&context.shared.event_subs).iter() {
                    callback(&event);
                }
            }
            Ok(PtpIpPacket::ProbeRequest) => {
                if let Ok(frame) = PtpIpPacket::ProbeResponse.to_frame() {
                    let _ = writer.send(frame);
                }
            }
            Ok(PtpIpPacket::ProbeResponse) => {
                *outstanding_probe = None;
            }
            Ok(other) => warn!("unexpected {} on the event connection", other.name()),
            // Unknown event packets are dropped, not fatal; vendors add
            // their own and the session survives without them.
            Err(packets::Error::UnknownPacketType(raw)) => {
                warn!("dropping unknown event packet type {raw:#010x}");
            }
            Err(error) => warn!("dropping malformed event frame: {error}"),
        }
    }
}
