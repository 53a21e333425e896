//! The transaction engine: issues operation requests, orchestrates the data
//! phases and waits for the matching response through a per-transaction
//! subscription.

use crate::client::{lock, Client};
use crate::error::{Error, Result};
use common::packets::{DataPhase, EventPacket, OperationResponsePacket};
use common::ptp::{self, OperationCode, TransactionId};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Instant;

/// What the command router delivers to the caller waiting on a transaction.
#[derive(Debug)]
pub(crate) enum TransactionEvent {
    /// Terminal verdict; ends the subscription.
    Response(OperationResponsePacket),
    /// A data-in phase opened with the announced total length.
    Start(u64),
    Data(Vec<u8>),
    End(Vec<u8>),
    /// The peer cancelled the transaction.
    Cancelled,
    /// Raw frame forwarding for escape-hatch transactions.
    Raw(Vec<u8>),
    /// The transport went away underneath the transaction.
    Closed,
}

pub(crate) struct Subscriber {
    pub sender: Sender<TransactionEvent>,
    /// Forward raw frames instead of decoded events.
    pub raw: bool,
}

pub(crate) type EventCallback = Box<dyn Fn(&EventPacket) + Send>;

/// Result of a GetDeviceInfo operation: the Responder's verdict plus the raw
/// DeviceInfo dataset, if the device produced one.
#[derive(Debug)]
pub struct DeviceInfo {
    pub response: OperationResponsePacket,
    pub dataset: Vec<u8>,
}

impl Client {
    /// Issues one PTP operation and blocks until its response arrives.
    ///
    /// `parameters` may hold up to five values; missing slots are sent as
    /// zero. For `DataPhase::DataOut` the payload in `data_out` is shipped
    /// between `StartData` and `EndData`; an empty (or absent) payload is
    /// transferred as the null object: `StartData{0}` directly followed by an
    /// empty `EndData`. Returns the response packet and any data-in payload.
    pub fn operation_request(
        &self,
        code: OperationCode,
        parameters: &[u32],
        phase: DataPhase,
        data_out: Option<&[u8]>,
    ) -> Result<(OperationResponsePacket, Vec<u8>)> {
        self.ensure_ready()?;

        // One transaction in flight per channel; callers queue here.
        let guard = lock(&self.cmd_lock);
        let transaction_id = self.increment_transaction_id();
        let receiver = self.subscribe(transaction_id, false);
        let result = self.run_transaction(code, parameters, phase, data_out, transaction_id, &receiver);
        self.unsubscribe(transaction_id);
        drop(guard);
        result
    }

    /// Engine half of the raw escape hatch: issues the request and returns
    /// every raw frame of the transaction, terminal frame included.
    pub(crate) fn raw_transaction(
        &self,
        code: OperationCode,
        parameters: &[u32],
    ) -> Result<Vec<Vec<u8>>> {
        let guard = lock(&self.cmd_lock);
        let transaction_id = self.increment_transaction_id();
        let receiver = self.subscribe(transaction_id, true);
        let result = self.run_raw_transaction(code, parameters, transaction_id, &receiver);
        self.unsubscribe(transaction_id);
        drop(guard);
        result
    }

    fn run_transaction(
        &self,
        code: OperationCode,
        parameters: &[u32],
        phase: DataPhase,
        data_out: Option<&[u8]>,
        transaction_id: TransactionId,
        receiver: &Receiver<TransactionEvent>,
    ) -> Result<(OperationResponsePacket, Vec<u8>)> {
        let writer = self.cmd_writer()?;
        let extensions = self.extensions();

        let request =
            extensions.build_operation_request(code, pad_parameters(parameters), phase, transaction_id)?;
        writer.send(request).map_err(|_| Error::Closed)?;

        if phase == DataPhase::DataOut {
            let payload = data_out.unwrap_or_default();
            for frame in extensions.build_data_out(code, transaction_id, payload)? {
                writer.send(frame).map_err(|_| Error::Closed)?;
            }
        }

        let deadline = Instant::now() + self.operation_timeout();
        let mut data = Vec::new();

        loop {
            let event = match receiver.recv_deadline(deadline) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    // Give the Responder a chance to abort cleanly, then
                    // report the timeout.
                    let _ = writer.send(extensions.build_cancel(transaction_id)?);
                    return Err(Error::Timeout);
                }
                Err(RecvTimeoutError::Disconnected) => return Err(Error::Closed),
            };

            match event {
                TransactionEvent::Start(_) => {}
                TransactionEvent::Data(bytes) => data.extend_from_slice(&bytes),
                TransactionEvent::End(bytes) => data.extend_from_slice(&bytes),
                TransactionEvent::Response(response) => {
                    if response.response_code != ptp::RC_OK {
                        return Err(Error::OperationFailed(response.response_code));
                    }
                    return Ok((response, data));
                }
                TransactionEvent::Cancelled => {
                    return Err(Error::OperationFailed(ptp::RC_TRANSACTION_CANCELLED));
                }
                TransactionEvent::Raw(_) => {}
                TransactionEvent::Closed => {
                    return Err(if phase == DataPhase::Unknown {
                        Error::UnsupportedDataPhase
                    } else {
                        self.shared.failure_error().unwrap_or(Error::Closed)
                    });
                }
            }
        }
    }

    fn run_raw_transaction(
        &self,
        code: OperationCode,
        parameters: &[u32],
        transaction_id: TransactionId,
        receiver: &Receiver<TransactionEvent>,
    ) -> Result<Vec<Vec<u8>>> {
        let writer = self.cmd_writer()?;
        let extensions = self.extensions();

        let request = extensions.build_operation_request(
            code,
            pad_parameters(parameters),
            DataPhase::NoDataOrDataIn,
            transaction_id,
        )?;
        writer.send(request).map_err(|_| Error::Closed)?;

        let deadline = Instant::now() + self.operation_timeout();
        let mut frames = Vec::new();

        loop {
            match receiver.recv_deadline(deadline) {
                Ok(TransactionEvent::Raw(frame)) => frames.push(frame),
                Ok(TransactionEvent::Closed) => {
                    return Err(self.shared.failure_error().unwrap_or(Error::Closed))
                }
                Ok(_) => {}
                // The router drops the subscription after the terminal frame.
                Err(RecvTimeoutError::Disconnected) => return Ok(frames),
                Err(RecvTimeoutError::Timeout) => {
                    let _ = writer.send(extensions.build_cancel(transaction_id)?);
                    return Err(Error::Timeout);
                }
            }
        }
    }

    /// Registers the single subscriber for a transaction. IDs are
    /// pre-incremented and never reused while in flight, so the slot is
    /// always fresh.
    pub(crate) fn subscribe(
        &self,
        transaction_id: TransactionId,
        raw: bool,
    ) -> Receiver<TransactionEvent> {
        let (sender, receiver) = unbounded();
        lock(&self.shared.subs).insert(transaction_id, Subscriber { sender, raw });
        receiver
    }

    pub(crate) fn unsubscribe(&self, transaction_id: TransactionId) {
        lock(&self.shared.subs).remove(&transaction_id);
    }
}

/// Copies up to five parameters into the fixed wire slots, zero padding the
/// rest. Excess parameters cannot be expressed on the wire and are ignored.
pub(crate) fn pad_parameters(parameters: &[u32]) -> [u32; 5] {
    let mut padded = [0u32; 5];
    for (slot, value) in padded.iter_mut().zip(parameters) {
        *slot = *value;
    }
    padded
}

#[cfg(test)]
mod tests {
    use super::pad_parameters;

    #[test]
    fn test_pad_parameters_bounds() {
        assert_eq!(pad_parameters(&[]), [0; 5]);
        assert_eq!(pad_parameters(&[1, 2]), [1, 2, 0, 0, 0]);
        assert_eq!(pad_parameters(&[1, 2, 3, 4, 5]), [1, 2, 3, 4, 5]);
        // A sixth parameter has no wire slot and must not shift the others.
        assert_eq!(pad_parameters(&[1, 2, 3, 4, 5, 6]), [1, 2, 3, 4, 5]);
    }
}
