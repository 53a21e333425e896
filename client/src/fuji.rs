//! Fuji dialect: folded command framing and the application-level session
//! login that Fuji cameras require on top of the Init handshake.

use crate::client::{Channel, Client};
use crate::error::{Error, Result};
use crate::transaction::pad_parameters;
use common::packets::fuji::{
    find_end_of_data, FujiInitCommandRequestPacket, FujiOperationRequestPacket,
    FujiOperationResponsePacket, DPC_FUJI_APP_VERSION, END_OF_DATA_SIZE,
};
use common::packets::{DataPhase, PtpIpPacket};
use common::ptp::{self, OperationCode, TransactionId};
use log::{debug, error, warn};
use std::time::Instant;

/// Ports Fuji cameras customarily listen on.
pub const FUJI_COMMAND_DATA_PORT: u16 = 55740;
pub const FUJI_EVENT_PORT: u16 = 55741;
pub const FUJI_STREAMER_PORT: u16 = 55742;

/// Camera application version this client speaks. The camera reports its own
/// through `DPC_FUJI_APP_VERSION`; anything else ends the session.
pub const FUJI_APP_VERSION: u32 = 0x0002_0001;

/// Fuji's InitCommand handshake plus session login: init without a protocol
/// version, OpenSession, then the application-version check.
pub(crate) fn init_command_data_conn(client: &mut Client) -> Result<()> {
    client.connect_command_data()?;

    let frame = FujiInitCommandRequestPacket::new(
        client.initiator().guid,
        &client.initiator().friendly_name,
    )
    .to_frame()?;
    client.send_cmd_frame(frame)?;

    match client.recv_cmd_packet()? {
        PtpIpPacket::InitCommandAck(ack) => client.apply_command_ack(ack),
        PtpIpPacket::InitFail(fail) => {
            error!("fuji command/data init failed: {}", fail.reason);
            client.drop_cmd_data();
            return Err(Error::HandshakeRejected(fail.reason));
        }
        other => {
            client.drop_cmd_data();
            return Err(Error::UnexpectedPacket(other.name()));
        }
    }

    let transaction_id = client.increment_transaction_id();
    let (response, _) = command(client, ptp::OC_OPEN_SESSION, &[1], transaction_id)?;
    if !response.was_successful() {
        client.drop_cmd_data();
        return Err(Error::OperationFailed(response.response_code));
    }

    let transaction_id = client.increment_transaction_id();
    let (response, payload) = command(
        client,
        ptp::OC_GET_DEVICE_PROP_VALUE,
        &[u32::from(DPC_FUJI_APP_VERSION)],
        transaction_id,
    )?;
    if !response.was_successful() {
        client.drop_cmd_data();
        return Err(Error::OperationFailed(response.response_code));
    }
    if payload.len() < 4 {
        client.drop_cmd_data();
        return Err(Error::MalformedFrame);
    }

    let version = u32::from_le_bytes(payload[0 .. 4].try_into().unwrap());
    if version != FUJI_APP_VERSION {
        warn!("camera application version {version:#010x}, supported is {FUJI_APP_VERSION:#010x}");
        client.drop_cmd_data();
        return Err(Error::UnsupportedVendorVersion);
    }

    debug!("fuji session established, camera application version {version:#010x}");
    Ok(())
}

pub(crate) fn operation_request_frame(
    code: OperationCode,
    parameters: [u32; 5],
    transaction_id: TransactionId,
) -> Result<Vec<u8>> {
    Ok(
        FujiOperationRequestPacket::new(DataPhase::NoDataOrDataIn, code, transaction_id, parameters)
            .to_frame()?,
    )
}

/// Synchronous folded transaction used while the routers are not running
/// yet (the session login happens mid-dial).
fn command(
    client: &mut Client,
    code: OperationCode,
    parameters: &[u32],
    transaction_id: TransactionId,
) -> Result<(FujiOperationResponsePacket, Vec<u8>)> {
    let frame = operation_request_frame(code, pad_parameters(parameters), transaction_id)?;
    client.send_cmd_frame(frame)?;

    let deadline = Instant::now() + client.operation_timeout();
    let channel = client.cmd_channel_mut()?;
    let frame = channel.recv_frame(deadline)?;
    let response = FujiOperationResponsePacket::from_frame(&frame)?;
    if response.transaction_id != transaction_id {
        return Err(Error::UnexpectedPacket("FujiOperationResponse"));
    }

    if response.announces_data() {
        let (payload, end) = recv_data_in(channel, transaction_id, deadline)?;
        Ok((end, payload))
    } else {
        Ok((response, Vec::new()))
    }
}

/// Collects the raw data-in bytes of one transaction up to its end-of-data
/// marker. The payload is not framed, so this works on the reassembly buffer
/// directly.
fn recv_data_in(
    channel: &mut Channel,
    transaction_id: TransactionId,
    deadline: Instant,
) -> Result<(Vec<u8>, FujiOperationResponsePacket)> {
    loop {
        if let Some((payload_len, end)) = find_end_of_data(channel.assembler.buffered(), transaction_id)
        {
            let payload = channel.assembler.drain(payload_len);
            channel.assembler.drain(END_OF_DATA_SIZE);
            return Ok((payload, end));
        }
        channel.fill(deadline)?;
    }
}
