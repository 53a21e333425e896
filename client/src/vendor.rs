//! Vendor-extension dispatch.
//!
//! Every hook defaults to the generic base-standard behavior; a vendor entry
//! overrides the ones its devices deviate on. The set of dialects is closed,
//! so dispatch is a plain match over a copyable tag, chosen at client
//! construction from the Responder's vendor extension and frozen for the
//! session.

use crate::client::Client;
use crate::error::{Error, Result};
use crate::fuji;
use crate::transaction::DeviceInfo;
use common::packets::fuji::{FujiInitCommandRequestPacket, FujiOperationDataPacket};
use common::packets::{
    CancelPacket, DataPacket, DataPhase, EndDataPacket, InitCommandRequestPacket,
    InitEventRequestPacket, OperationRequestPacket, PtpIpPacket, StartDataPacket,
};
use common::ptp::{self, OperationCode, TransactionId, VendorExtension};
use log::{debug, error};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VendorExtensions {
    Generic,
    Fuji,
}

impl VendorExtensions {
    pub fn for_vendor(vendor: VendorExtension) -> Self {
        match vendor {
            ptp::VE_FUJI_PHOTO_FILM => Self::Fuji,
            _ => Self::Generic,
        }
    }

    /// Runs the InitCommand handshake on a fresh command/data connection.
    pub(crate) fn cmd_data_init(self, client: &mut Client) -> Result<()> {
        match self {
            Self::Generic => init_command_data_conn(client),
            Self::Fuji => fuji::init_command_data_conn(client),
        }
    }

    /// Runs the InitEvent handshake. Vendors whose event channel needs no
    /// application-layer init return `None` from
    /// [`new_event_init_packet`](Self::new_event_init_packet) and only the
    /// TCP connection is made.
    pub(crate) fn event_init(self, client: &mut Client) -> Result<()> {
        init_event_conn(client)
    }

    pub(crate) fn streamer_init(self, client: &mut Client) -> Result<()> {
        client.connect_streamer()
    }

    /// Builds the vendor's equivalent of InitCommandRequest.
    pub(crate) fn new_cmd_data_init_packet(
        self,
        guid: Uuid,
        friendly_name: &str,
    ) -> Result<Vec<u8>> {
        let frame = match self {
            Self::Generic => {
                PtpIpPacket::InitCommandRequest(InitCommandRequestPacket::new(guid, friendly_name))
                    .to_frame()?
            }
            Self::Fuji => FujiInitCommandRequestPacket::new(guid, friendly_name).to_frame()?,
        };
        Ok(frame)
    }

    /// `None` means the event channel needs no application-layer init.
    pub(crate) fn new_event_init_packet(
        self,
        connection_number: u32,
    ) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Generic => Ok(Some(
                PtpIpPacket::InitEventRequest(InitEventRequestPacket { connection_number })
                    .to_frame()?,
            )),
            Self::Fuji => Ok(None),
        }
    }

    /// Both dialects answer GetDeviceInfo as a plain transaction; the folded
    /// Fuji framing is applied underneath by the request builder.
    pub(crate) fn get_device_info(self, client: &Client) -> Result<DeviceInfo> {
        let (response, dataset) = client.operation_request(
            ptp::OC_GET_DEVICE_INFO,
            &[],
            DataPhase::NoDataOrDataIn,
            None,
        )?;
        Ok(DeviceInfo { response, dataset })
    }

    /// Escape hatch for raw multi-frame transactions.
    pub(crate) fn operation_request_raw(
        self,
        client: &Client,
        code: OperationCode,
        parameters: &[u32],
    ) -> Result<Vec<Vec<u8>>> {
        client.raw_transaction(code, parameters)
    }

    /// The wire form of one operation request for this dialect.
    ///
    /// Fuji requests always carry the no-data phase in the folded word; an
    /// outgoing payload travels in a separate DataOut-phased message built by
    /// [`build_data_out`](Self::build_data_out).
    pub(crate) fn build_operation_request(
        self,
        code: OperationCode,
        parameters: [u32; 5],
        phase: DataPhase,
        transaction_id: TransactionId,
    ) -> Result<Vec<u8>> {
        let frame = match self {
            Self::Generic => PtpIpPacket::OperationRequest(OperationRequestPacket::new(
                phase,
                code,
                transaction_id,
                parameters,
            ))
            .to_frame()?,
            Self::Fuji => fuji::operation_request_frame(code, parameters, transaction_id)?,
        };
        Ok(frame)
    }

    /// The frames of one outgoing data phase, in send order.
    pub(crate) fn build_data_out(
        self,
        code: OperationCode,
        transaction_id: TransactionId,
        payload: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        match self {
            Self::Generic => {
                let mut frames = vec![PtpIpPacket::StartData(StartDataPacket {
                    transaction_id,
                    total_data_length: payload.len() as u64,
                })
                .to_frame()?];
                // A null object is exactly StartData{0} plus an empty
                // EndData; no Data frame in between.
                if !payload.is_empty() {
                    frames.push(
                        PtpIpPacket::Data(DataPacket {
                            transaction_id,
                            payload: payload.to_vec(),
                        })
                        .to_frame()?,
                    );
                }
                frames.push(
                    PtpIpPacket::EndData(EndDataPacket {
                        transaction_id,
                        payload: Vec::new(),
                    })
                    .to_frame()?,
                );
                Ok(frames)
            }
            Self::Fuji => Ok(vec![FujiOperationDataPacket {
                operation_code: code,
                transaction_id,
                payload: payload.to_vec(),
            }
            .to_frame()?]),
        }
    }

    pub(crate) fn build_cancel(self, transaction_id: TransactionId) -> Result<Vec<u8>> {
        Ok(PtpIpPacket::Cancel(CancelPacket { transaction_id }).to_frame()?)
    }
}

/// Base-standard InitCommand handshake: send the init request, expect the
/// ack, adopt the assigned connection number and the Responder identity.
fn init_command_data_conn(client: &mut Client) -> Result<()> {
    client.connect_command_data()?;

    let frame = client
        .extensions()
        .new_cmd_data_init_packet(client.initiator().guid, &client.initiator().friendly_name)?;
    client.send_cmd_frame(frame)?;

    match client.recv_cmd_packet()? {
        PtpIpPacket::InitCommandAck(ack) => {
            client.apply_command_ack(ack);
            Ok(())
        }
        PtpIpPacket::InitFail(fail) => {
            error!("command/data init failed: {}", fail.reason);
            client.drop_cmd_data();
            Err(Error::HandshakeRejected(fail.reason))
        }
        other => {
            client.drop_cmd_data();
            Err(Error::UnexpectedPacket(other.name()))
        }
    }
}

/// Base-standard InitEvent handshake, reusing the connection number from the
/// command ack. The transaction counter starts at 1 once the ack arrives.
fn init_event_conn(client: &mut Client) -> Result<()> {
    client.connect_event()?;

    let frame = match client
        .extensions()
        .new_event_init_packet(client.connection_number())?
    {
        Some(frame) => frame,
        None => {
            debug!("no further event channel init required");
            return Ok(());
        }
    };
    client.send_event_frame(frame)?;

    match client.recv_event_packet()? {
        PtpIpPacket::InitEventAck => {
            client.increment_transaction_id();
            Ok(())
        }
        PtpIpPacket::InitFail(fail) => {
            error!("event init failed: {}", fail.reason);
            client.drop_event();
            Err(Error::HandshakeRejected(fail.reason))
        }
        other => {
            client.drop_event();
            Err(Error::UnexpectedPacket(other.name()))
        }
    }
}
