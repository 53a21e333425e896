//! A loopback Responder double: accepts the command/data and event
//! connections and plays back canned behaviors, generic or Fuji flavored.

use client::fuji::FUJI_APP_VERSION;
use common::packets::fuji::{unfold_packet_type, FujiOperationResponsePacket};
use common::packets::{
    DataPacket, DataPhase, EndDataPacket, EventPacket, FailReason, InitCommandAckPacket,
    InitFailPacket, OperationResponsePacket, PacketType, PtpIpPacket, StartDataPacket,
};
use common::ptp;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const RESPONDER_GUID: &str = "7c946ae4-6d6a-4589-90ed-d059f8cc426b";
pub const RESPONDER_NAME: &str = "mock responder";
pub const DEVICE_INFO_DATASET: &[u8] = b"mock device info dataset";

/// Operation the generic mock never answers, to exercise timeouts.
pub const OC_NEVER_ANSWERED: u16 = 0x9999;
/// Operation answered with a frame of an unregistered packet type.
pub const OC_BAD_PACKET_TYPE: u16 = 0x9998;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Personality {
    Generic,
    Reject,
    Fuji,
    FujiWrongVersion,
}

pub struct MockResponder {
    pub cmd_port: u16,
    pub event_port: u16,
    pub cmd_frames: Arc<Mutex<Vec<Vec<u8>>>>,
    pub event_frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockResponder {
    pub fn start(personality: Personality) -> Self {
        let cmd_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let event_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let cmd_port = cmd_listener.local_addr().unwrap().port();
        let event_port = event_listener.local_addr().unwrap().port();

        let cmd_frames = Arc::new(Mutex::new(Vec::new()));
        let event_frames = Arc::new(Mutex::new(Vec::new()));

        thread::spawn({
            let frames = Arc::clone(&cmd_frames);
            move || {
                if let Ok((stream, _)) = cmd_listener.accept() {
                    match personality {
                        Personality::Generic => serve_generic_cmd(stream, frames, false),
                        Personality::Reject => serve_generic_cmd(stream, frames, true),
                        Personality::Fuji => serve_fuji_cmd(stream, frames, false),
                        Personality::FujiWrongVersion => serve_fuji_cmd(stream, frames, true),
                    }
                }
            }
        });

        thread::spawn({
            let frames = Arc::clone(&event_frames);
            move || {
                if let Ok((stream, _)) = event_listener.accept() {
                    serve_event(stream, frames);
                }
            }
        });

        Self {
            cmd_port,
            event_port,
            cmd_frames,
            event_frames,
        }
    }

    /// Decoded generic packets seen on the command/data connection.
    pub fn cmd_packets(&self) -> Vec<PtpIpPacket> {
        self.cmd_frames
            .lock()
            .unwrap()
            .iter()
            .filter_map(|frame| PtpIpPacket::decode(frame).ok())
            .collect()
    }

    pub fn saw_probe_request(&self) -> bool {
        self.event_frames
            .lock()
            .unwrap()
            .iter()
            .any(|frame| matches!(PtpIpPacket::decode(frame), Ok(PtpIpPacket::ProbeRequest)))
    }
}

fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header)?;
    let length = u32::from_le_bytes(header) as usize;
    let mut frame = vec![0u8; length.max(4)];
    frame[0 .. 4].copy_from_slice(&header);
    stream.read_exact(&mut frame[4 ..])?;
    Ok(frame)
}

fn send(stream: &mut TcpStream, packet: PtpIpPacket) {
    let _ = stream.write_all(&packet.to_frame().unwrap());
}

fn command_ack() -> PtpIpPacket {
    PtpIpPacket::InitCommandAck(InitCommandAckPacket {
        connection_number: 1,
        responder_guid: RESPONDER_GUID.parse().unwrap(),
        responder_friendly_name: RESPONDER_NAME.to_owned(),
        responder_protocol_version: 0x0001_0000,
    })
}

fn serve_generic_cmd(mut stream: TcpStream, frames: Arc<Mutex<Vec<Vec<u8>>>>, reject: bool) {
    loop {
        let frame = match read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        frames.lock().unwrap().push(frame.clone());

        let packet = match PtpIpPacket::decode(&frame) {
            Ok(packet) => packet,
            Err(_) => continue,
        };

        match packet {
            PtpIpPacket::InitCommandRequest(_) => {
                if reject {
                    send(
                        &mut stream,
                        PtpIpPacket::InitFail(InitFailPacket {
                            reason: FailReason::RejectedInitiator,
                        }),
                    );
                    return;
                }
                send(&mut stream, command_ack());
            }
            PtpIpPacket::OperationRequest(request) => {
                let transaction_id = request.transaction_id;
                if request.data_phase_info == DataPhase::DataOut {
                    // The response waits for the initiator's EndData.
                    continue;
                }
                if request.data_phase_info == DataPhase::Unknown {
                    // Devices of limited capability may close the connection
                    // on the unknown data phase; act like one.
                    return;
                }
                match request.operation_code {
                    ptp::OC_GET_DEVICE_INFO => {
                        send(
                            &mut stream,
                            PtpIpPacket::StartData(StartDataPacket {
                                transaction_id,
                                total_data_length: DEVICE_INFO_DATASET.len() as u64,
                            }),
                        );
                        send(
                            &mut stream,
                            PtpIpPacket::Data(DataPacket {
                                transaction_id,
                                payload: DEVICE_INFO_DATASET.to_vec(),
                            }),
                        );
                        send(
                            &mut stream,
                            PtpIpPacket::EndData(EndDataPacket {
                                transaction_id,
                                payload: Vec::new(),
                            }),
                        );
                        send(
                            &mut stream,
                            PtpIpPacket::OperationResponse(OperationResponsePacket::new(
                                ptp::RC_OK,
                                transaction_id,
                            )),
                        );
                    }
                    OC_NEVER_ANSWERED => {}
                    OC_BAD_PACKET_TYPE => {
                        let mut bogus = Vec::new();
                        bogus.extend_from_slice(&12u32.to_le_bytes());
                        bogus.extend_from_slice(&0x99u32.to_le_bytes());
                        bogus.extend_from_slice(&transaction_id.to_le_bytes());
                        let _ = stream.write_all(&bogus);
                    }
                    _ => {
                        send(
                            &mut stream,
                            PtpIpPacket::OperationResponse(OperationResponsePacket::new(
                                ptp::RC_OK,
                                transaction_id,
                            )),
                        );
                    }
                }
            }
            PtpIpPacket::EndData(end) => {
                // Completes an initiator-driven data-out phase.
                send(
                    &mut stream,
                    PtpIpPacket::OperationResponse(OperationResponsePacket::new(
                        ptp::RC_OK,
                        end.transaction_id,
                    )),
                );
            }
            _ => {}
        }
    }
}

fn serve_fuji_cmd(mut stream: TcpStream, frames: Arc<Mutex<Vec<Vec<u8>>>>, wrong_version: bool) {
    loop {
        let frame = match read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        frames.lock().unwrap().push(frame.clone());
        if frame.len() < 8 {
            continue;
        }

        let word = u32::from_le_bytes(frame[4 .. 8].try_into().unwrap());
        if word == PacketType::InitCommandRequest as u32 {
            send(&mut stream, command_ack());
            continue;
        }

        // The folded type word: operation code high, data phase low.
        let (code, phase) = unfold_packet_type(word);
        if frame.len() < 12 {
            continue;
        }
        let transaction_id = u32::from_le_bytes(frame[8 .. 12].try_into().unwrap());

        match (code, u32::from(phase)) {
            (ptp::OC_OPEN_SESSION, 1) => send_fuji_end_of_data(&mut stream, transaction_id),
            (ptp::OC_GET_DEVICE_PROP_VALUE, 1) => {
                send_fuji(
                    &mut stream,
                    FujiOperationResponsePacket::new(DataPhase::DataOut, ptp::RC_OK, transaction_id),
                );
                let version = if wrong_version {
                    0x0001_0000u32
                } else {
                    FUJI_APP_VERSION
                };
                // The value travels as raw unframed bytes before the end
                // marker, like the real camera sends it.
                let _ = stream.write_all(&version.to_le_bytes());
                send_fuji_end_of_data(&mut stream, transaction_id);
            }
            (ptp::OC_GET_DEVICE_PROP_DESC, 1) => {
                send_fuji(
                    &mut stream,
                    FujiOperationResponsePacket::new(DataPhase::DataOut, ptp::RC_OK, transaction_id),
                );
                send_fuji_end_of_data(&mut stream, transaction_id);
            }
            (ptp::OC_INITIATE_OPEN_CAPTURE, 1) => send_fuji_end_of_data(&mut stream, transaction_id),
            // SetDevicePropValue arrives as two messages; only the second
            // (DataOut phased) one gets the response.
            (ptp::OC_SET_DEVICE_PROP_VALUE, 2) => send_fuji_end_of_data(&mut stream, transaction_id),
            _ => {}
        }
    }
}

fn send_fuji(stream: &mut TcpStream, packet: FujiOperationResponsePacket) {
    let _ = stream.write_all(&packet.to_frame().unwrap());
}

fn send_fuji_end_of_data(stream: &mut TcpStream, transaction_id: u32) {
    send_fuji(stream, FujiOperationResponsePacket::end_of_data(transaction_id));
}

fn serve_event(mut stream: TcpStream, frames: Arc<Mutex<Vec<Vec<u8>>>>) {
    loop {
        let frame = match read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        frames.lock().unwrap().push(frame.clone());

        match PtpIpPacket::decode(&frame) {
            Ok(PtpIpPacket::InitEventRequest(_)) => {
                send(&mut stream, PtpIpPacket::InitEventAck);
                // Push one event shortly after the session settles.
                let mut push = stream.try_clone().unwrap();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(300));
                    let _ = push.write_all(
                        &PtpIpPacket::Event(EventPacket {
                            event_code: ptp::EC_OBJECT_ADDED,
                            transaction_id: 0,
                            parameters: vec![42],
                        })
                        .to_frame()
                        .unwrap(),
                    );
                });
            }
            Ok(PtpIpPacket::ProbeRequest) => send(&mut stream, PtpIpPacket::ProbeResponse),
            _ => {}
        }
    }
}
