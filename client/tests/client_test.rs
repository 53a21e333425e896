mod mock_responder;

use client::{Client, Error, State};
use common::packets::{DataPhase, FailReason, PtpIpPacket};
use common::ptp;
use crossbeam_channel::unbounded;
use mock_responder::{
    MockResponder, Personality, DEVICE_INFO_DATASET, OC_BAD_PACKET_TYPE, OC_NEVER_ANSWERED,
    RESPONDER_GUID, RESPONDER_NAME,
};
use std::time::Duration;

fn new_client(mock: &MockResponder, vendor: u16) -> Client {
    let mut client = Client::new(
        vendor,
        "127.0.0.1",
        0,
        Some("tester"),
        Some("67bace55-e7a4-4fbc-8e31-5122ee73a17c"),
    )
    .unwrap();
    client.set_command_data_port(mock.cmd_port);
    client.set_event_port(mock.event_port);
    client.set_operation_timeout(Duration::from_secs(5));
    client
}

#[test]
fn test_dial_generic() {
    let mock = MockResponder::start(Personality::Generic);
    let mut client = new_client(&mock, ptp::VE_GENERIC);

    client.dial().unwrap();

    assert_eq!(client.state(), State::Ready);
    assert_eq!(client.connection_number(), 1);
    // The transaction counter starts at 1 once the event ack lands.
    assert_eq!(client.transaction_id(), 1);
    assert_eq!(client.responder().friendly_name, RESPONDER_NAME);
    assert_eq!(client.responder().guid.to_string(), RESPONDER_GUID);
    assert_eq!(client.responder().protocol_version, 0x0001_0000);

    // The emitted init request carried our identity and version 1.0.
    let packets = mock.cmd_packets();
    match &packets[0] {
        PtpIpPacket::InitCommandRequest(request) => {
            assert_eq!(request.friendly_name, "tester");
            assert_eq!(
                request.guid.to_string(),
                "67bace55-e7a4-4fbc-8e31-5122ee73a17c"
            );
            assert_eq!(request.protocol_version, 0x0001_0000);
        }
        other => panic!("first frame was {}", other.name()),
    }

    client.close();
    assert_eq!(client.state(), State::Closed);
    // Closing twice is a no-op.
    client.close();
    assert_eq!(client.state(), State::Closed);
}

#[test]
fn test_dial_rejected() {
    let mock = MockResponder::start(Personality::Reject);
    let mut client = new_client(&mock, ptp::VE_GENERIC);

    match client.dial() {
        Err(Error::HandshakeRejected(reason)) => {
            assert_eq!(reason, FailReason::RejectedInitiator);
            assert_eq!(reason.to_string(), "rejected: device not allowed");
        }
        other => panic!("expected HandshakeRejected, got {other:?}"),
    }
    assert_eq!(client.state(), State::Failed);
    assert_eq!(client.transaction_id(), 0);
}

#[test]
fn test_get_device_info() {
    let mock = MockResponder::start(Personality::Generic);
    let mut client = new_client(&mock, ptp::VE_GENERIC);
    client.dial().unwrap();

    let info = client.get_device_info().unwrap();
    assert_eq!(info.response.response_code, ptp::RC_OK);
    assert_eq!(info.dataset, DEVICE_INFO_DATASET);
    assert_eq!(client.transaction_id(), 2);
}

#[test]
fn test_operation_before_dial_fails() {
    let client = Client::new(ptp::VE_GENERIC, "192.168.0.1", 0, None, None).unwrap();
    assert!(matches!(client.get_device_info(), Err(Error::NotReady)));
}

#[test]
fn test_operation_after_close_fails() {
    let mock = MockResponder::start(Personality::Generic);
    let mut client = new_client(&mock, ptp::VE_GENERIC);
    client.dial().unwrap();
    client.close();
    assert!(matches!(client.get_device_info(), Err(Error::Closed)));
}

#[test]
fn test_data_out_null_object() {
    let mock = MockResponder::start(Personality::Generic);
    let mut client = new_client(&mock, ptp::VE_GENERIC);
    client.dial().unwrap();

    let (response, data) = client
        .operation_request(
            ptp::OC_SET_DEVICE_PROP_VALUE,
            &[0x5005],
            DataPhase::DataOut,
            None,
        )
        .unwrap();
    assert_eq!(response.response_code, ptp::RC_OK);
    assert!(data.is_empty());

    // Exactly OperationRequest, StartData{0}, EndData{empty}; no Data frame.
    let packets = mock.cmd_packets();
    let transaction: Vec<_> = packets
        .iter()
        .skip_while(|packet| !matches!(packet, PtpIpPacket::OperationRequest(_)))
        .collect();
    assert_eq!(transaction.len(), 3);
    match transaction[0] {
        PtpIpPacket::OperationRequest(request) => {
            assert_eq!(request.data_phase_info, DataPhase::DataOut);
            assert_eq!(request.parameters[0], 0x5005);
        }
        other => panic!("expected OperationRequest, got {}", other.name()),
    }
    match transaction[1] {
        PtpIpPacket::StartData(start) => assert_eq!(start.total_data_length, 0),
        other => panic!("expected StartData, got {}", other.name()),
    }
    match transaction[2] {
        PtpIpPacket::EndData(end) => assert!(end.payload.is_empty()),
        other => panic!("expected EndData, got {}", other.name()),
    }
}

#[test]
fn test_data_out_with_payload() {
    let mock = MockResponder::start(Personality::Generic);
    let mut client = new_client(&mock, ptp::VE_GENERIC);
    client.dial().unwrap();

    client
        .operation_request(
            ptp::OC_SET_DEVICE_PROP_VALUE,
            &[0x5005],
            DataPhase::DataOut,
            Some(b"YELLOW SUBMARINE"),
        )
        .unwrap();

    let packets = mock.cmd_packets();
    let data = packets
        .iter()
        .find_map(|packet| match packet {
            PtpIpPacket::Data(data) => Some(data.payload.clone()),
            _ => None,
        })
        .expect("no Data frame on the wire");
    assert_eq!(data, b"YELLOW SUBMARINE");
}

#[test]
fn test_operation_timeout_emits_cancel() {
    let mock = MockResponder::start(Personality::Generic);
    let mut client = new_client(&mock, ptp::VE_GENERIC);
    client.dial().unwrap();
    client.set_operation_timeout(Duration::from_millis(200));

    match client.operation_request(OC_NEVER_ANSWERED, &[], DataPhase::NoDataOrDataIn, None) {
        Err(Error::Timeout) => {}
        other => panic!("expected Timeout, got {other:?}"),
    }

    // The engine aborted the transaction on the wire.
    std::thread::sleep(Duration::from_millis(200));
    let cancelled = mock.cmd_packets().iter().any(|packet| match packet {
        PtpIpPacket::Cancel(cancel) => cancel.transaction_id == 2,
        _ => false,
    });
    assert!(cancelled, "no Cancel frame after the timeout");

    // An operation timeout is not fatal for the session.
    client.set_operation_timeout(Duration::from_secs(5));
    let info = client.get_device_info().unwrap();
    assert_eq!(info.response.response_code, ptp::RC_OK);
}

#[test]
fn test_unknown_data_phase_rejected_by_closing() {
    let mock = MockResponder::start(Personality::Generic);
    let mut client = new_client(&mock, ptp::VE_GENERIC);
    client.dial().unwrap();

    match client.operation_request(ptp::OC_GET_STORAGE_IDS, &[], DataPhase::Unknown, None) {
        Err(Error::UnsupportedDataPhase) => {}
        other => panic!("expected UnsupportedDataPhase, got {other:?}"),
    }
}

#[test]
fn test_dial_timeout() {
    // Bind and immediately drop a listener so the port refuses connections.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut client = Client::new(ptp::VE_GENERIC, "127.0.0.1", port, None, None).unwrap();
    client.set_dial_timeout(Duration::from_millis(300));

    match client.dial() {
        Err(Error::DialTimeout) => {}
        other => panic!("expected DialTimeout, got {other:?}"),
    }
    assert_eq!(client.state(), State::Failed);
}

#[test]
fn test_unknown_packet_type_is_fatal_on_command_channel() {
    let mock = MockResponder::start(Personality::Generic);
    let mut client = new_client(&mock, ptp::VE_GENERIC);
    client.dial().unwrap();

    match client.operation_request(OC_BAD_PACKET_TYPE, &[], DataPhase::NoDataOrDataIn, None) {
        Err(Error::UnknownPacketType(0x99)) => {}
        other => panic!("expected UnknownPacketType, got {other:?}"),
    }
    assert_eq!(client.state(), State::Failed);
    assert!(client.get_device_info().is_err());
}

#[test]
fn test_concurrent_operations_serialize() {
    let mock = MockResponder::start(Personality::Generic);
    let mut client = new_client(&mock, ptp::VE_GENERIC);
    client.dial().unwrap();

    std::thread::scope(|scope| {
        for _ in 0 .. 2 {
            scope.spawn(|| {
                for _ in 0 .. 3 {
                    client
                        .operation_request(
                            ptp::OC_GET_STORAGE_IDS,
                            &[],
                            DataPhase::NoDataOrDataIn,
                            None,
                        )
                        .unwrap();
                }
            });
        }
    });

    // Wire order must show strictly increasing transaction IDs with no
    // interleaving of requests.
    let ids: Vec<u32> = mock
        .cmd_packets()
        .iter()
        .filter_map(|packet| match packet {
            PtpIpPacket::OperationRequest(request) => Some(request.transaction_id),
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 6);
    for window in ids.windows(2) {
        assert_eq!(window[1], window[0] + 1);
    }
}

#[test]
fn test_operation_request_raw_returns_all_frames() {
    let mock = MockResponder::start(Personality::Generic);
    let mut client = new_client(&mock, ptp::VE_GENERIC);
    client.dial().unwrap();

    let frames = client
        .operation_request_raw(ptp::OC_GET_DEVICE_INFO, &[])
        .unwrap();

    // StartData, Data, EndData, then the terminal response.
    assert_eq!(frames.len(), 4);
    match PtpIpPacket::decode(frames.last().unwrap()).unwrap() {
        PtpIpPacket::OperationResponse(response) => {
            assert_eq!(response.response_code, ptp::RC_OK);
        }
        other => panic!("last frame was {}", other.name()),
    }
    match PtpIpPacket::decode(&frames[1]).unwrap() {
        PtpIpPacket::Data(data) => assert_eq!(data.payload, DEVICE_INFO_DATASET),
        other => panic!("second frame was {}", other.name()),
    }
}

#[test]
fn test_event_dispatch() {
    let mock = MockResponder::start(Personality::Generic);
    let mut client = new_client(&mock, ptp::VE_GENERIC);
    client.dial().unwrap();

    let (sender, receiver) = unbounded();
    client.subscribe_events(move |event| {
        let _ = sender.send((event.event_code, event.parameters.clone()));
    });

    let (code, parameters) = receiver
        .recv_timeout(Duration::from_secs(2))
        .expect("no event delivered");
    assert_eq!(code, ptp::EC_OBJECT_ADDED);
    assert_eq!(parameters, vec![42]);
}

#[test]
fn test_keepalive_probes_idle_event_channel() {
    let mock = MockResponder::start(Personality::Generic);
    let mut client = new_client(&mock, ptp::VE_GENERIC);
    client.set_keepalive_interval(Duration::from_millis(150));
    client.dial().unwrap();

    std::thread::sleep(Duration::from_millis(800));

    assert!(mock.saw_probe_request(), "no probe on the idle event channel");
    // The mock answers probes, so the session must still be alive.
    assert_eq!(client.state(), State::Ready);
    assert!(client.get_device_info().is_ok());
}

#[test]
fn test_fuji_login() {
    let mock = MockResponder::start(Personality::Fuji);
    let mut client = new_client(&mock, ptp::VE_FUJI_PHOTO_FILM);

    client.dial().unwrap();

    assert_eq!(client.state(), State::Ready);
    // OpenSession and the app-version read each consumed a transaction.
    assert_eq!(client.transaction_id(), 2);
    assert_eq!(client.responder().friendly_name, RESPONDER_NAME);
}

#[test]
fn test_fuji_wrong_app_version() {
    let mock = MockResponder::start(Personality::FujiWrongVersion);
    let mut client = new_client(&mock, ptp::VE_FUJI_PHOTO_FILM);

    match client.dial() {
        Err(Error::UnsupportedVendorVersion) => {}
        other => panic!("expected UnsupportedVendorVersion, got {other:?}"),
    }
    assert_eq!(client.state(), State::Failed);
}

#[test]
fn test_fuji_folded_operations() {
    let mock = MockResponder::start(Personality::Fuji);
    let mut client = new_client(&mock, ptp::VE_FUJI_PHOTO_FILM);
    client.dial().unwrap();

    // Plain operation: the end-of-data marker closes it with OK.
    let (response, data) = client
        .operation_request(
            ptp::OC_INITIATE_OPEN_CAPTURE,
            &[],
            DataPhase::NoDataOrDataIn,
            None,
        )
        .unwrap();
    assert_eq!(response.response_code, ptp::RC_OK);
    assert!(data.is_empty());

    // Data-in with an empty payload: announcement then end marker.
    let (response, data) = client
        .operation_request(
            ptp::OC_GET_DEVICE_PROP_DESC,
            &[u32::from(common::packets::fuji::DPC_FUJI_APP_VERSION)],
            DataPhase::NoDataOrDataIn,
            None,
        )
        .unwrap();
    assert_eq!(response.response_code, ptp::RC_OK);
    assert!(data.is_empty());

    // Data-out: request message plus one DataOut-phased payload message.
    let (response, _) = client
        .operation_request(
            ptp::OC_SET_DEVICE_PROP_VALUE,
            &[u32::from(common::packets::fuji::DPC_FUJI_APP_VERSION)],
            DataPhase::DataOut,
            Some(&client::fuji::FUJI_APP_VERSION.to_le_bytes()),
        )
        .unwrap();
    assert_eq!(response.response_code, ptp::RC_OK);
}

#[test]
fn test_fuji_data_in_payload() {
    let mock = MockResponder::start(Personality::Fuji);
    let mut client = new_client(&mock, ptp::VE_FUJI_PHOTO_FILM);
    client.dial().unwrap();

    // The app-version property answers with raw bytes between the
    // announcement and the end marker.
    let (response, data) = client
        .operation_request(
            ptp::OC_GET_DEVICE_PROP_VALUE,
            &[u32::from(common::packets::fuji::DPC_FUJI_APP_VERSION)],
            DataPhase::NoDataOrDataIn,
            None,
        )
        .unwrap();
    assert_eq!(response.response_code, ptp::RC_OK);
    assert_eq!(data, client::fuji::FUJI_APP_VERSION.to_le_bytes());
}
