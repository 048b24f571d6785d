//! End-to-end protocol scenarios against the simulated optical bench
//!
//! Each test drives the server state machine through `handle`, exactly as
//! the socket loop does, and checks the replies and the resulting phase.

use approx::assert_relative_eq;
use cvqkd_alice::server::{AliceServer, Flow, Reply};
use cvqkd_alice::{hardware, ProtocolPhase};
use cvqkd_core::protocol::{Code, WireError, PROTOCOL_VERSION};
use cvqkd_core::Config;
use cvqkd_hal::sim::{self, SharedBench};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const CONFIG_TEXT: &str = r#"
serial_number = "alice-test"

[alice.powermeter]
reads = 2
read_interval_ms = 0
settle_ms = 0

[frame.quantum]
modulation = "psk"
modulation_size = 4
variance = 0.01
num_symbols = 1024
symbol_rate = 100e6
roll_off = 0.5
frequency_shift = 150e6
seed = 7

[frame.pilots]
frequencies = [180e6, 200e6]
power_ratios = [0.05, 0.05]

[frame.zadoff_chu]
length = 257
root = 5
"#;

static TEST_ID: AtomicUsize = AtomicUsize::new(0);

fn write_temp_config() -> PathBuf {
    let id = TEST_ID.fetch_add(1, Ordering::SeqCst);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "cvqkd-alice-test-{}-{id}.toml",
        std::process::id()
    ));
    std::fs::write(&path, CONFIG_TEXT).expect("temp config written");
    path
}

fn test_server_unconnected() -> (AliceServer, SharedBench) {
    let config = Config::from_toml(CONFIG_TEXT).expect("test config is valid");
    let (mut bench, state) = sim::bench(99);
    hardware::startup(&mut bench, &config).expect("simulated bench starts");
    let server = AliceServer::new(Arc::new(config), write_temp_config(), bench);
    (server, state)
}

fn test_server() -> (AliceServer, SharedBench) {
    let (mut server, state) = test_server_unconnected();
    // The accept loop would do this for a real peer.
    server.on_peer_connected();
    (server, state)
}

fn send(server: &mut AliceServer, code: Code, payload: Value) -> Vec<Reply> {
    let (replies, _) = server.handle(Ok((code, payload)));
    replies
}

fn expect_single(replies: Vec<Reply>, code: Code) -> Value {
    assert_eq!(replies.len(), 1, "expected one reply, got {replies:?}");
    assert_eq!(replies[0].0, code, "unexpected reply in {replies:?}");
    replies[0].1.clone()
}

fn identify(server: &mut AliceServer) {
    let replies = send(
        server,
        Code::IdentificationRequest,
        json!({ "serial_number": "bob-test", "protocol_version": PROTOCOL_VERSION }),
    );
    expect_single(replies, Code::IdentificationResponse);
}

fn initialize(server: &mut AliceServer) -> Uuid {
    let uuid = Uuid::new_v4();
    let replies = send(
        server,
        Code::InitializationRequest,
        json!({ "frame_uuid": uuid }),
    );
    expect_single(replies, Code::InitializationAccepted);
    uuid
}

fn run_through_acquisition(server: &mut AliceServer) -> Uuid {
    identify(server);
    let uuid = initialize(server);
    expect_single(send(server, Code::QieRequest, Value::Null), Code::QieReady);
    expect_single(
        send(server, Code::QieTrigger, Value::Null),
        Code::QieEmissionStarted,
    );
    expect_single(
        send(server, Code::QieAcquisitionEnded, Value::Null),
        Code::QieEnded,
    );
    uuid
}

fn pe_finished_payload(key_rate: f64) -> Value {
    json!({
        "n_photon": 0.9,
        "transmittance": 0.45,
        "excess_noise": 0.01,
        "electronic_noise": 0.1,
        "eta": 0.8,
        "key_rate": key_rate,
    })
}

#[test]
fn s1_happy_frame() {
    let (mut server, _state) = test_server();
    let uuid = run_through_acquisition(&mut server);
    assert_eq!(server.phase(), ProtocolPhase::AcquisitionEnded);

    // Symbols come back exactly as drawn, in request order.
    let ground_truth = server.frame().unwrap().symbols.clone();
    let value = expect_single(
        send(
            &mut server,
            Code::PeSymbolsRequest,
            json!({ "indices": [0, 7, 1023] }),
        ),
        Code::PeSymbolsResponse,
    );
    let real: Vec<f64> = serde_json::from_value(value["symbols_real"].clone()).unwrap();
    let imag: Vec<f64> = serde_json::from_value(value["symbols_imag"].clone()).unwrap();
    for (k, &index) in [0usize, 7, 1023].iter().enumerate() {
        assert_relative_eq!(real[k], ground_truth[index].re, epsilon = 1e-12);
        assert_relative_eq!(imag[k], ground_truth[index].im, epsilon = 1e-12);
    }

    // The photon number reflects the simulated monitor readings.
    let value = expect_single(
        send(&mut server, Code::PeNphotonRequest, Value::Null),
        Code::PeNphotonResponse,
    );
    assert!(value["n_photon"].as_f64().unwrap() > 0.0);
    assert_eq!(value["suspect"], json!(false));

    let replies = send(&mut server, Code::PeFinished, pe_finished_payload(1e-4));
    expect_single(replies, Code::PeApproved);
    assert_eq!(server.phase(), ProtocolPhase::PeEnded);

    let value = expect_single(
        send(&mut server, Code::FrameEnded, Value::Null),
        Code::FrameEndedAck,
    );
    assert_eq!(value["frame_uuid"], json!(uuid));
    assert_eq!(server.phase(), ProtocolPhase::Authenticated);
    assert!(server.frame().is_none());
}

#[test]
fn s2_out_of_order_code_is_refused_without_mutation() {
    let (mut server, _state) = test_server();
    identify(&mut server);

    let replies = send(&mut server, Code::QieTrigger, Value::Null);
    expect_single(replies, Code::UnexpectedCommand);
    assert_eq!(server.phase(), ProtocolPhase::Authenticated);
    assert!(server.frame().is_none());
}

#[test]
fn s3_zero_key_rate_is_denied_but_phase_advances() {
    let (mut server, _state) = test_server();
    run_through_acquisition(&mut server);

    let replies = send(&mut server, Code::PeFinished, pe_finished_payload(0.0));
    expect_single(replies, Code::PeDenied);
    assert_eq!(server.phase(), ProtocolPhase::PeEnded);
}

#[test]
fn s4_abort_mid_frame_resets_the_state() {
    let (mut server, _state) = test_server();
    identify(&mut server);
    initialize(&mut server);
    expect_single(send(&mut server, Code::QieRequest, Value::Null), Code::QieReady);
    expect_single(
        send(&mut server, Code::QieTrigger, Value::Null),
        Code::QieEmissionStarted,
    );

    let replies = send(
        &mut server,
        Code::Abort,
        json!({ "abort_message": "operator abort" }),
    );
    expect_single(replies, Code::AbortAck);
    assert_eq!(server.phase(), ProtocolPhase::Listening);

    let replies = send(&mut server, Code::QieAcquisitionEnded, Value::Null);
    expect_single(replies, Code::UnexpectedCommand);

    // The abort tore the session down completely: even identification is
    // refused until the peer reconnects.
    let replies = send(
        &mut server,
        Code::IdentificationRequest,
        json!({ "serial_number": "bob-test", "protocol_version": PROTOCOL_VERSION }),
    );
    expect_single(replies, Code::UnexpectedCommand);

    server.on_peer_connected();
    identify(&mut server);
}

#[test]
fn s5_disconnect_resets_and_a_new_peer_starts_from_identification() {
    let (mut server, _state) = test_server();
    identify(&mut server);
    initialize(&mut server);
    expect_single(send(&mut server, Code::QieRequest, Value::Null), Code::QieReady);

    let (replies, flow) = server.handle(Err(WireError::Disconnected));
    assert!(replies.is_empty());
    assert_eq!(flow, Flow::CloseConnection);
    assert_eq!(server.phase(), ProtocolPhase::Listening);
    assert!(server.frame().is_none());

    // The next peer must be accepted and then identify before anything
    // else.
    server.on_peer_connected();
    let replies = send(&mut server, Code::QieRequest, Value::Null);
    expect_single(replies, Code::UnexpectedCommand);
    identify(&mut server);
}

#[test]
fn s6_reload_is_refused_mid_frame_and_accepted_after() {
    let (mut server, _state) = test_server();
    identify(&mut server);
    initialize(&mut server);
    expect_single(send(&mut server, Code::QieRequest, Value::Null), Code::QieReady);

    assert!(server.reload_config().is_err());

    expect_single(
        send(&mut server, Code::FrameEnded, Value::Null),
        Code::FrameEndedAck,
    );
    assert!(server.reload_config().is_ok());
}

#[test]
fn version_mismatch_keeps_the_peer_unauthenticated() {
    let (mut server, _state) = test_server();
    let replies = send(
        &mut server,
        Code::IdentificationRequest,
        json!({ "serial_number": "bob-test", "protocol_version": "0.9" }),
    );
    let value = expect_single(replies, Code::InvalidVersion);
    assert_eq!(value["protocol_version"], json!(PROTOCOL_VERSION));
    assert_eq!(server.phase(), ProtocolPhase::Connected);
}

#[test]
fn authentication_failure_drops_the_authenticated_flag() {
    let (mut server, _state) = test_server();
    identify(&mut server);

    let (replies, flow) = server.handle(Err(WireError::AuthFailure));
    assert_eq!(flow, Flow::Continue);
    expect_single(replies, Code::AuthenticationInvalid);
    assert_eq!(server.phase(), ProtocolPhase::Connected);
}

#[test]
fn unknown_code_and_frame_errors_get_protocol_replies() {
    let (mut server, _state) = test_server();
    identify(&mut server);

    let (replies, _) = server.handle(Err(WireError::UnknownCode(999)));
    expect_single(replies, Code::UnknownCommand);

    let (replies, _) = server.handle(Err(WireError::Malformed("bad json".to_string())));
    let value = expect_single(replies, Code::InvalidContent);
    assert_eq!(value["error_message"], json!("bad json"));
    // Neither error touches the protocol state.
    assert_eq!(server.phase(), ProtocolPhase::Authenticated);
}

#[test]
fn duplicate_state_advancing_codes_are_refused() {
    let (mut server, _state) = test_server();
    identify(&mut server);
    initialize(&mut server);
    expect_single(send(&mut server, Code::QieRequest, Value::Null), Code::QieReady);

    let replies = send(&mut server, Code::QieRequest, Value::Null);
    expect_single(replies, Code::UnexpectedCommand);
    assert_eq!(server.phase(), ProtocolPhase::FramePrepared);
}

#[test]
fn read_only_requests_are_idempotent() {
    let (mut server, _state) = test_server();
    run_through_acquisition(&mut server);

    let first = send(
        &mut server,
        Code::PeSymbolsRequest,
        json!({ "indices": [3, 1, 3] }),
    );
    let second = send(
        &mut server,
        Code::PeSymbolsRequest,
        json!({ "indices": [3, 1, 3] }),
    );
    assert_eq!(first, second);
}

#[test]
fn out_of_range_symbol_indices_are_an_error() {
    let (mut server, _state) = test_server();
    run_through_acquisition(&mut server);

    let replies = send(
        &mut server,
        Code::PeSymbolsRequest,
        json!({ "indices": [0, 4096] }),
    );
    expect_single(replies, Code::PeSymbolsError);
    // The frame survives a bad read request.
    assert_eq!(server.phase(), ProtocolPhase::AcquisitionEnded);
}

#[test]
fn ec_and_pa_are_recognised_but_refused() {
    let (mut server, _state) = test_server();
    run_through_acquisition(&mut server);
    expect_single(
        send(&mut server, Code::PeFinished, pe_finished_payload(1e-4)),
        Code::PeApproved,
    );

    for code in [
        Code::EcInitialization,
        Code::EcBlock,
        Code::EcRemaining,
        Code::EcVerification,
        Code::PaRequest,
    ] {
        let replies = send(&mut server, code, Value::Null);
        expect_single(replies, Code::UnexpectedCommand);
        assert_eq!(server.phase(), ProtocolPhase::PeEnded);
    }
}

#[test]
fn hardware_fault_ends_the_frame_but_keeps_the_session() {
    let (mut server, state) = test_server();
    identify(&mut server);
    initialize(&mut server);
    expect_single(send(&mut server, Code::QieRequest, Value::Null), Code::QieReady);

    state.lock().unwrap().fail_dac = true;
    let replies = send(&mut server, Code::QieTrigger, Value::Null);
    let value = expect_single(replies, Code::FrameEnded);
    assert!(value["error_message"].as_str().unwrap().contains("emission"));

    // The frame is gone but the peer stays authenticated: a fresh
    // INITIALIZATION_REQUEST alone starts the next frame.
    assert_eq!(server.phase(), ProtocolPhase::Authenticated);
    assert!(server.frame().is_none());
    initialize(&mut server);
    expect_single(send(&mut server, Code::QieRequest, Value::Null), Code::QieReady);
}

#[test]
fn reset_returns_to_the_initial_state() {
    let (mut server, _state) = test_server();
    run_through_acquisition(&mut server);

    server.reset();
    assert_eq!(server.phase(), ProtocolPhase::Listening);
    assert!(server.frame().is_none());

    // Identical to a freshly built server before any peer is accepted.
    let (fresh, _state) = test_server_unconnected();
    assert_eq!(server.phase(), fresh.phase());
    assert!(fresh.frame().is_none());
}

#[test]
fn parameter_changes_follow_policy_and_frame_state() {
    let (mut server, _state) = test_server();
    identify(&mut server);

    // Accepted between frames.
    let value = expect_single(
        send(
            &mut server,
            Code::ChangeParameterRequest,
            json!({ "parameter": "frame.quantum.variance", "value": 0.02 }),
        ),
        Code::ParameterChanged,
    );
    assert_eq!(value["old_value"], json!(0.01));
    assert_eq!(server.config().frame.quantum.variance, 0.02);

    // Unknown parameter path.
    expect_single(
        send(
            &mut server,
            Code::ChangeParameterRequest,
            json!({ "parameter": "network.bind_port", "value": 1 }),
        ),
        Code::ParameterUnknown,
    );

    // Refused while a frame is in flight.
    initialize(&mut server);
    expect_single(send(&mut server, Code::QieRequest, Value::Null), Code::QieReady);
    expect_single(
        send(
            &mut server,
            Code::ChangeParameterRequest,
            json!({ "parameter": "frame.quantum.variance", "value": 0.03 }),
        ),
        Code::ParameterRefused,
    );
    assert_eq!(server.config().frame.quantum.variance, 0.02);
}

#[test]
fn polarisation_recovery_emits_and_stops_a_tone() {
    let (mut server, state) = test_server();
    identify(&mut server);

    expect_single(
        send(&mut server, Code::RequestPolarisationRecovery, Value::Null),
        Code::PolarisationRecoveryAck,
    );
    assert!(state.lock().unwrap().emitting);

    expect_single(
        send(&mut server, Code::EndPolarisationRecovery, Value::Null),
        Code::PolarisationRecoveryEnded,
    );
    assert!(!state.lock().unwrap().emitting);
    // Phase is untouched by the recovery procedure.
    assert_eq!(server.phase(), ProtocolPhase::Authenticated);
}
