use fill_mock_server::{MockServer, StationOptions};
use fill_protocol::{decode_message, encode_command, Command, ServerMessage, ValveName};
use std::net::TcpStream;
use std::time::{Duration, Instant};
use tungstenite::Message;

fn connect(server: &MockServer) -> tungstenite::WebSocket<TcpStream> {
    let stream = TcpStream::connect(server.listen_addr()).expect("tcp connect");
    let _ = stream.set_read_timeout(Some(Duration::from_millis(50)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(200)));
    let (ws, _) = tungstenite::client(server.url(), stream).expect("ws connect");
    ws
}

fn send(ws: &mut tungstenite::WebSocket<TcpStream>, cmd: &Command) {
    ws.send(Message::Text(encode_command(cmd).unwrap().into()))
        .expect("ws send");
}

fn read_server_message(
    ws: &mut tungstenite::WebSocket<TcpStream>,
    timeout: Duration,
) -> ServerMessage {
    let deadline = Instant::now() + timeout;
    loop {
        match ws.read() {
            Ok(Message::Text(s)) => return decode_message(s.as_str()).expect("valid server json"),
            Ok(_) => continue,
            Err(tungstenite::Error::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                if Instant::now() >= deadline {
                    panic!("timeout waiting for server message");
                }
            }
            Err(e) => panic!("ws read failed: {e:?}"),
        }
    }
}

#[test]
fn valve_query_returns_identified_state() {
    let server = MockServer::spawn("127.0.0.1:0", StationOptions::default()).expect("spawn");
    server.set_valve(ValveName::Sv1, false, true);
    let mut ws = connect(&server);

    send(
        &mut ws,
        &Command::GetValveState {
            valve: ValveName::Sv1,
        },
    );

    match read_server_message(&mut ws, Duration::from_secs(2)) {
        ServerMessage::ValveState {
            valve,
            actuated,
            continuity,
        } => {
            assert_eq!(valve.as_deref(), Some("SV1"));
            assert!(!actuated);
            assert!(continuity);
        }
        other => panic!("expected valve_state, got: {other:?}"),
    }

    server.shutdown();
}

#[test]
fn stream_is_acknowledged_then_frames_flow_until_stopped() {
    let server = MockServer::spawn("127.0.0.1:0", StationOptions::default()).expect("spawn");
    let mut ws = connect(&server);

    send(&mut ws, &Command::StartAdcStream);
    let mut saw_ack = false;
    let mut frames = 0;
    let deadline = Instant::now() + Duration::from_secs(3);
    while frames < 3 {
        assert!(Instant::now() < deadline, "timeout waiting for adc frames");
        match read_server_message(&mut ws, Duration::from_secs(2)) {
            ServerMessage::Success => saw_ack = true,
            ServerMessage::AdcData(frame) => {
                assert!(frame.valid);
                frames += 1;
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
    assert!(saw_ack);

    send(&mut ws, &Command::StopAdcStream);
    let deadline = Instant::now() + Duration::from_secs(2);
    while server.station().stream_active() {
        assert!(Instant::now() < deadline, "stream did not stop");
        std::thread::sleep(Duration::from_millis(10));
    }

    server.shutdown();
}

#[test]
fn garbage_gets_an_error_reply_and_the_link_survives() {
    let server = MockServer::spawn("127.0.0.1:0", StationOptions::default()).expect("spawn");
    let mut ws = connect(&server);

    ws.send(Message::Text(r#"{"command":"launch_rocket"}"#.into()))
        .unwrap();
    match read_server_message(&mut ws, Duration::from_secs(2)) {
        ServerMessage::Error { message } => assert!(message.is_some()),
        other => panic!("expected error, got: {other:?}"),
    }

    send(&mut ws, &Command::GetMavState);
    match read_server_message(&mut ws, Duration::from_secs(2)) {
        ServerMessage::MavState {
            angle,
            pulse_width_us,
        } => {
            assert_eq!(angle, Some(0.0));
            assert_eq!(pulse_width_us, Some(1000));
        }
        other => panic!("expected mav_state, got: {other:?}"),
    }

    assert_eq!(server.drain_received(), vec![Command::GetMavState]);
    server.shutdown();
}
