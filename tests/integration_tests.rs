//! Black-box scenarios from spec §8, exercised through the public
//! `Client` API against a scripted mock MIDI channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use sm_sysex::cancel::CancelToken;
use sm_sysex::codec::{build_frame, parse_frame, Command, Frame, ManufacturerMode};
use sm_sysex::midi::{MidiEvent, MockMidiChannel};
use sm_sysex::transport::TransportConfig;
use sm_sysex::Client;
use tokio::sync::mpsc;

/// Answers every sent frame with whatever `responder` computes from the
/// parsed request JSON.
fn spawn_echo(
    mock: MockMidiChannel,
    incoming: mpsc::UnboundedSender<MidiEvent>,
    responder: impl Fn(&Value) -> (String, Option<Vec<u8>>) + Send + 'static,
) {
    tokio::spawn(async move {
        loop {
            tokio::task::yield_now().await;
            let sent = mock.sent_frames();
            if sent.is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
                continue;
            }
            mock.clear();
            for raw in sent {
                let parsed = parse_frame(&raw, ManufacturerMode::Synthstrom).unwrap();
                let req: Value = serde_json::from_str(&parsed.json_text).unwrap();
                let (body, binary) = responder(&req);
                let reply = Frame {
                    command: Command::Json,
                    msg_id: parsed.msg_id,
                    json_text: body,
                    binary,
                };
                let bytes = build_frame(&reply, ManufacturerMode::Synthstrom).unwrap();
                let _ = incoming.send(MidiEvent {
                    timestamp: Instant::now(),
                    bytes,
                });
            }
        }
    });
}

fn make_client(config: TransportConfig) -> (Client, MockMidiChannel, mpsc::UnboundedSender<MidiEvent>) {
    let _ = env_logger::try_init();
    let mock = MockMidiChannel::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let client = Client::new(Arc::new(mock.clone()), rx, config);
    (client, mock, tx)
}

#[tokio::test]
async fn ping_round_trips() {
    let (client, mock, tx) = make_client(TransportConfig::default());
    spawn_echo(mock, tx, |_req| (r#"{"^ping":{}}"#.to_string(), None));
    client.ping(&CancelToken::new()).await.unwrap();
}

#[tokio::test]
async fn s3_session_renews_after_20_commands() {
    let (client, mock, tx) = make_client(TransportConfig::default());
    let session_opens = Arc::new(AtomicUsize::new(0));
    let session_opens_clone = Arc::clone(&session_opens);
    let closes = Arc::new(AtomicUsize::new(0));
    let closes_clone = Arc::clone(&closes);

    spawn_echo(mock, tx, move |req| {
        if req.get("ping").is_some() {
            (r#"{"^ping":{}}"#.to_string(), None)
        } else if req.get("closeSession").is_some() {
            closes_clone.fetch_add(1, Ordering::SeqCst);
            (r#"{"^closeSession":{"err":0}}"#.to_string(), None)
        } else {
            session_opens_clone.fetch_add(1, Ordering::SeqCst);
            (r#"{"^session":{"sid":1,"midMin":0,"midMax":127}}"#.to_string(), None)
        }
    });

    let cancel = CancelToken::new();
    for _ in 0..21 {
        client.ping(&cancel).await.unwrap();
    }

    // One open for the first ping, one renewal cycle (close + open) by the
    // 21st: two session opens, one close.
    assert_eq!(session_opens.load(Ordering::SeqCst), 2);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn s4_delete_directory_tolerates_not_found_leaf() {
    let (client, mock, tx) = make_client(TransportConfig::default());

    spawn_echo(mock, tx, |req| {
        if req.get("ping").is_some() {
            (r#"{"^ping":{}}"#.to_string(), None)
        } else if let Some(dir_req) = req.get("dir") {
            let path = dir_req["path"].as_str().unwrap();
            let offset = dir_req["offset"].as_u64().unwrap();
            let list = if offset > 0 {
                "[]".to_string()
            } else {
                match path {
                    "/" => r#"[{"name":"X","attr":16,"size":0,"date":0,"time":0}]"#.to_string(),
                    "/X" => {
                        r#"[{"name":"a","attr":0,"size":0,"date":0,"time":0},{"name":"b","attr":0,"size":0,"date":0,"time":0}]"#
                            .to_string()
                    }
                    _ => "[]".to_string(),
                }
            };
            (format!(r#"{{"^dir":{{"list":{list},"err":0}}}}"#), None)
        } else if let Some(delete_req) = req.get("delete") {
            let path = delete_req["path"].as_str().unwrap();
            let err = if path == "/X/a" { 4 } else { 0 };
            (format!(r#"{{"^delete":{{"err":{err}}}}}"#), None)
        } else {
            (r#"{"^session":{"sid":1,"midMin":0,"midMax":127}}"#.to_string(), None)
        }
    });

    client.delete("/X", &CancelToken::new()).await.unwrap();
}

#[tokio::test]
async fn s5_timeout_resets_session_and_next_op_reopens() {
    let config = TransportConfig {
        json_timeout: Duration::from_millis(20),
        ..TransportConfig::default()
    };
    let (client, mock, tx) = make_client(config);

    let drop_next_ping = Arc::new(Mutex::new(false));
    let session_opens = Arc::new(AtomicUsize::new(0));
    let session_opens_clone = Arc::clone(&session_opens);

    tokio::spawn(async move {
        loop {
            tokio::task::yield_now().await;
            let sent = mock.sent_frames();
            if sent.is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
                continue;
            }
            mock.clear();
            for raw in sent {
                let parsed = parse_frame(&raw, ManufacturerMode::Synthstrom).unwrap();
                let req: Value = serde_json::from_str(&parsed.json_text).unwrap();
                if req.get("ping").is_some() {
                    let mut drop_flag = drop_next_ping.lock().unwrap();
                    if *drop_flag {
                        *drop_flag = false;
                        continue; // simulate a lost reply
                    }
                }
                let body = if req.get("ping").is_some() {
                    r#"{"^ping":{}}"#.to_string()
                } else {
                    session_opens_clone.fetch_add(1, Ordering::SeqCst);
                    r#"{"^session":{"sid":1,"midMin":0,"midMax":127}}"#.to_string()
                };
                let reply = Frame {
                    command: Command::Json,
                    msg_id: parsed.msg_id,
                    json_text: body,
                    binary: None,
                };
                let bytes = build_frame(&reply, ManufacturerMode::Synthstrom).unwrap();
                let _ = tx.send(MidiEvent {
                    timestamp: Instant::now(),
                    bytes,
                });
            }
        }
    });

    let cancel = CancelToken::new();

    // Let capability detection and the initial session open complete
    // normally before we start dropping anything.
    client.ping(&cancel).await.unwrap();
    let opens_after_first = session_opens.load(Ordering::SeqCst);
    assert!(opens_after_first >= 1);

    // Now drop the next ping's reply: the command itself should time out
    // and reset the session.
    *drop_next_ping.lock().unwrap() = true;
    let result = client.ping(&cancel).await;
    assert!(matches!(result, Err(sm_sysex::SmSysexError::Timeout)));

    // The next operation must re-open a session after the reset.
    client.ping(&cancel).await.unwrap();
    assert!(session_opens.load(Ordering::SeqCst) > opens_after_first);
}

#[tokio::test]
async fn s6_custom_sysex_validation() {
    let (client, mock, tx) = make_client(TransportConfig::default());
    spawn_echo(mock, tx, |_req| (r#"{"^ping":{}}"#.to_string(), None));

    assert!(client.send_custom_sysex("F0 7D 03 00 01 F7"));
    assert!(!client.send_custom_sysex("00 01 F7"));
    assert!(!client.send_custom_sysex("F0 ZZ F7"));
}

#[tokio::test]
async fn read_then_write_round_trip_through_client() {
    let (client, mock, tx) = make_client(TransportConfig::default());
    let storage: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let storage_clone = Arc::clone(&storage);

    spawn_echo(mock, tx, move |req| {
        if req.get("ping").is_some() {
            (r#"{"^ping":{}}"#.to_string(), None)
        } else if req.get("open").is_some() {
            let size = storage_clone.lock().unwrap().len();
            (format!(r#"{{"^open":{{"fid":1,"size":{size},"err":0}}}}"#), None)
        } else if let Some(write_req) = req.get("write") {
            let size = write_req["size"].as_u64().unwrap() as usize;
            (format!(r#"{{"^write":{{"fid":1,"addr":0,"size":{size},"err":0}}}}"#), None)
        } else if req.get("read").is_some() {
            let data = storage_clone.lock().unwrap().clone();
            (r#"{"^read":{"err":0}}"#.to_string(), Some(data))
        } else if req.get("close").is_some() {
            (r#"{"^close":{"fid":1,"err":0}}"#.to_string(), None)
        } else {
            (r#"{"^session":{"sid":1,"midMin":0,"midMax":127}}"#.to_string(), None)
        }
    });

    *storage.lock().unwrap() = b"hello deluge".to_vec();
    let cancel = CancelToken::new();
    let bytes = client.read_file("/HELLO.TXT", None, &cancel).await.unwrap();
    assert_eq!(bytes, b"hello deluge");
}
