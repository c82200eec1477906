//! Streamed execution: chunk ordering, the unique terminal response, and
//! buffering of the same chunks for non-streaming requests.

use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncReadExt;

use super::test_helpers::{connect, exec_frame, recv_frame, send_frame, start_server};

#[tokio::test]
async fn chunks_arrive_in_order_then_exactly_one_terminal() {
    let (listener, _calls) = start_server(false, None, 4).await;
    let mut client = connect(&listener).await;

    send_frame(&mut client, &exec_frame("s", "emit a,b,c", true)).await;

    for expected in ["a", "b", "c"] {
        let response = recv_frame(&mut client).await;
        assert_eq!(
            response,
            json!({ "id": "s", "output": expected, "error": null, "stream_end": false }),
            "chunk {expected} must arrive in production order"
        );
    }

    let terminal = recv_frame(&mut client).await;
    assert_eq!(
        terminal,
        json!({ "id": "s", "output": "", "error": null, "stream_end": true })
    );

    // Nothing may follow the terminal response for this id.
    let mut buf = [0u8; 1];
    let followup = tokio::time::timeout(Duration::from_millis(200), client.read(&mut buf)).await;
    assert!(followup.is_err(), "no frame may follow the terminal response");
}

#[tokio::test]
async fn same_chunks_are_buffered_when_streaming_is_off() {
    let (listener, _calls) = start_server(false, None, 4).await;
    let mut client = connect(&listener).await;

    send_frame(&mut client, &exec_frame("s", "emit a,b,c", false)).await;
    let response = recv_frame(&mut client).await;

    assert_eq!(
        response,
        json!({ "id": "s", "output": "a\nb\nc", "error": null, "stream_end": true })
    );
}

#[tokio::test]
async fn concurrent_ids_each_keep_their_own_sequence() {
    let (listener, _calls) = start_server(false, None, 4).await;
    let mut client = connect(&listener).await;

    // A slow request followed by a fast one on distinct ids: the fast one
    // finishes first, and both sequences stay self-consistent.
    send_frame(&mut client, &exec_frame("slow-req", "slow", false)).await;
    send_frame(&mut client, &exec_frame("fast-req", "1+1", false)).await;

    let first = recv_frame(&mut client).await;
    assert_eq!(
        first,
        json!({ "id": "fast-req", "output": "2", "error": null, "stream_end": true })
    );

    let second = recv_frame(&mut client).await;
    assert_eq!(
        second,
        json!({ "id": "slow-req", "output": "done", "error": null, "stream_end": true })
    );
}

#[tokio::test]
async fn streaming_and_buffered_requests_interleave_safely() {
    let (listener, _calls) = start_server(false, None, 4).await;
    let mut client = connect(&listener).await;

    send_frame(&mut client, &exec_frame("stream-req", "emit x,y", true)).await;
    send_frame(&mut client, &exec_frame("calc", "1+1", false)).await;

    // Collect everything; four frames total are due.
    let mut stream_outputs = Vec::new();
    let mut calc_terminal = None;
    let mut stream_terminal = false;
    for _ in 0..4 {
        let response = recv_frame(&mut client).await;
        match response.get("id").and_then(serde_json::Value::as_str) {
            Some("stream-req") => {
                if response["stream_end"] == json!(true) {
                    stream_terminal = true;
                } else {
                    assert!(!stream_terminal, "no chunk may follow the terminal");
                    stream_outputs.push(response["output"].clone());
                }
            }
            Some("calc") => calc_terminal = Some(response.clone()),
            other => panic!("unexpected id {other:?}"),
        }
    }

    assert_eq!(stream_outputs, vec![json!("x"), json!("y")]);
    assert!(stream_terminal);
    assert_eq!(
        calc_terminal,
        Some(json!({ "id": "calc", "output": "2", "error": null, "stream_end": true }))
    );
}
