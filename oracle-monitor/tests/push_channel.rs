use futures::SinkExt;
use oracle_monitor::{
    FeedTransport, MonitorError, SourceId,
    api::ApiClient,
    config::PollSource,
    connection::WsPollTransport,
    types::PushMessage,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Serve one push session that sends `frames` and then closes.
async fn serve_once(frames: Vec<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        for frame in frames {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }
        let _ = ws.close(None).await;
    });

    format!("ws://{address}/ws")
}

fn transport(ws_url: String) -> WsPollTransport {
    let api = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
    WsPollTransport::new(
        ws_url,
        api,
        PollSource::Full,
        Duration::from_secs(30),
        Duration::from_secs(60),
    )
}

#[tokio::test]
async fn test_push_frames_are_decoded_until_close() {
    let ws_url = serve_once(vec![
        r#"{"type":"welcome","message":"hello"}"#.to_string(),
        r#"{"type":"price_update","seq":7,"prices":{"upbit":{"price":5000000}}}"#.to_string(),
    ])
    .await;

    let mut session = transport(ws_url).connect().await.unwrap();

    assert_eq!(
        session.next().await,
        Some(Ok(PushMessage::Welcome {
            message: Some("hello".to_string())
        }))
    );

    let Some(Ok(PushMessage::PriceUpdate(bundle))) = session.next().await else {
        panic!("expected a price update");
    };
    assert_eq!(bundle.seq, Some(7));
    assert_eq!(bundle.price_of(&SourceId::from("upbit")), Some(5_000_000.0));

    let closed = session.next().await;
    assert!(
        matches!(closed, Some(Err(ref error)) if error.is_disconnect()) || closed.is_none(),
        "unexpected end of session: {closed:?}"
    );
}

#[tokio::test]
async fn test_malformed_frame_is_a_decode_error_not_a_disconnect() {
    let ws_url = serve_once(vec!["{not json".to_string()]).await;

    let mut session = transport(ws_url).connect().await.unwrap();

    let Some(Err(error)) = session.next().await else {
        panic!("expected a decode error");
    };
    assert!(matches!(error, MonitorError::Decode(_)));
    assert!(!error.is_disconnect());
}

#[tokio::test]
async fn test_refused_handshake_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let result = transport(format!("ws://{address}/ws")).connect().await;

    assert!(matches!(result, Err(MonitorError::Transport(_))));
}
