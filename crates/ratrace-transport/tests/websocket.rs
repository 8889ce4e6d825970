//! Integration tests for the WebSocket transport.
//!
//! Each test binds to port 0, reads the real port back through
//! `local_addr`, and drives a tokio-tungstenite client against it.

#[cfg(feature = "websocket")]
mod websocket {
    use futures_util::{SinkExt, StreamExt};
    use ratrace_transport::{
        Connection, FrameReader, FrameWriter, Transport, WebSocketTransport,
    };
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn connect_client(addr: std::net::SocketAddr) -> ClientWs {
        let url = format!("ws://{addr}");
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("client should connect");
        ws
    }

    async fn accept_one() -> (
        <WebSocketTransport as Transport>::Connection,
        ClientWs,
    ) {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("bound address");

        let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });
        let client = connect_client(addr).await;
        let conn = server.await.expect("accept task should complete");
        (conn, client)
    }

    #[tokio::test]
    async fn test_websocket_split_halves_send_and_receive() {
        let (conn, mut client) = accept_one().await;
        assert!(conn.id().into_inner() > 0);

        let (mut reader, mut writer) = conn.split();

        writer
            .send(br#"{"type":"HeartbeatAck"}"#)
            .await
            .expect("send should succeed");
        let msg = client.next().await.unwrap().unwrap();
        assert!(msg.is_text(), "utf-8 payloads go out as text frames");
        assert_eq!(msg.into_data().as_ref(), br#"{"type":"HeartbeatAck"}"#);

        client
            .send(Message::Text(r#"{"type":"ListRooms"}"#.into()))
            .await
            .unwrap();
        let received = reader
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, br#"{"type":"ListRooms"}"#);

        writer.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_non_utf8_payload_sent_as_binary() {
        let (conn, mut client) = accept_one().await;
        let (_reader, mut writer) = conn.split();

        writer.send(&[0xff, 0xfe, 0x00]).await.unwrap();
        let msg = client.next().await.unwrap().unwrap();
        assert!(msg.is_binary());
        assert_eq!(msg.into_data().as_ref(), &[0xff, 0xfe, 0x00]);
    }

    #[tokio::test]
    async fn test_websocket_writer_not_blocked_by_pending_read() {
        let (conn, mut client) = accept_one().await;
        let (mut reader, mut writer) = conn.split();

        // The reader parks waiting for a frame that never comes.
        let pending = tokio::spawn(async move { reader.recv().await });

        for n in 0..3 {
            writer.send(format!("push {n}").as_bytes()).await.unwrap();
        }
        for n in 0..3 {
            let msg = client.next().await.unwrap().unwrap();
            assert_eq!(msg.into_text().unwrap().as_str(), format!("push {n}"));
        }

        client.send(Message::Close(None)).await.unwrap();
        let result = pending.await.unwrap().expect("recv should not error");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let (conn, mut client) = accept_one().await;
        let (mut reader, _writer) = conn.split();

        client.send(Message::Close(None)).await.unwrap();

        let result = reader.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_websocket_connections_get_distinct_ids() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let a = transport.accept().await.unwrap();
            let b = transport.accept().await.unwrap();
            (a.id(), b.id())
        });
        let _c1 = connect_client(addr).await;
        let _c2 = connect_client(addr).await;

        let (a, b) = server.await.unwrap();
        assert_ne!(a, b);
    }
}
