//! Streaming session tests against a local WebSocket server

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use flate2::write::GzEncoder;
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::sync::{mpsc, oneshot};
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    use refprice::error::FeedError;
    use refprice::oracle::sources::{HuobiProtocol, StreamingSession};
    use refprice::oracle::CandleSource;

    fn gzip(payload: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(payload.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    async fn listen() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    async fn accept(listener: TcpListener) -> WebSocketStream<tokio::net::TcpStream> {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    async fn next_text(ws: &mut WebSocketStream<tokio::net::TcpStream>) -> String {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return text,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn huobi_session_answers_ping_and_emits_candles() {
        let (listener, addr) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(listener).await;
            let subscribe = next_text(&mut ws).await;

            ws.send(Message::Binary(gzip(r#"{"ping":42}"#))).await.unwrap();
            let pong = next_text(&mut ws).await;

            let kline = r#"{"ch":"market.btcusdt.kline.1min","ts":1700000000000,
                "tick":{"close":37000.5,"amount":1.25}}"#;
            ws.send(Message::Binary(gzip(kline))).await.unwrap();
            ws.send(Message::Close(None)).await.unwrap();
            (subscribe, pong)
        });

        let session = StreamingSession::new(HuobiProtocol::new(&format!("ws://{addr}")));
        let (tx, mut rx) = mpsc::channel(8);
        let result = session.run(&["BTC".to_string()], &tx).await;
        assert!(matches!(result, Err(FeedError::Closed { .. })));

        let (subscribe, pong) = server.await.unwrap();
        assert_eq!(subscribe, r#"{"sub":"market.btcusdt.kline.1min","id":"id1"}"#);
        assert_eq!(pong, r#"{"pong":42}"#);

        let candle = rx.recv().await.unwrap();
        assert_eq!(candle.asset, "BTCUSDT");
        assert_eq!(candle.venue, "Huobi");
        assert_eq!(candle.closing_price, 37000.5);
        assert_eq!(candle.volume, 1.25);
        assert_eq!(candle.candle_ts.timestamp_millis(), 1_700_000_000_000);
    }

    #[tokio::test]
    async fn malformed_payload_ends_the_session() {
        let (listener, addr) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(listener).await;
            next_text(&mut ws).await;
            ws.send(Message::Binary(gzip("not json"))).await.unwrap();
            // Keep the socket open until the client hangs up
            while let Some(Ok(_)) = ws.next().await {}
        });

        let session = StreamingSession::new(HuobiProtocol::new(&format!("ws://{addr}")));
        let (tx, mut rx) = mpsc::channel(8);
        let result = session.run(&["ETH".to_string()], &tx).await;
        assert!(matches!(result, Err(FeedError::Json(_))));
        assert!(rx.try_recv().is_err());

        drop(session);
        let _ = tokio::time::timeout(Duration::from_secs(5), server).await;
    }

    #[tokio::test]
    async fn close_ends_a_live_session_cleanly() {
        let (listener, addr) = listen().await;
        let (subscribed_tx, subscribed_rx) = oneshot::channel();
        let server = tokio::spawn(async move {
            let mut ws = accept(listener).await;
            next_text(&mut ws).await;
            let _ = subscribed_tx.send(());
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                    Some(Ok(_)) => continue,
                }
            }
        });

        let session = Arc::new(StreamingSession::new(HuobiProtocol::new(&format!("ws://{addr}"))));
        let (tx, _rx) = mpsc::channel(8);
        let runner = session.clone();
        let run = tokio::spawn(async move { runner.run(&["BTC".to_string()], &tx).await });

        subscribed_rx.await.unwrap();
        session.close();

        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(session.is_closed());
        assert!(server.await.unwrap());
    }
}
