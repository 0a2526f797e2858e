use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use tracing::info;
use tracing::level_filters::LevelFilter;

use mock_prediction_service::callback::TcpConnector;
use mock_prediction_service::config::{FramingConfig, FramingMode};
use mock_prediction_service::predictor::Predictor;
use mock_prediction_service::{bind, init_tracing_subscriber, run};

const TIMEOUT: Duration = Duration::from_millis(1000);
const SHORT_TIMEOUT: Duration = Duration::from_millis(200);

#[tokio::test]
async fn test_train() {
    let port = spawn_app(FramingConfig::default(), 1).await;
    let (callback, callback_address) = spawn_callback().await;

    send(
        port,
        &format!(r#"{{"type":"train","class_type":"numeric","address":"{callback_address}"}}"#),
    )
    .await;

    assert_eq!(receive(&callback).await, r#"{"message":null}"#);
}

#[tokio::test]
async fn test_classify_numeric() {
    let port = spawn_app(FramingConfig::default(), 1).await;
    let (callback, callback_address) = spawn_callback().await;

    send(
        port,
        &format!(r#"{{"type":"classify","class_type":"numeric","address":"{callback_address}"}}"#),
    )
    .await;

    let response = receive_json(&callback).await;
    let value = response["classification"].as_f64().unwrap();
    assert!((0.0..1.0).contains(&value));
}

#[tokio::test]
async fn test_classify_nominal() {
    let port = spawn_app(FramingConfig::default(), 1).await;
    let (callback, callback_address) = spawn_callback().await;

    send(
        port,
        &format!(
            r#"{{"type":"classify","class_type":"nominal","class_labels":["a","b","c"],"address":"{callback_address}"}}"#
        ),
    )
    .await;

    let response = receive_json(&callback).await;
    assert_eq!(response.as_object().unwrap().len(), 1);
    let value = response["classification"].as_u64().unwrap();
    assert!(value <= 3);

    assert_no_connection(&callback).await;
}

#[tokio::test]
async fn test_distribution_nominal() {
    let port = spawn_app(FramingConfig::default(), 1).await;
    let (callback, callback_address) = spawn_callback().await;

    send(
        port,
        &format!(
            r#"{{"type":"distribution","class_type":"nominal","class_labels":["a","b","c","d","e"],"address":"{callback_address}"}}"#
        ),
    )
    .await;

    let response = receive_json(&callback).await;
    let distribution = response["distribution"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(distribution.len(), 5);
    assert!(distribution.iter().all(|v| *v >= 0.0));
    assert!((distribution.iter().sum::<f64>() - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_distribution_numeric() {
    let port = spawn_app(FramingConfig::default(), 1).await;
    let (callback, callback_address) = spawn_callback().await;

    send(
        port,
        &format!(
            r#"{{"type":"distribution","class_type":"numeric","address":"{callback_address}"}}"#
        ),
    )
    .await;

    let response = receive_json(&callback).await;
    let distribution = response["distribution"].as_array().unwrap();
    assert_eq!(distribution.len(), 1);
    assert!((0.0..1.0).contains(&distribution[0].as_f64().unwrap()));
}

#[tokio::test]
async fn test_unknown_type_delivers_error() {
    let port = spawn_app(FramingConfig::default(), 1).await;
    let (callback, callback_address) = spawn_callback().await;

    send(
        port,
        &format!(r#"{{"type":"predict","class_type":"numeric","address":"{callback_address}"}}"#),
    )
    .await;

    assert_eq!(
        receive(&callback).await,
        r#"{"classification":NaN,"distribution":[NaN],"error":"unknown request type: predict"}"#
    );
}

#[tokio::test]
async fn test_malformed_requests_keep_server_alive() {
    let port = spawn_app(FramingConfig::default(), 1).await;
    let (callback, callback_address) = spawn_callback().await;

    send(
        port,
        r#"{"type":"classify","class_type":"numeric","address":"badaddress"}"#,
    )
    .await;
    send(port, r#"{"class_type":"numeric","address":"#).await;
    send(port, "not json at all").await;

    assert_no_connection(&callback).await;

    send(
        port,
        &format!(r#"{{"type":"train","class_type":"numeric","address":"{callback_address}"}}"#),
    )
    .await;

    assert_eq!(receive(&callback).await, r#"{"message":null}"#);
}

#[tokio::test]
async fn test_unreachable_callback_keeps_server_alive() {
    let port = spawn_app(FramingConfig::default(), 1).await;

    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed_address = closed.local_addr().unwrap();
    drop(closed);

    send(
        port,
        &format!(r#"{{"type":"train","class_type":"numeric","address":"{closed_address}"}}"#),
    )
    .await;

    let (callback, callback_address) = spawn_callback().await;

    send(
        port,
        &format!(r#"{{"type":"train","class_type":"numeric","address":"{callback_address}"}}"#),
    )
    .await;

    assert_eq!(receive(&callback).await, r#"{"message":null}"#);
}

#[tokio::test]
async fn test_request_closed_without_newline() {
    let port = spawn_app(FramingConfig::default(), 1).await;
    let (callback, callback_address) = spawn_callback().await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(
            format!(r#"{{"type":"train","class_type":"numeric","address":"{callback_address}"}}"#)
                .as_bytes(),
        )
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    assert_eq!(receive(&callback).await, r#"{"message":null}"#);
}

#[tokio::test]
async fn test_quiescence_framing() {
    let framing = FramingConfig {
        mode: FramingMode::Quiescence,
        buffer_size: 8,
        wait_interval: Duration::from_millis(50),
        max_retries: 3,
        ..FramingConfig::default()
    };
    let port = spawn_app(framing, 1).await;
    let (callback, callback_address) = spawn_callback().await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(
            format!(r#"{{"type":"train","class_type":"numeric","address":"{callback_address}"}}"#)
                .as_bytes(),
        )
        .await
        .unwrap();

    assert_eq!(receive(&callback).await, r#"{"message":null}"#);
    drop(stream);
}

#[tokio::test]
async fn test_same_seed_same_values() {
    async fn values(seed: u64) -> Vec<String> {
        let port = spawn_app(FramingConfig::default(), seed).await;
        let (callback, callback_address) = spawn_callback().await;

        let mut values = vec![];
        for request in [
            format!(r#"{{"type":"classify","class_type":"numeric","address":"{callback_address}"}}"#),
            format!(
                r#"{{"type":"distribution","class_type":"nominal","class_labels":["x","y"],"address":"{callback_address}"}}"#
            ),
            format!(
                r#"{{"type":"classify","class_type":"nominal","class_labels":["x","y"],"address":"{callback_address}"}}"#
            ),
        ] {
            send(port, &request).await;
            values.push(receive(&callback).await);
        }

        values
    }

    assert_eq!(values(7).await, values(7).await);
}

fn init_logging() {
    init_tracing_subscriber(LevelFilter::DEBUG);
}

async fn spawn_app(framing: FramingConfig, seed: u64) -> u16 {
    init_logging();

    let listener = bind("127.0.0.1", 0, 5).await.expect("cannot bind");
    let port = listener
        .local_addr()
        .expect("cannot get local address")
        .port();

    tokio::spawn(run(
        listener,
        framing,
        Predictor::from_seed(seed),
        TcpConnector,
    ));

    info!("spawned app 127.0.0.1:{port}");

    port
}

async fn spawn_callback() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("cannot bind callback");
    let address = listener
        .local_addr()
        .expect("cannot get local address")
        .to_string();

    (listener, address)
}

async fn send(port: u16, request: &str) {
    let mut stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("cannot connect");
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.write_u8(b'\n').await.unwrap();
    stream.shutdown().await.unwrap();
}

async fn receive(callback: &TcpListener) -> String {
    let (stream, _) = timeout(TIMEOUT, callback.accept())
        .await
        .expect("no callback")
        .unwrap();

    let mut lines = BufReader::new(stream).lines();
    let line = timeout(TIMEOUT, lines.next_line())
        .await
        .expect("no result")
        .unwrap()
        .expect("empty result");

    assert!(lines.next_line().await.unwrap().is_none());

    line
}

async fn receive_json(callback: &TcpListener) -> serde_json::Value {
    serde_json::from_str(&receive(callback).await).expect("invalid json")
}

async fn assert_no_connection(callback: &TcpListener) {
    assert!(timeout(SHORT_TIMEOUT, callback.accept()).await.is_err());
}
