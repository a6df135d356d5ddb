//! Transport tests against a throwaway HTTP/1.1 server on localhost.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use chainingest_core::{
    DispatcherConfig, HttpCall, HttpMethod, HttpTransport, Request, RequestDispatcher,
    RequesterError,
};
use chainingest_http::{HttpClientConfig, ReqwestTransport};

/// Serve `response` to every connection; returns the base URL.
async fn serve(response: &'static str, delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let _ = socket.read(&mut buf).await;
                tokio::time::sleep(delay).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

fn transport() -> ReqwestTransport {
    ReqwestTransport::new(HttpClientConfig::default()).unwrap()
}

fn call(url: &str, timeout: Duration) -> HttpCall {
    HttpCall {
        method: HttpMethod::Post,
        url: url.to_string(),
        body: Some(r#"{"jsonrpc":"2.0","id":1,"method":"eth_blockNumber","params":[]}"#.into()),
        timeout,
    }
}

#[tokio::test]
async fn body_with_content_length() {
    let url = serve(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 17\r\nConnection: close\r\n\r\n{\"result\":\"0x10\"}",
        Duration::ZERO,
    )
    .await;
    let raw = transport().execute(call(&url, Duration::from_secs(5))).await.unwrap();
    assert_eq!(raw.status, 200);
    assert_eq!(raw.content_length, Some(17));
    assert_eq!(raw.body, br#"{"result":"0x10"}"#);
}

#[tokio::test]
async fn chunked_body_is_harvested() {
    let url = serve(
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n6\r\n{\"resu\r\nb\r\nlt\":\"0x10\"}\r\n0\r\n\r\n",
        Duration::ZERO,
    )
    .await;
    let raw = transport().execute(call(&url, Duration::from_secs(5))).await.unwrap();
    assert_eq!(raw.content_length, None);
    assert_eq!(raw.body, br#"{"result":"0x10"}"#);
}

#[tokio::test]
async fn slow_node_times_out() {
    let url = serve(
        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}",
        Duration::from_secs(2),
    )
    .await;
    let err = transport()
        .execute(call(&url, Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, RequesterError::Timeout { ms: 100, .. }));
}

#[tokio::test]
async fn refused_connection_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = transport()
        .execute(call(&url, Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, RequesterError::Connection { .. }));
    assert_eq!(err.class(), chainingest_core::ErrorClass::Transient);
}

#[tokio::test]
async fn dispatcher_over_real_http() {
    let url = serve(
        "HTTP/1.1 200 OK\r\nContent-Length: 58\r\nConnection: close\r\n\r\n{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":123456789012345678901234}",
        Duration::ZERO,
    )
    .await;
    let dispatcher = RequestDispatcher::new(Arc::new(transport()), DispatcherConfig::default());
    let value = dispatcher
        .single(Request::rpc(&url, 1, "eth_getBalance", vec![]))
        .await
        .unwrap();
    assert_eq!(value, serde_json::json!("123456789012345678901234"));
}
