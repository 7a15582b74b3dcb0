//! Best-effort messages to a running watchd.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(200);
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Port from `watchd.json`, if watchd wrote one.
fn watchd_port() -> Option<u16> {
    let s = std::fs::read_to_string(config::watchd_info_path()).ok()?;
    let v: Value = serde_json::from_str(&s).ok()?;
    v.get("port")
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
}

/// Sends one request line and returns the response `data`.
pub async fn request(req: &Value) -> Result<Value> {
    let Some(port) = watchd_port() else {
        bail!("watchd is not running");
    };
    exchange(port, req, REPLY_TIMEOUT).await
}

async fn exchange(port: u16, req: &Value, reply_timeout: Duration) -> Result<Value> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .with_context(|| format!("connecting to watchd on {addr}: timed out"))?
        .with_context(|| format!("connecting to watchd on {addr}"))?;
    let (reader, mut writer) = stream.into_split();
    writer
        .write_all(format!("{}\n", serde_json::to_string(req)?).as_bytes())
        .await?;
    writer.flush().await?;
    let mut line = String::new();
    timeout(reply_timeout, BufReader::new(reader).read_line(&mut line))
        .await
        .context("watchd reply timed out")??;
    let resp: Value = serde_json::from_str(line.trim()).context("watchd response")?;
    if resp.get("ok").and_then(Value::as_bool) != Some(true) {
        let err = resp
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("watchd: {err}");
    }
    Ok(resp.get("data").cloned().unwrap_or(Value::Null))
}

/// Like [`request`], but a missing or unreachable watchd is only logged.
pub async fn notify(req: Value) {
    match request(&req).await {
        Ok(_) => tracing::debug!(op = ?req.get("op"), "watchd notified"),
        Err(e) => tracing::debug!("watchd not notified: {e:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reply_data_is_returned() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut line = String::new();
            BufReader::new(reader).read_line(&mut line).await.unwrap();
            writer
                .write_all(b"{\"ok\":true,\"data\":{\"changed\":true},\"error\":null}\n")
                .await
                .unwrap();
        });
        let data = exchange(port, &json!({"op": "health"}), REPLY_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(data, json!({"changed": true}));
    }

    #[tokio::test]
    async fn silent_watchd_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let held = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });
        let started = std::time::Instant::now();
        let err = exchange(port, &json!({"op": "health"}), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(2));
        held.abort();
    }

    #[tokio::test]
    async fn error_response_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream
                .write_all(b"{\"ok\":false,\"data\":null,\"error\":\"bad options\"}\n")
                .await
                .unwrap();
        });
        let err = exchange(port, &json!({"op": "options", "options": 1}), REPLY_TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "watchd: bad options");
    }
}
