//! A minimal blocking HTTP/1.1 client over the control API's Unix domain
//! socket. `sekiactl` is a short-lived admin command; a hand-rolled request
//! over `std::os::unix::net::UnixStream` avoids pulling in an async runtime
//! and an HTTP client stack for a handful of one-shot calls.

use std::{
    io::{Read, Write},
    os::unix::net::UnixStream,
    path::Path,
    time::Duration,
};

use anyhow::{Context, bail};
use serde::de::DeserializeOwned;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub fn get(socket: &Path, path: &str) -> anyhow::Result<serde_json::Value> {
    request(socket, "GET", path)
}

pub fn post(socket: &Path, path: &str) -> anyhow::Result<serde_json::Value> {
    request(socket, "POST", path)
}

pub fn post_as<T: DeserializeOwned>(socket: &Path, path: &str) -> anyhow::Result<T> {
    let value = post(socket, path)?;
    Ok(serde_json::from_value(value)?)
}

pub fn get_as<T: DeserializeOwned>(socket: &Path, path: &str) -> anyhow::Result<T> {
    let value = get(socket, path)?;
    Ok(serde_json::from_value(value)?)
}

fn request(socket: &Path, method: &str, path: &str) -> anyhow::Result<serde_json::Value> {
    let mut stream = UnixStream::connect(socket)
        .with_context(|| format!("failed to connect to control API at {}", socket.display()))?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let request = format!("{method} {path} HTTP/1.1\r\nHost: sekia\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes())?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;

    let text = String::from_utf8_lossy(&response);
    let (head, body) = text.split_once("\r\n\r\n").context("malformed HTTP response from control API")?;

    let status_line = head.lines().next().context("empty HTTP response from control API")?;
    let status: u16 = status_line.split_whitespace().nth(1).context("malformed status line")?.parse()?;

    if !(200..300).contains(&status) {
        bail!("control API returned {status}: {}", body.trim());
    }

    if body.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }

    serde_json::from_str(body).context("failed to parse control API response as JSON")
}
