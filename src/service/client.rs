//! Blocking controller client.
//!
//! Speaks the same newline-delimited JSON protocol as the engine's listener.
//! Used by the CLI (`deckhand send`, `deckhand replay`) and by integration
//! tests that drive a real socket.

use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::runtime::error::ErrorResponse;

use super::envelope::CommandEnvelope;

/// Errors produced by the [`Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O error while talking to the engine.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Response was not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// The engine answered with a structured error.
    #[error("{}", describe(.0))]
    Api(ErrorResponse),
    /// The engine closed the connection before answering.
    #[error("connection closed by engine")]
    Closed,
}

fn describe(response: &ErrorResponse) -> String {
    format!("{} ({})", response.error, response.error_code)
}

/// Synchronous client holding one connection.
#[derive(Debug)]
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Client {
    /// Connect to a listening engine.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);
        Ok(Self { reader, writer })
    }

    /// Fail reads that wait longer than `timeout`.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    /// Send a command and wait for its response. Error responses become
    /// [`ClientError::Api`].
    pub fn call(&mut self, name: &str, arguments: Map<String, Value>) -> Result<Value, ClientError> {
        let line = CommandEnvelope::new(name, arguments).encode();
        let value = self.send_raw(&line)?;
        if value.get("error_code").is_some() {
            let response: ErrorResponse = serde_json::from_value(value)?;
            return Err(ClientError::Api(response));
        }
        Ok(value)
    }

    /// Send one raw frame and read one response line, without interpreting it.
    pub fn send_raw(&mut self, line: &str) -> Result<Value, ClientError> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        let mut response = String::new();
        if self.reader.read_line(&mut response)? == 0 {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(response.trim_end())?)
    }
}
