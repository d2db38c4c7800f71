//! Minimal line client used to talk to a running gateway.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use cangate_types::{CommandReply, CommandRequest};
use serde_json::Value;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GatewayClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl GatewayClient {
    pub fn connect(path: &Path) -> Result<Self, String> {
        let stream = UnixStream::connect(path).map_err(|error| error.to_string())?;
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|error| error.to_string())?;
        let reader = stream.try_clone().map_err(|error| error.to_string())?;
        Ok(Self {
            writer: stream,
            reader: BufReader::new(reader),
        })
    }

    /// Sends `cmd` with `parameters` (a JSON object) and waits for the reply.
    pub fn call(&mut self, cmd: &str, parameters: Value) -> Result<CommandReply, String> {
        let mut request = CommandRequest::new(cmd);
        if let Value::Object(map) = parameters {
            request.parameters = map;
        }
        let line = serde_json::to_string(&request).map_err(|error| error.to_string())?;
        self.send_line(&line)
    }

    pub fn send_line(&mut self, line: &str) -> Result<CommandReply, String> {
        self.writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush())
            .map_err(|error| error.to_string())?;
        let mut reply = String::new();
        let read = self
            .reader
            .read_line(&mut reply)
            .map_err(|error| error.to_string())?;
        if read == 0 {
            return Err("gateway closed the connection without replying".to_owned());
        }
        serde_json::from_str(&reply).map_err(|error| format!("{error}: {reply}"))
    }
}
