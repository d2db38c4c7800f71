//! Reply serialization for the dispatch loop.

use std::io::Write;

use cangate_types::CommandReply;

use super::errors::DispatchError;

/// Writes replies as newline-terminated JSON documents.
pub struct ResponseWriter<W> {
    writer: W,
}

impl<W: Write> ResponseWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serializes `reply`, terminates it with a newline and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_reply(&mut self, reply: &CommandReply) -> Result<(), DispatchError> {
        serde_json::to_writer(&mut self.writer, reply)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cangate_types::{ErrorKind, Parameters};
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn writes_one_line_per_reply() {
        let mut output = Vec::new();
        {
            let mut writer = ResponseWriter::new(&mut output);
            writer
                .write_reply(&CommandReply::success("scanner", Parameters::new()))
                .expect("write success");
            writer
                .write_reply(&CommandReply::failure(
                    "sdo_upload",
                    ErrorKind::Timeout,
                    "no answer",
                ))
                .expect("write failure");
        }
        let text = String::from_utf8(output).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"reply_cmd\":\"scanner\""));
        assert!(lines[1].contains("\"reply_cmd\":\"err: no answer\""));
        assert!(text.ends_with('\n'));
    }
}
