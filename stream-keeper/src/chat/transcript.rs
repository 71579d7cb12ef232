//! Gzip-compressed JSON-lines chat transcript.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;

use super::irc::ChatMessage;
use crate::Result;
use crate::utils::fs::io_error;

/// An open transcript file.
///
/// Nothing is guaranteed to be on disk until [`ChatTranscript::finish`] has
/// returned; dropping the transcript without finishing leaves a truncated
/// gzip stream behind.
pub struct ChatTranscript {
    path: PathBuf,
    encoder: GzEncoder<BufWriter<File>>,
    written: u64,
}

impl ChatTranscript {
    /// Create (or truncate) the transcript at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| io_error("creating", path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            encoder: GzEncoder::new(BufWriter::new(file), Compression::best()),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append one record as a JSON line.
    pub fn append(&mut self, message: &ChatMessage) -> Result<()> {
        serde_json::to_writer(&mut self.encoder, message)?;
        self.encoder
            .write_all(b"\n")
            .map_err(|e| io_error("writing", &self.path, e))?;
        self.written += 1;
        Ok(())
    }

    /// Push buffered records through the compressor to the file.
    pub fn flush(&mut self) -> Result<()> {
        self.encoder
            .flush()
            .map_err(|e| io_error("flushing", &self.path, e))
    }

    /// Write the gzip trailer and close the file.
    pub fn finish(self) -> Result<u64> {
        let path = self.path;
        let mut writer = self
            .encoder
            .finish()
            .map_err(|e| io_error("finishing", &path, e))?;
        writer.flush().map_err(|e| io_error("flushing", &path, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| io_error("flushing", &path, e.into_error()))?;
        file.sync_all().map_err(|e| io_error("syncing", &path, e))?;
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::IrcLine;
    use chrono::Utc;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_finished_transcript_is_valid_gzip_json_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.chat.jsonl.gz");

        let mut transcript = ChatTranscript::create(&path).unwrap();
        for raw in [
            "@display-name=Foo :foo!foo@x PRIVMSG #bar :first",
            ":baz!baz@x PRIVMSG #bar :second",
        ] {
            let line = IrcLine::parse(raw).unwrap();
            let message = ChatMessage::from_irc(&line, Utc::now()).unwrap();
            transcript.append(&message).unwrap();
        }
        transcript.flush().unwrap();
        assert_eq!(transcript.finish().unwrap(), 2);

        let mut text = String::new();
        GzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        let records: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["type"], "chat");
        assert_eq!(records[0]["user"], "Foo");
        assert_eq!(records[1]["message"], "second");
        assert!(records[1]["time"].is_string());
    }
}
