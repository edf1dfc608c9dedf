use super::*;

/// Assembles raw output chunks into complete lines.
///
/// Lines are split on `\n`, a trailing `\r` is stripped and blank lines are
/// dropped. The last partial line is kept until more data or [`flush`](Self::flush).
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: String,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the lines it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(newline_pos) = self.pending.find('\n') {
            let line = self.pending.drain(..=newline_pos).collect::<String>();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Returns the buffered partial line, if any, and clears the buffer.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim_end_matches('\r');
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

/// Decodes a byte stream as UTF-8 across chunk boundaries.
///
/// An incomplete character at the end of a chunk is held back until the
/// next chunk. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Stream {
    tail: Vec<u8>,
}

impl Utf8Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes every complete character buffered so far.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buffered = std::mem::take(&mut self.tail);
        buffered.extend_from_slice(bytes);

        let mut decoded = String::with_capacity(buffered.len());
        let mut rest = buffered.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    decoded.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.tail = rest.to_vec();
        decoded
    }

    /// Lossily decodes whatever is still held back.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.tail);
        if tail.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&tail).into_owned())
        }
    }
}

/// Spawns the per-session reader task.
///
/// The task pulls raw bytes from the transport, hands every completed line
/// to `on_line` as soon as it is assembled and forwards each decoded chunk to
/// the controller through a single-slot handoff. When the transport closes,
/// the trailing partial line is flushed and the returned receiver closes.
pub(super) fn spawn_reader(
    device_addr: String,
    mut raw: Receiver<Vec<u8>>,
    on_line: Option<LineCallback>,
) -> Receiver<String> {
    let (chunk_tx, chunk_rx) = mpsc::channel::<String>(1);
    tokio::spawn(async move {
        let mut assembler = LineAssembler::new();
        let mut decoder = Utf8Stream::new();
        let mut controller_gone = false;
        while let Some(bytes) = raw.recv().await {
            let chunk = decoder.decode(&bytes);
            if chunk.is_empty() {
                continue;
            }
            trace!("{} chunk {:?}", device_addr, chunk);
            if let Some(callback) = on_line.as_ref() {
                for line in assembler.push(&chunk) {
                    callback(&line);
                }
            }
            if chunk_tx.send(chunk).await.is_err() {
                debug!("{} controller dropped, reader stopping", device_addr);
                controller_gone = true;
                break;
            }
        }
        if !controller_gone && let Some(rest) = decoder.finish() {
            if let Some(callback) = on_line.as_ref() {
                for line in assembler.push(&rest) {
                    callback(&line);
                }
            }
            if chunk_tx.send(rest).await.is_err() {
                debug!("{} controller dropped before final chunk", device_addr);
            }
        }
        if let Some(callback) = on_line.as_ref()
            && let Some(rest) = assembler.flush()
        {
            callback(&rest);
        }
        debug!("{} reader task ended", device_addr);
    });
    chunk_rx
}
