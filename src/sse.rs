use crate::protocol::StreamEvent;

const RECORD_DELIMITER: &[u8] = b"\n\n";
const DATA_PREFIX: &str = "data:";

// Assembles complete server-sent records out of arbitrarily-sized byte
// chunks. The buffer holds raw bytes rather than text so that a chunk
// boundary inside a multi-byte UTF-8 sequence cannot corrupt a record.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buffer: Vec<u8>,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    // Drains every record terminated by a blank line; a trailing partial
    // record stays buffered until its delimiter arrives.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        while let Some(idx) = find_delimiter(&self.buffer) {
            let raw: Vec<u8> = self
                .buffer
                .drain(..idx + RECORD_DELIMITER.len())
                .collect();
            records.push(String::from_utf8_lossy(&raw[..idx]).into_owned());
        }
        records
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(RECORD_DELIMITER.len())
        .position(|window| window == RECORD_DELIMITER)
}

// Extracts the `data:` payload of one complete record and parses it into a
// StreamEvent. Records without a data line, with an empty payload, or with
// JSON that does not parse are dropped; a corrupt record never takes down
// the stream.
pub fn decode_record(raw: &str) -> Option<StreamEvent> {
    let mut data_lines = Vec::new();
    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(data) = line.strip_prefix(DATA_PREFIX) {
            data_lines.push(data.trim_start());
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    let payload = data_lines.join("\n");
    if payload.is_empty() {
        return None;
    }

    match serde_json::from_str::<StreamEvent>(&payload) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::warn!(error = %err, record = %payload, "skipping malformed stream record");
            None
        }
    }
}
