use futures_util::stream::{Stream, StreamExt};

use crate::error::{Error, Result};
use crate::models::RebuildProgressEvent;

/// Field marker that carries an event payload.
const DATA_MARKER: &str = "data:";

/// Parse a single event-stream line. Returns:
/// - None to skip (blank lines, comments, `event:`/`id:`/`retry:` fields)
/// - Some(Ok(event)) for a decoded `data:` payload
/// - Some(Err(Error::Parse)) for a `data:` payload that is not a valid event
pub fn parse_event_line(line: &str) -> Option<Result<RebuildProgressEvent>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let payload = line.strip_prefix(DATA_MARKER)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload).trim();
    if payload.is_empty() {
        return None;
    }

    Some(
        serde_json::from_str::<RebuildProgressEvent>(payload).map_err(|source| Error::Parse {
            line: line.to_string(),
            source,
        }),
    )
}

/// Convert a byte stream into a stream of complete lines.
///
/// Bytes are buffered until a `\n` arrives, so multi-byte characters split
/// across network chunks decode correctly. A trailing partial line is
/// emitted when the byte stream ends.
pub fn stream_lines<S, B, E>(byte_stream: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<Error> + Send,
{
    futures_util::stream::unfold(
        (Box::pin(byte_stream), Vec::<u8>::new(), false),
        |(mut stream, mut buffer, mut finished)| async move {
            loop {
                if let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                    let rest = buffer.split_off(newline_pos + 1);
                    let line_bytes = std::mem::replace(&mut buffer, rest);
                    let line = String::from_utf8_lossy(&line_bytes)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if !line.trim().is_empty() {
                        return Some((Ok(line), (stream, buffer, finished)));
                    }
                    continue;
                }

                if finished {
                    return None;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(bytes.as_ref()),
                    Some(Err(e)) => {
                        finished = true;
                        buffer.clear();
                        return Some((Err(e.into()), (stream, buffer, finished)));
                    }
                    None => {
                        finished = true;
                        if !buffer.iter().all(u8::is_ascii_whitespace) {
                            let remaining = String::from_utf8_lossy(&std::mem::take(&mut buffer))
                                .trim_end_matches(['\r', '\n'])
                                .to_string();
                            return Some((Ok(remaining), (stream, buffer, finished)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}
