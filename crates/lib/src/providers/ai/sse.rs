//! Server-sent event decoding for streaming provider responses.

use super::{ChunkStream, StreamChunk, Usage};
use crate::errors::PromptError;
use futures::{
    stream::{self, BoxStream},
    Stream, StreamExt,
};
use std::collections::VecDeque;
use std::fmt::Display;

/// Splits raw bytes into `data:` payloads, one per event.
///
/// Bytes are buffered until a full line is available so multi-byte characters and
/// lines split across network reads decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(event) = self.line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }
        events
    }

    /// Flushes whatever is left once the body ends.
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }
        if !self.data_lines.is_empty() {
            events.push(self.data_lines.drain(..).collect::<Vec<_>>().join("\n"));
        }
        events
    }

    fn line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data_lines.is_empty() {
                return None;
            }
            return Some(self.data_lines.drain(..).collect::<Vec<_>>().join("\n"));
        }
        if let Some(data) = line.strip_prefix("data:") {
            self.data_lines
                .push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
        // Comments, `event:`, `id:` and `retry:` lines carry nothing we use.
        None
    }
}

/// Turns a byte stream (usually `reqwest::Response::bytes_stream`) into event payloads.
pub fn data_events<S, B, E>(bytes: S) -> BoxStream<'static, Result<String, PromptError>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = (bytes.boxed(), SseDecoder::default(), VecDeque::new(), false);
    stream::unfold(state, |(mut bytes, mut decoder, mut pending, mut finished)| async move {
        loop {
            if let Some(data) = pending.pop_front() {
                return Some((Ok(data), (bytes, decoder, pending, finished)));
            }
            if finished {
                return None;
            }
            match bytes.next().await {
                Some(Ok(chunk)) => pending.extend(decoder.push(chunk.as_ref())),
                Some(Err(e)) => {
                    finished = true;
                    let err = PromptError::StreamInterrupted(e.to_string());
                    return Some((Err(err), (bytes, decoder, pending, finished)));
                }
                None => {
                    finished = true;
                    pending.extend(decoder.finish());
                }
            }
        }
    })
    .boxed()
}

/// What one provider event contributed.
#[derive(Debug, Default)]
pub struct DecodedEvent {
    pub texts: Vec<String>,
    /// Providers repeat cumulative usage; the last one seen wins.
    pub usage: Option<Usage>,
}

/// Builds a `ChunkStream` from event payloads and a provider-specific decoder.
///
/// Text is forwarded as it arrives; usage is held back and emitted once at the end. The
/// first error ends the stream.
pub fn chunk_stream<F>(
    events: BoxStream<'static, Result<String, PromptError>>,
    decode: F,
) -> ChunkStream
where
    F: FnMut(&str) -> Result<DecodedEvent, PromptError> + Send + 'static,
{
    let state = (events, decode, VecDeque::new(), None::<Usage>, false);
    stream::unfold(
        state,
        |(mut events, mut decode, mut pending, mut usage, mut finished)| async move {
            loop {
                if let Some(chunk) = pending.pop_front() {
                    return Some((Ok(chunk), (events, decode, pending, usage, finished)));
                }
                if finished {
                    return None;
                }
                let next = match events.next().await {
                    Some(Ok(data)) => decode(&data),
                    Some(Err(e)) => Err(e),
                    None => {
                        finished = true;
                        if let Some(total) = usage.take() {
                            pending.push_back(StreamChunk::Usage(total));
                        }
                        continue;
                    }
                };
                match next {
                    Ok(decoded) => {
                        pending.extend(
                            decoded
                                .texts
                                .into_iter()
                                .filter(|t| !t.is_empty())
                                .map(StreamChunk::Text),
                        );
                        if decoded.usage.is_some() {
                            usage = decoded.usage;
                        }
                    }
                    Err(e) => {
                        finished = true;
                        return Some((Err(e), (events, decode, pending, usage, finished)));
                    }
                }
            }
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_handles_split_lines_and_multibyte_chars() {
        let mut decoder = SseDecoder::default();
        let payload = "data: {\"t\":\"caf\u{e9}\"}\n\n: keepalive\n\ndata: [DONE]\n\n";
        let bytes = payload.as_bytes();
        let (a, b) = bytes.split_at(16); // inside the two-byte é
        let mut events = decoder.push(a);
        events.extend(decoder.push(b));
        events.extend(decoder.finish());
        assert_eq!(events, vec!["{\"t\":\"caf\u{e9}\"}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn test_multi_line_data_and_crlf() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"event: message\r\ndata: a\r\ndata: b\r\n\r\n");
        assert_eq!(events, vec!["a\nb".to_string()]);
        assert!(decoder.finish().is_empty());
    }

    #[tokio::test]
    async fn test_chunk_stream_emits_usage_last() {
        let bytes = stream::iter(vec![
            Ok::<_, std::io::Error>(b"data: one\n\ndata: two".to_vec()),
            Ok(b"\n\n".to_vec()),
        ]);
        let chunks: Vec<_> = chunk_stream(data_events(bytes), |data| {
            Ok(DecodedEvent {
                texts: vec![data.to_string()],
                usage: Some(Usage {
                    completion_tokens: data.len() as u64,
                    ..Default::default()
                }),
            })
        })
        .collect()
        .await;

        let chunks: Vec<StreamChunk> = chunks.into_iter().map(Result::unwrap).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], StreamChunk::Text("one".into()));
        assert_eq!(chunks[1], StreamChunk::Text("two".into()));
        assert!(matches!(&chunks[2], StreamChunk::Usage(u) if u.completion_tokens == 3));
    }

    #[tokio::test]
    async fn test_chunk_stream_stops_at_first_error() {
        let bytes = stream::iter(vec![Ok::<_, std::io::Error>(
            b"data: ok\n\ndata: bad\n\ndata: never\n\n".to_vec(),
        )]);
        let items: Vec<_> = chunk_stream(data_events(bytes), |data| {
            if data == "bad" {
                Err(PromptError::ContentFiltered("bad".into()))
            } else {
                Ok(DecodedEvent {
                    texts: vec![data.to_string()],
                    usage: None,
                })
            }
        })
        .collect()
        .await;
        assert_eq!(items.len(), 2);
        assert!(items[1].as_ref().unwrap_err().is_content_filter());
    }
}
