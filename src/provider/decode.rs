//! SSE framing for upstream streams (Bytes -> JSON Value).

use super::UpstreamResult;
use crate::BoxStream;
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::Value;
use tracing::debug;

/// Splits an upstream byte stream into `data:` frames and parses each one as JSON.
///
/// - frames are separated by `"\n\n"`
/// - the `data: ` prefix is stripped, comment lines (`:`) are skipped
/// - `[DONE]` ends the stream
/// - a frame that is not JSON is skipped
pub struct SseDecoder {
    delimiter: String,
    prefix: String,
    done_signal: String,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self {
            delimiter: "\n\n".to_string(),
            prefix: "data: ".to_string(),
            done_signal: "[DONE]".to_string(),
        }
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_done_signal(mut self, signal: impl Into<String>) -> Self {
        self.done_signal = signal.into();
        self
    }

    fn is_done(&self, frame: &str) -> bool {
        let t = frame.trim();
        t == self.done_signal
            || t.strip_prefix("data:").map(str::trim) == Some(self.done_signal.as_str())
    }

    fn parse_frame(&self, raw: &str) -> Option<Value> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with(':') {
            return None;
        }
        let payload = if let Some(rest) = trimmed.strip_prefix(self.prefix.as_str()) {
            rest
        } else if let Some(rest) = trimmed.strip_prefix("data:") {
            rest.trim_start()
        } else {
            trimmed
        };
        match serde_json::from_str(payload) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(error = %e, "skipping non-JSON stream frame");
                None
            }
        }
    }

    /// Consume the decoder and produce a `'static` stream of frames.
    pub fn decode(
        self,
        input: BoxStream<'static, UpstreamResult<Bytes>>,
    ) -> BoxStream<'static, UpstreamResult<Value>> {
        let stream = stream::unfold(
            (input, String::new(), self),
            |(mut input, mut buf, decoder)| async move {
                loop {
                    if let Some(idx) = buf.find(&decoder.delimiter) {
                        let frame = buf[..idx].to_string();
                        buf.drain(..idx + decoder.delimiter.len());

                        if decoder.is_done(&frame) {
                            return None;
                        }
                        if let Some(v) = decoder.parse_frame(&frame) {
                            return Some((Ok(v), (input, buf, decoder)));
                        }
                        continue;
                    }

                    match input.next().await {
                        Some(Ok(bytes)) => {
                            buf.push_str(&String::from_utf8_lossy(&bytes));
                            // Some servers frame with CRLF.
                            if buf.contains('\r') {
                                buf = buf.replace("\r\n", "\n");
                            }
                        }
                        Some(Err(e)) => return Some((Err(e), (input, buf, decoder))),
                        None => {
                            // EOF: whatever is left is the last frame.
                            if decoder.is_done(&buf) {
                                return None;
                            }
                            let tail = std::mem::take(&mut buf);
                            return decoder
                                .parse_frame(&tail)
                                .map(|v| (Ok(v), (input, buf, decoder)));
                        }
                    }
                }
            },
        );
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::UpstreamError;
    use futures::TryStreamExt;

    fn bytes_of(chunks: &[&'static str]) -> BoxStream<'static, UpstreamResult<Bytes>> {
        let items: Vec<UpstreamResult<Bytes>> =
            chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let input = bytes_of(&[
            "data: {\"a\":1}\n\nda",
            "ta: {\"a\":2}\n",
            "\n: keep-alive\n\ndata: [DONE]\n\ndata: {\"a\":3}\n\n",
        ]);
        let values: Vec<Value> = SseDecoder::new().decode(input).try_collect().await.unwrap();
        assert_eq!(values, vec![serde_json::json!({"a":1}), serde_json::json!({"a":2})]);
    }

    #[tokio::test]
    async fn test_crlf_and_unterminated_tail() {
        let input = bytes_of(&["data: {\"a\":1}\r\n\r\ndata: {\"a\":2}"]);
        let values: Vec<Value> = SseDecoder::new().decode(input).try_collect().await.unwrap();
        assert_eq!(values.len(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_is_forwarded() {
        let items: Vec<UpstreamResult<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"a\":1}\n\n")),
            Err(UpstreamError::Stream("reset".into())),
        ];
        let mut out = SseDecoder::new().decode(Box::pin(stream::iter(items)));
        assert!(out.next().await.unwrap().is_ok());
        assert_eq!(
            out.next().await.unwrap(),
            Err(UpstreamError::Stream("reset".into()))
        );
    }
}
