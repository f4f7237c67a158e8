//! Incremental relay of a `:streamGenerateContent` response body.
//!
//! Vertex AI streams one JSON array, `[{...},{...},...]`, whose elements
//! arrive split at arbitrary byte boundaries. [`StreamDecoder`] tracks brace
//! depth outside string literals so each top-level object can be parsed the
//! moment its closing brace arrives; the text parts are forwarded
//! immediately. Once the array ends, the grounding sources from the last
//! object that carried any are appended after [`METADATA_MARKER`].

use bytes::Bytes;
use futures_util::{Stream, StreamExt as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::TextStream;

/// Separates the answer text from the JSON source list in the relayed body.
pub const METADATA_MARKER: &str = "__METADATA__";

const UNKNOWN_TITLE: &str = "Unknown document";

/// Cap on how much unparseable input is quoted in warnings.
const PREVIEW_LEN: usize = 200;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub grounding_metadata: Option<GroundingMetadata>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingChunk {
    #[serde(default)]
    pub retrieved_context: Option<RetrievedContext>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrievedContext {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// One retrieved document as reported to the browser.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub index: usize,
    pub title: String,
    pub uri: String,
    pub text: String,
}

impl GroundingMetadata {
    fn sources(&self) -> Vec<Source> {
        self.grounding_chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let ctx = chunk.retrieved_context.clone().unwrap_or_default();
                Source {
                    index: i + 1,
                    title: ctx.title.filter(|t| !t.is_empty()).unwrap_or_else(|| UNKNOWN_TITLE.into()),
                    uri: ctx.uri.unwrap_or_default(),
                    text: ctx.text.unwrap_or_default(),
                }
            })
            .collect()
    }
}

/// Splits the streamed array into its top-level objects.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buf: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
    stray: Vec<u8>,
    objects: usize,
    grounding: Option<GroundingMetadata>,
}

impl StreamDecoder {
    /// Feed the next chunk of body bytes; returns the text of every object
    /// completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut texts = Vec::new();
        for &b in chunk {
            if self.depth == 0 {
                match b {
                    b'{' => {
                        self.depth = 1;
                        self.buf.push(b);
                    }
                    b'[' | b']' | b',' => {}
                    b if b.is_ascii_whitespace() => {}
                    b => {
                        if self.stray.len() < PREVIEW_LEN {
                            self.stray.push(b);
                        }
                    }
                }
                continue;
            }

            self.buf.push(b);
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        let object = std::mem::take(&mut self.buf);
                        if let Some(text) = self.complete(&object) {
                            texts.push(text);
                        }
                    }
                }
                _ => {}
            }
        }
        texts
    }

    /// Handle one complete top-level object. Returns its concatenated text, if any.
    fn complete(&mut self, object: &[u8]) -> Option<String> {
        self.objects += 1;
        let response: GenerateContentResponse = match serde_json::from_slice(object) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, object = %preview(object), "skipping malformed stream object");
                return None;
            }
        };
        if let Some(err) = &response.error {
            warn!(error = %err, "Vertex AI reported an error inside the stream");
        }

        let candidate = response.candidates.into_iter().next()?;
        if let Some(reason) = &candidate.finish_reason {
            debug!(finish_reason = %reason, "candidate finished");
        }
        if let Some(grounding) = candidate.grounding_metadata {
            self.grounding = Some(grounding);
        }

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        (!text.is_empty()).then_some(text)
    }

    /// The sources of the last grounding metadata seen.
    pub fn sources(&self) -> Vec<Source> {
        self.grounding.as_ref().map(GroundingMetadata::sources).unwrap_or_default()
    }

    /// End of body: report leftovers and produce the metadata suffix, if any.
    pub fn finish(self) -> Option<String> {
        if !self.buf.is_empty() {
            warn!(
                pending = %preview(&self.buf),
                "stream ended inside an unterminated object; discarding it"
            );
        }
        if !self.stray.is_empty() {
            warn!(stray = %preview(&self.stray), "ignored unparseable bytes between stream objects");
        }
        debug!(objects = self.objects, "stream decoded");

        let sources = self.sources();
        if sources.is_empty() {
            return None;
        }
        match serde_json::to_string(&sources) {
            Ok(json) => Some(format!("\n\n{METADATA_MARKER}{json}")),
            Err(e) => {
                warn!(error = %e, "could not serialise grounding sources");
                None
            }
        }
    }
}

fn preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    match text.char_indices().nth(PREVIEW_LEN) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    }
}

/// Spawn a task that decodes `upstream` and forwards text as it arrives.
///
/// The task stops as soon as the receiving side is dropped (client gone). An
/// upstream read error is forwarded as the final item, without a metadata
/// suffix.
pub fn relay<S, E>(upstream: S) -> TextStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let (tx, mut rx) = tokio::sync::mpsc::channel::<anyhow::Result<Bytes>>(32);

    tokio::spawn(async move {
        let mut upstream = Box::pin(upstream);
        let mut decoder = StreamDecoder::default();

        while let Some(chunk) = upstream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "Vertex AI stream interrupted");
                    let _ = tx
                        .send(Err(anyhow::Error::new(e).context("reading Vertex AI stream")))
                        .await;
                    return;
                }
            };
            for text in decoder.push(&bytes) {
                if tx.send(Ok(Bytes::from(text))).await.is_err() {
                    debug!("client disconnected; abandoning stream");
                    return;
                }
            }
        }

        if let Some(suffix) = decoder.finish() {
            let _ = tx.send(Ok(Bytes::from(suffix))).await;
        }
    });

    Box::pin(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)))
}
