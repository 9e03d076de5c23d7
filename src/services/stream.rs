//! Reassembly of `data: <json>` event streams into content deltas.
//!
//! Transport chunks may split a record (or a multi-byte character) anywhere.
//! [`SseDecoder`] keeps the unfinished tail between reads and only ever looks
//! at complete, newline-terminated records. [`DeltaStream`] drives a decoder
//! from a live byte source and hands out deltas one at a time.

use crate::services::api::ByteStream;
use anyhow::Result;
use futures_util::{Stream, StreamExt};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::VecDeque;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

enum Record {
    Done,
    Delta(String),
    Skip,
}

fn parse_record(line: &str) -> Record {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Record::Skip;
    };
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Record::Done;
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta)
                .and_then(|d| d.content);
            match content {
                Some(text) if !text.is_empty() => Record::Delta(text),
                Some(_) => Record::Skip,
                None => {
                    debug!("Stream record without delta content: {}", payload);
                    Record::Skip
                }
            }
        }
        Err(e) => {
            warn!("Failed to parse stream record: {}. Payload: {}", e, payload);
            Record::Skip
        }
    }
}

/// Incremental decoder for one stream. Not restartable: once the sentinel is
/// seen or [`SseDecoder::finish`] is called, further input is ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    pending: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds raw bytes. A character split across reads is completed by the next read.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        let text = self.decode_utf8(bytes);
        self.push_str(&text)
    }

    pub fn push_str(&mut self, text: &str) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        self.buffer.push_str(text);
        self.drain_lines()
    }

    /// Source exhausted: flushes undecodable bytes and gives the unterminated
    /// tail one chance to be a data record.
    pub fn finish(&mut self) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        if !self.pending.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            self.buffer.push_str(&tail);
        }

        let mut deltas = self.drain_lines();
        if !self.done && !self.buffer.is_empty() {
            let leftover = std::mem::take(&mut self.buffer);
            if let Record::Delta(text) = parse_record(&leftover) {
                deltas.push(text);
            }
        }
        self.done = true;
        self.buffer.clear();
        deltas
    }

    fn drain_lines(&mut self) -> Vec<String> {
        let mut deltas = Vec::new();
        while !self.done {
            let Some(pos) = self.buffer.find('\n') else {
                break;
            };
            let line: String = self.buffer.drain(..=pos).collect();
            match parse_record(&line[..line.len() - 1]) {
                Record::Done => {
                    debug!("Stream sentinel received");
                    self.done = true;
                    self.buffer.clear();
                    self.pending.clear();
                }
                Record::Delta(text) => deltas.push(text),
                Record::Skip => {}
            }
        }
        deltas
    }

    fn decode_utf8(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes.
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}

/// Pull-based sequence of content deltas read from a byte source.
///
/// Finite: ends at the sentinel, at source exhaustion, or after the first
/// transport error (which is yielded once).
pub struct DeltaStream {
    source: Option<ByteStream>,
    decoder: SseDecoder,
    ready: VecDeque<String>,
}

impl DeltaStream {
    pub fn new(source: ByteStream) -> Self {
        Self {
            source: Some(source),
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
        }
    }

    pub async fn next_delta(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(delta) = self.ready.pop_front() {
                return Some(Ok(delta));
            }
            if self.decoder.is_done() {
                self.source = None;
                return None;
            }
            let source = self.source.as_mut()?;

            match source.next().await {
                Some(Ok(chunk)) => {
                    debug!("Stream read {} bytes", chunk.len());
                    self.ready.extend(self.decoder.push_bytes(&chunk));
                }
                Some(Err(e)) => {
                    self.source = None;
                    return Some(Err(e));
                }
                None => {
                    self.source = None;
                    self.ready.extend(self.decoder.finish());
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<String>> {
        futures_util::stream::unfold(self, |mut deltas| async move {
            deltas.next_delta().await.map(|item| (item, deltas))
        })
    }
}
