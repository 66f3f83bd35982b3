//! Line splitting for streamed response bodies
//!
//! Log and watch endpoints stream their bodies in arbitrary chunks; these
//! helpers reassemble them into whole lines.

use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

/// Accumulates byte chunks and yields complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends a chunk and returns every line it completed
    ///
    /// Line terminators (`\n` or `\r\n`) are stripped. Invalid UTF-8 is
    /// replaced rather than rejected.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Returns the trailing unterminated line, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

struct SplitState<S> {
    body: Pin<Box<S>>,
    buffer: LineBuffer,
    ready: VecDeque<String>,
    done: bool,
}

/// Turns a stream of byte chunks into a stream of lines
///
/// An error from the body is forwarded once and ends the stream.
pub fn split_lines<S, B, E>(body: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let state = SplitState {
        body: Box::pin(body),
        buffer: LineBuffer::default(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let lines = state.buffer.push(chunk.as_ref());
                    state.ready.extend(lines);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.done = true;
                    state.ready.extend(state.buffer.finish());
                }
            }
        }
    })
}
