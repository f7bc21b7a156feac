//! Decoding the click-event stream read from stdin.
//!
//! The stream is an endless JSON array: `[`, then event objects separated
//! by commas. Hosts differ in where they put whitespace and commas, so the
//! decoder skips any run of whitespace, `[` and `,` between objects and
//! frames each object by brace depth instead of parsing the array.

use bar_core::{BarError, Button, Event, Modifier, Result};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A click, addressed by the `(name, instance)` we attached to the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Click {
    pub name: String,
    pub instance: String,
    pub event: Event,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawClick {
    name: Option<String>,
    instance: Option<String>,
    button: u32,
    x: f64,
    y: f64,
    relative_x: f64,
    relative_y: f64,
    width: f64,
    height: f64,
    modifiers: Vec<String>,
}

impl From<RawClick> for Click {
    fn from(raw: RawClick) -> Self {
        Click {
            name: raw.name.unwrap_or_default(),
            instance: raw.instance.unwrap_or_default(),
            event: Event {
                segment_id: String::new(),
                button: Button::from_code(raw.button),
                x: raw.relative_x as i32,
                y: raw.relative_y as i32,
                screen_x: raw.x as i32,
                screen_y: raw.y as i32,
                width: raw.width as i32,
                height: raw.height as i32,
                modifiers: raw.modifiers.iter().map(|m| Modifier::from_name(m)).collect(),
            },
        }
    }
}

/// Incremental decoder: feed bytes with [`push`](Self::push), take events
/// with [`next_click`](Self::next_click).
#[derive(Debug, Default)]
pub struct ClickDecoder {
    buf: Vec<u8>,
}

impl ClickDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The next complete event. `None` means more input is needed. A
    /// framing or decoding error consumes the offending input, so calling
    /// again resumes with whatever follows it.
    pub fn next_click(&mut self) -> Option<Result<Click>> {
        let start = self
            .buf
            .iter()
            .position(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'[' | b','));
        let Some(start) = start else {
            self.buf.clear();
            return None;
        };
        self.buf.drain(..start);

        if self.buf[0] != b'{' {
            // Drop everything up to the next separator.
            let end = self
                .buf
                .iter()
                .position(|b| *b == b',')
                .unwrap_or(self.buf.len());
            let junk: Vec<u8> = self.buf.drain(..end).collect();
            return Some(Err(BarError::Protocol(format!(
                "unexpected input {:?}",
                String::from_utf8_lossy(&junk)
            ))));
        }

        let end = object_end(&self.buf)?;
        let object: Vec<u8> = self.buf.drain(..=end).collect();
        Some(
            serde_json::from_slice::<RawClick>(&object)
                .map(Click::from)
                .map_err(|e| BarError::Protocol(format!("bad click event: {e}"))),
        )
    }
}

/// Index of the brace closing the object that starts at `buf[0]`.
fn object_end(buf: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, b) in buf.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Click events read from an async byte source.
pub struct ClickStream<R> {
    reader: R,
    decoder: ClickDecoder,
    chunk: Vec<u8>,
    ended: bool,
}

impl<R: AsyncRead + Unpin> ClickStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: ClickDecoder::new(),
            chunk: vec![0; 4096],
            ended: false,
        }
    }

    /// The next event or decoding error; `None` at end of input. A read
    /// error is returned once and ends the stream.
    pub async fn next(&mut self) -> Option<Result<Click>> {
        loop {
            if let Some(click) = self.decoder.next_click() {
                return Some(click);
            }
            if self.ended {
                return None;
            }
            match self.reader.read(&mut self.chunk).await {
                Ok(0) => self.ended = true,
                Ok(n) => self.decoder.push(&self.chunk[..n]),
                Err(e) => {
                    self.ended = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &str) -> Vec<Result<Click>> {
        let mut d = ClickDecoder::new();
        d.push(input.as_bytes());
        std::iter::from_fn(|| d.next_click()).collect()
    }

    #[test]
    fn tolerates_host_framing() {
        let input = "[\n{\"name\":\"0\",\"instance\":\"a\",\"button\":1,\"x\":100,\"y\":4,\"relative_x\":3,\"relative_y\":4,\"width\":30,\"height\":20,\"modifiers\":[\"Mod4\"]}\n,, ,{\"name\":\"1\",\"instance\":\"b\",\"button\":5}";
        let clicks: Vec<Click> = decode_all(input).into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(clicks.len(), 2);
        assert_eq!(clicks[0].name, "0");
        assert_eq!(clicks[0].event.button, Button::Left);
        assert_eq!(clicks[0].event.x, 3);
        assert_eq!(clicks[0].event.screen_x, 100);
        assert_eq!(clicks[0].event.modifiers, vec![Modifier::Mod4]);
        assert_eq!(clicks[1].instance, "b");
        assert_eq!(clicks[1].event.button, Button::ScrollDown);
    }

    #[test]
    fn waits_for_split_objects() {
        let mut d = ClickDecoder::new();
        d.push(b"[{\"name\":\"br}ace\",\"instance\":\"x\\\"\",");
        assert!(d.next_click().is_none());
        d.push(b"\"button\":3.0}");
        // A float button code is a decoding error, not a framing one.
        assert!(matches!(d.next_click(), Some(Err(BarError::Protocol(_)))));
        d.push(b",{\"name\":\"br}ace\",\"button\":3,\"x\":1.5}");
        let click = d.next_click().unwrap().unwrap();
        assert_eq!(click.name, "br}ace");
        assert_eq!(click.event.screen_x, 1);
        assert!(d.next_click().is_none());
    }

    #[test]
    fn junk_is_skipped_to_the_next_separator() {
        let results = decode_all("[garbage,{\"name\":\"0\",\"button\":2}");
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap().event.button, Button::Middle);
    }

    #[tokio::test]
    async fn stream_reads_until_eof() {
        let input: &[u8] = b"[{\"name\":\"0\",\"instance\":\"i\",\"button\":1},\n{\"name\":\"1\",\"button\":3}";
        let mut s = ClickStream::new(input);
        assert_eq!(s.next().await.unwrap().unwrap().name, "0");
        assert_eq!(s.next().await.unwrap().unwrap().event.button, Button::Right);
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn read_errors_end_the_stream() {
        struct Broken;
        impl AsyncRead for Broken {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Err(std::io::Error::other("input/output error")))
            }
        }

        let mut s = ClickStream::new(Broken);
        assert!(matches!(s.next().await, Some(Err(BarError::Io { .. }))));
        assert!(s.next().await.is_none());
        assert!(s.next().await.is_none());
    }
}
