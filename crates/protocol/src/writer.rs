use crate::block::{encode_line, Block};
use crate::header::Header;
use bar_core::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Writes the protocol to an async sink, flushing after every line.
pub struct LineWriter<W> {
    out: W,
    started: bool,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, started: false }
    }

    pub async fn header(&mut self, header: &Header) -> Result<()> {
        self.out.write_all(header.preamble().as_bytes()).await?;
        self.out.flush().await?;
        self.started = true;
        Ok(())
    }

    pub async fn line(&mut self, blocks: &[Block]) -> Result<()> {
        self.out.write_all(encode_line(blocks).as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }

    /// Close the status array. Does nothing if no header was written.
    pub async fn finish(&mut self) -> Result<()> {
        if self.started {
            self.out.write_all(b"]\n").await?;
            self.out.flush().await?;
            self.started = false;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
