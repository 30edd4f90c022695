//! Support writers for the handler chain: a recording wrapper used by the
//! query logger and an in-memory writer used by tests.

use crate::plugin::ResponseWriter;
use crate::types::DnsMessage;
use anyhow::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Instant;

/// Observational proxy around a response writer. Every write is forwarded to
/// the wrapped writer unchanged; on the way through it keeps a copy of the
/// final message, its wire size, and the instant the recorder was created.
pub struct ResponseRecorder<'a> {
    inner: &'a mut dyn ResponseWriter,
    pub start: Instant,
    pub msg: Option<DnsMessage>,
    pub rsize: usize,
}

impl<'a> ResponseRecorder<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter) -> Self {
        Self {
            inner,
            start: Instant::now(),
            msg: None,
            rsize: 0,
        }
    }
}

#[async_trait]
impl ResponseWriter for ResponseRecorder<'_> {
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr()
    }

    async fn write_msg(&mut self, msg: &DnsMessage) -> Result<()> {
        self.msg = Some(msg.clone());
        self.rsize = msg.raw.len();
        self.inner.write_msg(msg).await
    }
}

/// Writer that buffers every message in memory instead of touching a socket.
#[derive(Default)]
pub struct MemoryWriter {
    pub written: Vec<DnsMessage>,
    pub remote: Option<SocketAddr>,
}

#[async_trait]
impl ResponseWriter for MemoryWriter {
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    async fn write_msg(&mut self, msg: &DnsMessage) -> Result<()> {
        self.written.push(msg.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recorder_forwards_and_captures() {
        let mut inner = MemoryWriter::default();
        let mut recorder = ResponseRecorder::new(&mut inner);
        let msg = DnsMessage {
            raw: vec![0; 40],
            ..Default::default()
        };
        recorder.write_msg(&msg).await.unwrap();
        assert_eq!(recorder.rsize, 40);
        assert_eq!(recorder.msg.as_ref().unwrap().raw, msg.raw);
        assert_eq!(inner.written.len(), 1);
        assert_eq!(inner.written[0].raw, msg.raw);
    }
}
