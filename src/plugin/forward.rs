//! Forwards queries to upstream resolvers over UDP, trying upstreams in
//! policy order until one answers.

use crate::config::{parse_duration, Directive};
use crate::plugin::{Handler, HandlerResult, Next, ResponseWriter};
use crate::types::{DnsMessage, RCODE_SERVFAIL};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Policy {
    Sequential,
    Random,
}

pub struct Forward {
    upstreams: Vec<String>,
    policy: Policy,
    timeout: Duration,
}

impl Forward {
    pub fn from_directive(directive: &Directive) -> Result<Self> {
        let mut upstreams = Vec::new();
        for arg in &directive.args {
            if arg == "." {
                continue;
            }
            if arg.contains(':') {
                upstreams.push(arg.clone());
            } else {
                upstreams.push(format!("{}:53", arg));
            }
        }
        if upstreams.is_empty() {
            anyhow::bail!("forward needs at least one upstream");
        }

        let mut policy = Policy::Sequential;
        let mut wait = Duration::from_secs(2);
        for sub in &directive.block {
            match sub.name.as_str() {
                "policy" => {
                    policy = match sub.args.first().map(String::as_str) {
                        Some("random") => Policy::Random,
                        _ => Policy::Sequential,
                    };
                }
                "timeout" => {
                    if let Some(arg) = sub.args.first() {
                        wait = parse_duration(arg)?;
                    }
                }
                _ => anyhow::bail!("unknown forward property: {}", sub.name),
            }
        }

        tracing::info!("[forward] {} upstream(s), policy {:?}", upstreams.len(), policy);
        Ok(Self { upstreams, policy, timeout: wait })
    }

    async fn exchange(&self, raw: &[u8], upstream: &str) -> Result<Vec<u8>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.send_to(raw, upstream).await?;
        let mut buf = vec![0u8; 4096];
        let (n, _) = timeout(self.timeout, socket.recv_from(&mut buf)).await??;
        buf.truncate(n);
        Ok(buf)
    }
}

#[async_trait]
impl Handler for Forward {
    fn name(&self) -> &str {
        "forward"
    }

    async fn serve_dns(
        &self,
        w: &mut dyn ResponseWriter,
        r: &DnsMessage,
        _next: Next<'_>,
    ) -> HandlerResult {
        let mut order: Vec<&String> = self.upstreams.iter().collect();
        if self.policy == Policy::Random {
            order.shuffle(&mut rand::thread_rng());
        }

        for upstream in order {
            match self.exchange(&r.raw, upstream).await {
                Ok(bytes) => {
                    let resp = match DnsMessage::from_wire(bytes) {
                        Ok(resp) => resp,
                        Err(e) => {
                            tracing::debug!("[forward] bad reply from {}: {}", upstream, e);
                            continue;
                        }
                    };
                    let rcode = resp.header.flags.rcode;
                    if let Err(e) = w.write_msg(&resp).await {
                        return (RCODE_SERVFAIL, Some(e));
                    }
                    return (rcode, None);
                }
                Err(e) => {
                    tracing::debug!("[forward] upstream {} failed: {}", upstream, e);
                }
            }
        }
        (
            RCODE_SERVFAIL,
            Some(anyhow!("all upstreams failed for {}", r.qname())),
        )
    }

    fn priority(&self) -> u8 {
        100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_parsing() {
        let directive = Directive {
            name: "forward".to_string(),
            args: vec![".".to_string(), "192.0.2.53".to_string(), "198.51.100.1:5353".to_string()],
            block: vec![Directive {
                name: "policy".to_string(),
                args: vec!["random".to_string()],
                ..Default::default()
            }],
        };
        let forward = Forward::from_directive(&directive).unwrap();
        assert_eq!(forward.upstreams, vec!["192.0.2.53:53", "198.51.100.1:5353"]);
        assert_eq!(forward.policy, Policy::Random);
    }

    #[test]
    fn requires_an_upstream() {
        let directive = Directive { name: "forward".to_string(), ..Default::default() };
        assert!(Forward::from_directive(&directive).is_err());
    }
}
