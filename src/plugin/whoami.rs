//! Built-in responder that answers A/AAAA queries with the client's own
//! address plus an SRV record carrying the source port. Handy as a terminal
//! handler when testing the chain end to end.

use crate::config::Directive;
use crate::plugin::{Handler, HandlerResult, Next, ResponseWriter};
use crate::types::{encode_name, DnsMessage, RCODE_SERVFAIL, TYPE_A, TYPE_AAAA, TYPE_SRV};
use anyhow::Result;
use async_trait::async_trait;
use std::net::IpAddr;

pub struct Whoami;

impl Whoami {
    pub fn from_directive(_directive: &Directive) -> Result<Self> {
        Ok(Self)
    }
}

#[async_trait]
impl Handler for Whoami {
    fn name(&self) -> &str {
        "whoami"
    }

    async fn serve_dns(
        &self,
        w: &mut dyn ResponseWriter,
        r: &DnsMessage,
        next: Next<'_>,
    ) -> HandlerResult {
        let (Some(question), Some(client)) = (r.question.as_ref(), r.client_addr) else {
            return next.invoke(w, r).await;
        };
        if question.qtype != TYPE_A && question.qtype != TYPE_AAAA {
            return next.invoke(w, r).await;
        }

        let mut buf = Vec::with_capacity(512);
        buf.extend_from_slice(&r.header.id.to_be_bytes());
        buf.extend_from_slice(&[0x81, 0x80]); // qr + rd + ra
        buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01]);

        let qname = encode_name(&question.name);
        buf.extend_from_slice(&qname);
        buf.extend_from_slice(&question.qtype.to_be_bytes());
        buf.extend_from_slice(&question.qclass.to_be_bytes());

        // Answer: the client's own address, TTL 0, owner compressed to the
        // question name.
        buf.extend_from_slice(&[0xC0, 0x0C]);
        match client.ip() {
            IpAddr::V4(ip) => {
                buf.extend_from_slice(&TYPE_A.to_be_bytes());
                buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04]);
                buf.extend_from_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                buf.extend_from_slice(&TYPE_AAAA.to_be_bytes());
                buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10]);
                buf.extend_from_slice(&ip.octets());
            }
        }

        // Additional: SRV under _proto.<qname> exposing the source port.
        let proto_label: &[u8] = if r.protocol == "tcp" { b"_tcp" } else { b"_udp" };
        buf.push(proto_label.len() as u8);
        buf.extend_from_slice(proto_label);
        buf.extend_from_slice(&[0xC0, 0x0C]);
        buf.extend_from_slice(&TYPE_SRV.to_be_bytes());
        buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07]);
        buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        buf.extend_from_slice(&client.port().to_be_bytes());
        buf.push(0x00); // root target

        let resp = match DnsMessage::from_wire(buf) {
            Ok(resp) => resp,
            Err(e) => return (RCODE_SERVFAIL, Some(e)),
        };
        if let Err(e) = w.write_msg(&resp).await {
            return (RCODE_SERVFAIL, Some(e));
        }
        (0, None)
    }

    fn priority(&self) -> u8 {
        200
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::dnstest::MemoryWriter;
    use crate::types::{DnsHeader, DnsQuestion};

    fn query(qtype: u16) -> DnsMessage {
        DnsMessage {
            header: DnsHeader { id: 7, question_count: 1, ..Default::default() },
            question: Some(DnsQuestion {
                name: "whoami.example.org.".to_string(),
                qtype,
                qclass: 1,
            }),
            raw: vec![0; 37],
            client_addr: Some("203.0.113.9:3333".parse().unwrap()),
            protocol: "udp".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn answers_a_query_with_client_address() {
        let whoami = Whoami;
        let mut w = MemoryWriter::default();
        let (rc, err) = whoami.serve_dns(&mut w, &query(TYPE_A), Next::new(&[])).await;
        assert_eq!(rc, 0);
        assert!(err.is_none());
        let resp = &w.written[0];
        assert_eq!(resp.header.id, 7);
        assert!(resp.header.flags.qr);
        assert_eq!(resp.header.answer_count, 1);
        assert_eq!(resp.header.additional_count, 1);
        assert!(resp.raw.ends_with(&[0x0D, 0x05, 0x00])); // port 3333, root target
    }

    #[tokio::test]
    async fn non_address_queries_fall_through() {
        let whoami = Whoami;
        let mut w = MemoryWriter::default();
        let (rc, err) = whoami.serve_dns(&mut w, &query(16), Next::new(&[])).await;
        // Empty tail: the chain reports nobody answered.
        assert_eq!(rc, RCODE_SERVFAIL);
        assert!(err.is_some());
        assert!(w.written.is_empty());
    }
}
