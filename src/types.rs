//! Wire-level DNS message model shared by the server and the handler chain.

use anyhow::{bail, Result};
use std::net::SocketAddr;

pub const TYPE_A: u16 = 1;
pub const TYPE_SOA: u16 = 6;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;
pub const TYPE_OPT: u16 = 41;
pub const TYPE_IXFR: u16 = 251;
pub const TYPE_AXFR: u16 = 252;

pub const OPCODE_UPDATE: u8 = 5;

pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_NXDOMAIN: u8 = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: HeaderFlags,
    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderFlags {
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub rcode: u8,
}

impl HeaderFlags {
    fn from_u16(f: u16) -> Self {
        Self {
            qr: f & 0x8000 != 0,
            opcode: ((f >> 11) & 0x0F) as u8,
            aa: f & 0x0400 != 0,
            tc: f & 0x0200 != 0,
            rd: f & 0x0100 != 0,
            ra: f & 0x0080 != 0,
            rcode: (f & 0x000F) as u8,
        }
    }

    /// Comma-joined names of the set flags, e.g. "qr,rd,ra".
    pub fn names(&self) -> String {
        let mut out = Vec::new();
        if self.qr {
            out.push("qr");
        }
        if self.aa {
            out.push("aa");
        }
        if self.tc {
            out.push("tc");
        }
        if self.rd {
            out.push("rd");
        }
        if self.ra {
            out.push("ra");
        }
        out.join(",")
    }
}

#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// EDNS0 OPT data the query logger cares about.
#[derive(Debug, Clone, Copy)]
pub struct OptInfo {
    pub do_bit: bool,
    pub bufsize: u16,
}

#[derive(Debug, Clone, Default)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub question: Option<DnsQuestion>,
    pub opt: Option<OptInfo>,
    pub authority_has_soa: bool,

    /// The message exactly as it appears on the wire.
    pub raw: Vec<u8>,

    pub client_addr: Option<SocketAddr>,
    pub protocol: String,
    pub server_port: Option<u16>,
}

impl DnsMessage {
    /// Parse the header, the first question, and just enough of the record
    /// sections to know whether the authority section carries an SOA and
    /// whether an EDNS0 OPT record is present.
    pub fn from_wire(raw: Vec<u8>) -> Result<Self> {
        if raw.len() < 12 {
            bail!("message too short: {} bytes", raw.len());
        }
        let header = DnsHeader {
            id: u16::from_be_bytes([raw[0], raw[1]]),
            flags: HeaderFlags::from_u16(u16::from_be_bytes([raw[2], raw[3]])),
            question_count: u16::from_be_bytes([raw[4], raw[5]]),
            answer_count: u16::from_be_bytes([raw[6], raw[7]]),
            authority_count: u16::from_be_bytes([raw[8], raw[9]]),
            additional_count: u16::from_be_bytes([raw[10], raw[11]]),
        };

        let mut offset = 12;
        let mut question = None;
        if header.question_count > 0 {
            let (name, next) = read_name(&raw, offset)?;
            if next + 4 > raw.len() {
                bail!("truncated question section");
            }
            question = Some(DnsQuestion {
                name,
                qtype: u16::from_be_bytes([raw[next], raw[next + 1]]),
                qclass: u16::from_be_bytes([raw[next + 2], raw[next + 3]]),
            });
            offset = next + 4;
        }

        let mut opt = None;
        let mut authority_has_soa = false;
        let authority_start = header.answer_count as usize;
        let authority_end = authority_start + header.authority_count as usize;
        let total = authority_end + header.additional_count as usize;
        for i in 0..total {
            let Ok(next) = skip_name(&raw, offset) else {
                break;
            };
            if next + 10 > raw.len() {
                break;
            }
            let rtype = u16::from_be_bytes([raw[next], raw[next + 1]]);
            let rclass = u16::from_be_bytes([raw[next + 2], raw[next + 3]]);
            let ttl = u32::from_be_bytes([raw[next + 4], raw[next + 5], raw[next + 6], raw[next + 7]]);
            let rdlen = u16::from_be_bytes([raw[next + 8], raw[next + 9]]) as usize;
            if rtype == TYPE_SOA && i >= authority_start && i < authority_end {
                authority_has_soa = true;
            }
            if rtype == TYPE_OPT {
                // OPT reuses class as the UDP payload size and the top TTL
                // bit as DO.
                opt = Some(OptInfo { do_bit: ttl & 0x8000 != 0, bufsize: rclass });
            }
            offset = next + 10 + rdlen;
        }

        Ok(Self {
            header,
            question,
            opt,
            authority_has_soa,
            raw,
            ..Default::default()
        })
    }

    /// Query name as a lowercase FQDN, "." when the message has no question.
    pub fn qname(&self) -> String {
        self.question
            .as_ref()
            .map(|q| q.name.clone())
            .unwrap_or_else(|| ".".to_string())
    }

    pub fn qtype_str(&self) -> String {
        match self.question.as_ref().map(|q| q.qtype) {
            Some(t) => qtype_to_str(t),
            None => "-".to_string(),
        }
    }

    pub fn qclass_str(&self) -> String {
        match self.question.as_ref().map(|q| q.qclass) {
            Some(1) => "IN".to_string(),
            Some(3) => "CH".to_string(),
            Some(4) => "HS".to_string(),
            Some(255) => "ANY".to_string(),
            Some(c) => format!("CLASS{}", c),
            None => "-".to_string(),
        }
    }
}

pub fn qtype_to_str(qtype: u16) -> String {
    match qtype {
        1 => "A".to_string(),
        2 => "NS".to_string(),
        5 => "CNAME".to_string(),
        6 => "SOA".to_string(),
        12 => "PTR".to_string(),
        15 => "MX".to_string(),
        16 => "TXT".to_string(),
        28 => "AAAA".to_string(),
        33 => "SRV".to_string(),
        41 => "OPT".to_string(),
        251 => "IXFR".to_string(),
        252 => "AXFR".to_string(),
        255 => "ANY".to_string(),
        t => format!("TYPE{}", t),
    }
}

pub fn rcode_to_str(rcode: u8) -> String {
    match rcode {
        0 => "NOERROR".to_string(),
        1 => "FORMERR".to_string(),
        2 => "SERVFAIL".to_string(),
        3 => "NXDOMAIN".to_string(),
        4 => "NOTIMP".to_string(),
        5 => "REFUSED".to_string(),
        r => format!("RCODE{}", r),
    }
}

/// Encode a dotted name into uncompressed wire labels.
pub fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 2);
    for label in name.split('.').filter(|l| !l.is_empty()) {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

fn read_name(buf: &[u8], mut offset: usize) -> Result<(String, usize)> {
    let mut name = String::new();
    loop {
        let Some(&len) = buf.get(offset) else {
            bail!("truncated name");
        };
        if len == 0 {
            offset += 1;
            break;
        }
        if len & 0xC0 != 0 {
            bail!("unexpected compression pointer in question name");
        }
        let end = offset + 1 + len as usize;
        if end > buf.len() {
            bail!("label out of bounds");
        }
        for &b in &buf[offset + 1..end] {
            name.push(b.to_ascii_lowercase() as char);
        }
        name.push('.');
        offset = end;
    }
    if name.is_empty() {
        name.push('.');
    }
    Ok((name, offset))
}

/// Step over a possibly compressed name, returning the offset just past it.
fn skip_name(buf: &[u8], mut offset: usize) -> Result<usize> {
    loop {
        let Some(&len) = buf.get(offset) else {
            bail!("truncated name");
        };
        if len == 0 {
            return Ok(offset + 1);
        }
        if len & 0xC0 == 0xC0 {
            return Ok(offset + 2);
        }
        offset += 1 + len as usize;
    }
}
