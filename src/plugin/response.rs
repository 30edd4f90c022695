//! Response typing and classification. The query logger only consumes the
//! coarse class when deciding whether a rule's class set covers a response.

use crate::types::{DnsMessage, OPCODE_UPDATE, RCODE_NOERROR, RCODE_NXDOMAIN, TYPE_AXFR, TYPE_IXFR};
use anyhow::bail;
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    NoError,
    NameError,
    NoData,
    Delegation,
    Meta,
    Update,
    OtherError,
}

/// Coarse outcome category of a response, the unit rules are configured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseClass {
    All,
    Success,
    Denial,
    Error,
}

/// Derive the response type of `msg`. The caller supplies the clock so
/// typing stays a pure function; a handler that never wrote a message types
/// as an error.
pub fn typify(msg: Option<&DnsMessage>, _now: DateTime<Utc>) -> ResponseType {
    let Some(msg) = msg else {
        return ResponseType::OtherError;
    };
    if msg.header.flags.opcode == OPCODE_UPDATE {
        return ResponseType::Update;
    }
    if let Some(q) = &msg.question {
        if q.qtype == TYPE_AXFR || q.qtype == TYPE_IXFR {
            return ResponseType::Meta;
        }
    }
    match msg.header.flags.rcode {
        RCODE_NOERROR => {
            if msg.header.answer_count > 0 {
                ResponseType::NoError
            } else if msg.authority_has_soa {
                ResponseType::NoData
            } else if msg.header.authority_count > 0 {
                ResponseType::Delegation
            } else {
                ResponseType::NoData
            }
        }
        RCODE_NXDOMAIN => ResponseType::NameError,
        _ => ResponseType::OtherError,
    }
}

pub fn classify(t: ResponseType) -> ResponseClass {
    match t {
        ResponseType::NoError | ResponseType::Delegation | ResponseType::Meta | ResponseType::Update => {
            ResponseClass::Success
        }
        ResponseType::NameError | ResponseType::NoData => ResponseClass::Denial,
        ResponseType::OtherError => ResponseClass::Error,
    }
}

impl std::str::FromStr for ResponseClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "success" => Ok(Self::Success),
            "denial" => Ok(Self::Denial),
            "error" => Ok(Self::Error),
            _ => bail!("unknown response class: {}", s),
        }
    }
}

impl fmt::Display for ResponseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::All => "all",
            Self::Success => "success",
            Self::Denial => "denial",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}
