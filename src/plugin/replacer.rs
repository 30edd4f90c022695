//! Placeholder substitution for query log lines. Placeholders are resolved
//! against the request and the recorded response; `{>x}` names follow the
//! header-field convention of the classic access-log formats.

use crate::plugin::dnstest::ResponseRecorder;
use crate::types::{rcode_to_str, DnsMessage};
use chrono::Local;

/// Substituted when a placeholder has no data to draw from.
pub const EMPTY_VALUE: &str = "-";

/// Render `format`, replacing every known `{placeholder}`. Unknown
/// placeholders are left verbatim so typos surface in the output.
pub fn replace(req: &DnsMessage, recorder: &ResponseRecorder<'_>, format: &str) -> String {
    let mut out = String::with_capacity(format.len() + 64);
    let mut rest = format;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&resolve(&after[..end], req, recorder));
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve(key: &str, req: &DnsMessage, recorder: &ResponseRecorder<'_>) -> String {
    match key {
        "name" => req.qname(),
        "type" => req.qtype_str(),
        "class" => req.qclass_str(),
        "proto" => {
            if req.protocol.is_empty() {
                EMPTY_VALUE.to_string()
            } else {
                req.protocol.clone()
            }
        }
        "size" => req.raw.len().to_string(),
        "remote" => req
            .client_addr
            .map(|a| a.ip().to_string())
            .unwrap_or_else(|| EMPTY_VALUE.to_string()),
        "port" => req
            .client_addr
            .map(|a| a.port().to_string())
            .unwrap_or_else(|| EMPTY_VALUE.to_string()),
        "when" => Local::now().format("%d/%b/%Y:%H:%M:%S %z").to_string(),
        ">id" => req.header.id.to_string(),
        ">opcode" => req.header.flags.opcode.to_string(),
        ">do" => req.opt.map(|o| o.do_bit).unwrap_or(false).to_string(),
        ">bufsize" => req.opt.map(|o| o.bufsize).unwrap_or(512).to_string(),
        "rcode" => recorder
            .msg
            .as_ref()
            .map(|m| rcode_to_str(m.header.flags.rcode))
            .unwrap_or_else(|| EMPTY_VALUE.to_string()),
        ">rflags" => match recorder.msg.as_ref() {
            Some(m) => {
                let names = m.header.flags.names();
                if names.is_empty() {
                    EMPTY_VALUE.to_string()
                } else {
                    names
                }
            }
            None => EMPTY_VALUE.to_string(),
        },
        "rsize" => recorder.rsize.to_string(),
        "duration" => format!("{:?}", recorder.start.elapsed()),
        _ => format!("{{{}}}", key),
    }
}
