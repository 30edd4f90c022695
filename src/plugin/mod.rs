//! The handler chain: every directive in a zone block becomes a handler,
//! queries run through the handlers in priority order, and each handler
//! either answers through the response writer or hands off to the rest of
//! the chain.

pub mod dnstest;
pub mod forward;
pub mod log;
pub mod replacer;
pub mod response;
pub mod whoami;

use crate::config::Directive;
use crate::types::{DnsMessage, RCODE_SERVFAIL};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::net::SocketAddr;

/// Status code and error pair every handler returns. The pair is mirrored
/// out of the chain unmodified; a handler reporting an error still reports
/// the rcode it settled on.
pub type HandlerResult = (u8, Option<anyhow::Error>);

/// Destination for a response message. Concrete writers deliver over UDP or
/// TCP; wrappers may observe the message on its way through.
#[async_trait]
pub trait ResponseWriter: Send {
    fn remote_addr(&self) -> Option<SocketAddr>;
    async fn write_msg(&mut self, msg: &DnsMessage) -> Result<()>;
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    async fn serve_dns(
        &self,
        w: &mut dyn ResponseWriter,
        r: &DnsMessage,
        next: Next<'_>,
    ) -> HandlerResult;

    /// Fixed position in the chain; higher runs earlier, independent of the
    /// order directives appear in the config.
    fn priority(&self) -> u8;
}

/// The remainder of a zone's handler list. Invoking it runs the next handler
/// in order with the tail after it.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Box<dyn Handler>],
}

impl<'a> Next<'a> {
    pub fn new(handlers: &'a [Box<dyn Handler>]) -> Self {
        Self { rest: handlers }
    }

    pub async fn invoke(self, w: &mut dyn ResponseWriter, r: &DnsMessage) -> HandlerResult {
        match self.rest.split_first() {
            Some((handler, rest)) => handler.serve_dns(w, r, Next { rest }).await,
            None => (RCODE_SERVFAIL, Some(anyhow!("no handler answered the query"))),
        }
    }
}

/// Reports whether `name` lies inside `zone`: equal to it or below it on a
/// label boundary. The root zone "." contains everything.
pub fn zone_matches(zone: &str, name: &str) -> bool {
    let zone = normalize_name(zone);
    let name = normalize_name(name);
    if zone == "." {
        return true;
    }
    if name == zone {
        return true;
    }
    name.len() > zone.len()
        && name.ends_with(zone.as_str())
        && name.as_bytes()[name.len() - zone.len() - 1] == b'.'
}

/// Lowercase a domain name and guarantee a trailing dot.
pub fn normalize_name(name: &str) -> String {
    let mut n = name.to_ascii_lowercase();
    if !n.ends_with('.') {
        n.push('.');
    }
    n
}

pub fn create_handler(directive: &Directive, zone: &str) -> Result<Box<dyn Handler>> {
    match directive.name.as_str() {
        "log" => Ok(Box::new(log::Logger::from_directive(directive, zone)?)),
        "forward" => Ok(Box::new(forward::Forward::from_directive(directive)?)),
        "whoami" => Ok(Box::new(whoami::Whoami::from_directive(directive)?)),
        _ => anyhow::bail!("unknown directive: {}", directive.name),
    }
}
