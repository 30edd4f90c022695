//! Rule-driven query logging.
//!
//! A `log` directive attaches an ordered list of rules to a zone. For each
//! query the first rule whose scope contains the query name decides whether
//! a formatted line is written, based on the response class and an optional
//! slow-query threshold. Whatever the decision, the rest of the chain runs
//! exactly as it would without logging.

use crate::config::{parse_duration, Directive};
use crate::plugin::dnstest::ResponseRecorder;
use crate::plugin::response::{classify, typify, ResponseClass};
use crate::plugin::{normalize_name, replacer, zone_matches, Handler, HandlerResult, Next, ResponseWriter};
use crate::types::DnsMessage;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// The classic access-log shape.
pub const COMMON_LOG_FORMAT: &str = "{remote}:{port} - {>id} \"{type} {class} {name} {proto} {size} {>do} {>bufsize}\" {rcode} {>rflags} {rsize} {duration}";
/// Common format plus the quoted opcode.
pub const COMBINED_LOG_FORMAT: &str = "{remote}:{port} - {>id} \"{type} {class} {name} {proto} {size} {>do} {>bufsize}\" {rcode} {>rflags} {rsize} {duration} \"{>opcode}\"";
pub const DEFAULT_LOG_FORMAT: &str = COMMON_LOG_FORMAT;

/// One logging policy: the zone it covers, the response classes that
/// trigger a line, the line format, and an optional latency threshold that
/// triggers regardless of class (zero disables it).
#[derive(Clone, Debug)]
pub struct Rule {
    pub name_scope: String,
    pub class: HashSet<ResponseClass>,
    pub format: String,
    pub min_duration: Duration,
}

/// Destination for rendered lines, injected at construction so tests can
/// capture output. The default writes through `tracing`.
pub trait LogSink: Send + Sync {
    fn emit(&self, line: &str) -> Result<()>;
}

pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, line: &str) -> Result<()> {
        tracing::info!(target: "query", "{}", line);
        Ok(())
    }
}

pub struct Logger {
    rules: Vec<Rule>,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new(rules: Vec<Rule>, sink: Arc<dyn LogSink>) -> Self {
        Self { rules, sink }
    }

    pub fn from_directive(directive: &Directive, zone: &str) -> Result<Self> {
        Self::with_sink(directive, zone, Arc::new(TracingSink))
    }

    /// Build rules from `log [NAMES...] [FORMAT] { class ...; duration ... }`.
    /// NAMES default to the enclosing zone; FORMAT is `common`, `combined`,
    /// or any argument containing `{`.
    pub fn with_sink(directive: &Directive, zone: &str, sink: Arc<dyn LogSink>) -> Result<Self> {
        let mut names = Vec::new();
        let mut format = DEFAULT_LOG_FORMAT.to_string();
        for arg in &directive.args {
            match arg.as_str() {
                "common" => format = COMMON_LOG_FORMAT.to_string(),
                "combined" => format = COMBINED_LOG_FORMAT.to_string(),
                a if a.contains('{') => format = a.to_string(),
                a => names.push(normalize_name(a)),
            }
        }
        if names.is_empty() {
            names.push(normalize_name(zone));
        }

        let mut class = HashSet::new();
        let mut min_duration = Duration::ZERO;
        for sub in &directive.block {
            match sub.name.as_str() {
                "class" => {
                    for arg in &sub.args {
                        class.insert(arg.parse()?);
                    }
                }
                "duration" => {
                    if let Some(arg) = sub.args.first() {
                        min_duration = parse_duration(arg)?;
                    }
                }
                _ => anyhow::bail!("unknown log property: {}", sub.name),
            }
        }
        // No configured classes means the wildcard: a bare `log` line logs
        // every matched query.
        if class.is_empty() {
            class.insert(ResponseClass::All);
        }

        tracing::info!("[log] {} rule(s) for zones {:?}", names.len(), names);

        let rules = names
            .into_iter()
            .map(|name_scope| Rule {
                name_scope,
                class: class.clone(),
                format: format.clone(),
                min_duration,
            })
            .collect();
        Ok(Self::new(rules, sink))
    }
}

#[async_trait]
impl Handler for Logger {
    fn name(&self) -> &str {
        "log"
    }

    async fn serve_dns(
        &self,
        w: &mut dyn ResponseWriter,
        r: &DnsMessage,
        next: Next<'_>,
    ) -> HandlerResult {
        let qname = r.qname();
        // First matching scope wins; no scope means pure passthrough.
        let Some(rule) = self.rules.iter().find(|rule| zone_matches(&rule.name_scope, &qname)) else {
            return next.invoke(w, r).await;
        };

        let mut rrw = ResponseRecorder::new(w);
        let (rc, err) = next.invoke(&mut rrw, r).await;

        let class = classify(typify(rrw.msg.as_ref(), Utc::now()));
        // All three triggers are computed on every query so none can mask
        // another.
        let any_class = rule.class.contains(&ResponseClass::All);
        let class_hit = rule.class.contains(&class);
        let slow = !rule.min_duration.is_zero() && rrw.start.elapsed() >= rule.min_duration;
        if any_class || class_hit || slow {
            let line = replacer::replace(r, &rrw, &rule.format);
            // Best effort: a failing sink never reaches the response path.
            if let Err(e) = self.sink.emit(&line) {
                tracing::warn!("[log] failed to write query log: {}", e);
            }
        }

        (rc, err)
    }

    fn priority(&self) -> u8 {
        255
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::dnstest::MemoryWriter;
    use crate::types::{DnsHeader, DnsQuestion, HeaderFlags, RCODE_SERVFAIL, TYPE_A};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySink {
        lines: Mutex<Vec<String>>,
    }

    impl MemorySink {
        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl LogSink for MemorySink {
        fn emit(&self, line: &str) -> Result<()> {
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }

    /// Terminal handler writing a canned response, optionally slowly and
    /// optionally with an error.
    struct Responder {
        rcode: u8,
        answers: u16,
        delay: Duration,
        err: Option<String>,
    }

    impl Responder {
        fn ok() -> Self {
            Self { rcode: 0, answers: 1, delay: Duration::ZERO, err: None }
        }
    }

    #[async_trait]
    impl Handler for Responder {
        fn name(&self) -> &str {
            "responder"
        }

        async fn serve_dns(
            &self,
            w: &mut dyn ResponseWriter,
            r: &DnsMessage,
            _next: Next<'_>,
        ) -> HandlerResult {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let resp = DnsMessage {
                header: DnsHeader {
                    id: r.header.id,
                    flags: HeaderFlags { qr: true, rcode: self.rcode, ..Default::default() },
                    answer_count: self.answers,
                    ..Default::default()
                },
                question: r.question.clone(),
                raw: vec![0xAB; 32],
                ..Default::default()
            };
            let _ = w.write_msg(&resp).await;
            (self.rcode, self.err.as_ref().map(|m| anyhow::anyhow!(m.clone())))
        }

        fn priority(&self) -> u8 {
            0
        }
    }

    fn query(name: &str) -> DnsMessage {
        DnsMessage {
            header: DnsHeader { id: 42, question_count: 1, ..Default::default() },
            question: Some(DnsQuestion { name: name.to_string(), qtype: TYPE_A, qclass: 1 }),
            raw: vec![0; 29],
            client_addr: Some("10.0.0.1:5353".parse().unwrap()),
            protocol: "udp".to_string(),
            ..Default::default()
        }
    }

    fn rule(scope: &str, classes: &[ResponseClass], format: &str, min: Duration) -> Rule {
        Rule {
            name_scope: scope.to_string(),
            class: classes.iter().copied().collect(),
            format: format.to_string(),
            min_duration: min,
        }
    }

    async fn run(
        rules: Vec<Rule>,
        responder: Responder,
        name: &str,
    ) -> (Arc<MemorySink>, MemoryWriter, HandlerResult) {
        let sink = Arc::new(MemorySink::default());
        let logger = Logger::new(rules, sink.clone());
        let chain: Vec<Box<dyn Handler>> = vec![Box::new(responder)];
        let mut w = MemoryWriter::default();
        let result = logger.serve_dns(&mut w, &query(name), Next::new(&chain)).await;
        (sink, w, result)
    }

    #[tokio::test]
    async fn passthrough_when_no_rule_matches() {
        let rules = vec![rule("example.net.", &[ResponseClass::All], "{name}", Duration::ZERO)];
        let (sink, w, (rc, err)) = run(rules, Responder::ok(), "www.example.org.").await;
        assert!(sink.lines().is_empty());
        assert_eq!(rc, 0);
        assert!(err.is_none());
        // The response reaches the real writer bit for bit.
        assert_eq!(w.written.len(), 1);
        assert_eq!(w.written[0].raw, vec![0xAB; 32]);
    }

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let rules = vec![
            rule("example.net.", &[ResponseClass::All], "first {name}", Duration::ZERO),
            rule("example.org.", &[ResponseClass::All], "second {name}", Duration::ZERO),
            rule(".", &[ResponseClass::All], "third {name}", Duration::ZERO),
        ];
        let (sink, _, _) = run(rules, Responder::ok(), "www.example.org.").await;
        let lines = sink.lines();
        assert_eq!(lines, vec!["second www.example.org.".to_string()]);
    }

    #[tokio::test]
    async fn bare_directive_defaults_to_wildcard_class() {
        let sink = Arc::new(MemorySink::default());
        let directive = Directive { name: "log".to_string(), ..Default::default() };
        let logger = Logger::with_sink(&directive, "example.org.", sink.clone()).unwrap();
        let chain: Vec<Box<dyn Handler>> =
            vec![Box::new(Responder { rcode: RCODE_SERVFAIL, answers: 0, delay: Duration::ZERO, err: None })];
        let mut w = MemoryWriter::default();
        let (rc, _) = logger.serve_dns(&mut w, &query("www.example.org."), Next::new(&chain)).await;
        assert_eq!(rc, RCODE_SERVFAIL);
        // Error-class response still logged: unset classes mean "all".
        assert_eq!(sink.lines().len(), 1);
    }

    #[tokio::test]
    async fn slow_query_triggers_without_class_match() {
        let rules = vec![rule(".", &[ResponseClass::Error], "{name}", Duration::from_millis(50))];
        let slow = Responder { delay: Duration::from_millis(60), ..Responder::ok() };
        let (sink, _, _) = run(rules, slow, "www.example.org.").await;
        assert_eq!(sink.lines().len(), 1);
    }

    #[tokio::test]
    async fn fast_success_is_not_logged_under_error_class() {
        let rules = vec![rule(".", &[ResponseClass::Error], "{name}", Duration::from_millis(50))];
        let (sink, _, _) = run(rules, Responder::ok(), "www.example.org.").await;
        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn fast_error_triggers_by_class_alone() {
        let rules = vec![rule(".", &[ResponseClass::Error], "{name}", Duration::from_millis(50))];
        let servfail = Responder { rcode: RCODE_SERVFAIL, answers: 0, delay: Duration::ZERO, err: None };
        let (sink, _, _) = run(rules, servfail, "www.example.org.").await;
        assert_eq!(sink.lines().len(), 1);
    }

    #[tokio::test]
    async fn downstream_errors_pass_through_unchanged() {
        for scope in ["example.org.", "example.net."] {
            let rules = vec![rule(scope, &[ResponseClass::All], "{name}", Duration::ZERO)];
            let failing = Responder {
                rcode: RCODE_SERVFAIL,
                answers: 0,
                delay: Duration::ZERO,
                err: Some("upstream unreachable".to_string()),
            };
            let (_, _, (rc, err)) = run(rules, failing, "www.example.org.").await;
            assert_eq!(rc, RCODE_SERVFAIL);
            assert!(err.unwrap().to_string().contains("upstream unreachable"));
        }
    }

    #[tokio::test]
    async fn logged_line_renders_name_and_rcode() {
        let rules = vec![rule("example.org.", &[ResponseClass::All], "{name} {rcode}", Duration::ZERO)];
        let (sink, _, (rc, err)) = run(rules, Responder::ok(), "www.example.org.").await;
        assert_eq!(rc, 0);
        assert!(err.is_none());
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("www.example.org. NOERROR"));
    }

    #[test]
    fn directive_parsing_classes_and_duration() {
        let directive = Directive {
            name: "log".to_string(),
            args: vec!["example.org".to_string(), "combined".to_string()],
            block: vec![
                Directive {
                    name: "class".to_string(),
                    args: vec!["denial".to_string(), "error".to_string()],
                    ..Default::default()
                },
                Directive {
                    name: "duration".to_string(),
                    args: vec!["250ms".to_string()],
                    ..Default::default()
                },
            ],
        };
        let logger = Logger::from_directive(&directive, ".").unwrap();
        assert_eq!(logger.rules.len(), 1);
        let rule = &logger.rules[0];
        assert_eq!(rule.name_scope, "example.org.");
        assert_eq!(rule.format, COMBINED_LOG_FORMAT);
        assert_eq!(rule.min_duration, Duration::from_millis(250));
        assert!(rule.class.contains(&ResponseClass::Denial));
        assert!(rule.class.contains(&ResponseClass::Error));
        assert!(!rule.class.contains(&ResponseClass::All));
    }

    #[test]
    fn unknown_block_property_is_rejected() {
        let directive = Directive {
            name: "log".to_string(),
            block: vec![Directive { name: "sample".to_string(), ..Default::default() }],
            ..Default::default()
        };
        assert!(Logger::from_directive(&directive, ".").is_err());
    }
}
