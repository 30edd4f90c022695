//! Corefile-style configuration: zone blocks holding handler directives.

use crate::plugin::{create_handler, Handler};
use anyhow::{bail, Context, Result};
use std::time::Duration;

/// One parsed directive: its name, inline arguments, and nested block.
#[derive(Clone, Debug, Default)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    pub block: Vec<Directive>,
}

pub struct Config {
    pub zones: Vec<ZoneConfig>,
}

pub struct ZoneConfig {
    pub name: String,
    pub handlers: Vec<Box<dyn Handler>>,
}

impl ZoneConfig {
    /// Zone origin without the optional ":port" suffix.
    pub fn origin(&self) -> &str {
        split_zone_port(&self.name).0
    }

    pub fn port(&self) -> u16 {
        split_zone_port(&self.name).1
    }
}

/// Split "example.org.:1053" into origin and port; the port defaults to 53.
pub fn split_zone_port(name: &str) -> (&str, u16) {
    match name.rsplit_once(':') {
        Some((zone, port)) => (zone, port.parse().unwrap_or(53)),
        None => (name, 53),
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Text(String),
    OpenBrace,
    CloseBrace,
    Newline,
}

struct RawZone {
    name: String,
    directives: Vec<Directive>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let tokens = lex(content);
        let raw_zones = parse_tokens(&tokens)?;
        let mut zones = Vec::new();

        for raw in raw_zones {
            let origin = split_zone_port(&raw.name).0.to_string();
            let mut handlers = Vec::new();
            for directive in &raw.directives {
                let handler = create_handler(directive, &origin)
                    .with_context(|| format!("zone '{}'", raw.name))?;
                handlers.push(handler);
            }
            // Chain order is fixed by handler priority, not by the order
            // directives appear in the file.
            handlers.sort_by(|a, b| b.priority().cmp(&a.priority()));
            zones.push(ZoneConfig { name: raw.name, handlers });
        }
        Ok(Config { zones })
    }
}

fn lex(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c == '\n' {
            tokens.push(Token::Newline);
            chars.next();
        } else if c.is_whitespace() {
            chars.next();
        } else if c == '#' {
            while let Some(&c) = chars.peek() {
                if c == '\n' {
                    break;
                }
                chars.next();
            }
        } else if c == '{' {
            // Format templates with braces must be quoted; a bare brace
            // always opens a block.
            tokens.push(Token::OpenBrace);
            chars.next();
        } else if c == '}' {
            tokens.push(Token::CloseBrace);
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut s = String::new();
            while let Some(&c) = chars.peek() {
                if c == '"' {
                    chars.next();
                    break;
                }
                s.push(c);
                chars.next();
            }
            tokens.push(Token::Text(s));
        } else {
            let mut s = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '#' || c == '{' || c == '}' || c == '"' {
                    break;
                }
                s.push(c);
                chars.next();
            }
            tokens.push(Token::Text(s));
        }
    }
    tokens
}

fn parse_tokens(tokens: &[Token]) -> Result<Vec<RawZone>> {
    let mut i = 0;
    let mut zones = Vec::new();
    let mut zone_names: Vec<String> = Vec::new();
    while i < tokens.len() {
        match &tokens[i] {
            Token::Text(s) => {
                zone_names.push(s.clone());
                i += 1;
            }
            Token::OpenBrace => {
                if zone_names.is_empty() {
                    bail!("zone block without a zone name");
                }
                i += 1;
                let (directives, next_i) = parse_block(tokens, i)?;
                i = next_i;
                for name in zone_names.drain(..) {
                    zones.push(RawZone { name, directives: directives.clone() });
                }
            }
            Token::Newline => {
                i += 1;
                zone_names.clear();
            }
            Token::CloseBrace => {
                bail!("unbalanced '}}' at top level");
            }
        }
    }
    Ok(zones)
}

fn parse_block(tokens: &[Token], mut i: usize) -> Result<(Vec<Directive>, usize)> {
    let mut directives = Vec::new();
    while i < tokens.len() {
        match &tokens[i] {
            Token::Newline => {
                i += 1;
            }
            Token::CloseBrace => {
                return Ok((directives, i + 1));
            }
            Token::Text(name) => {
                let directive_name = name.clone();
                i += 1;
                let mut args = Vec::new();
                let mut block = Vec::new();
                while i < tokens.len() {
                    match &tokens[i] {
                        Token::Text(arg) => {
                            args.push(arg.clone());
                            i += 1;
                        }
                        Token::OpenBrace => {
                            i += 1;
                            let (sub, next_i) = parse_block(tokens, i)?;
                            block = sub;
                            i = next_i;
                            break;
                        }
                        Token::Newline | Token::CloseBrace => break,
                    }
                }
                directives.push(Directive { name: directive_name, args, block });
            }
            Token::OpenBrace => {
                bail!("unexpected '{{' inside block");
            }
        }
    }
    bail!("unterminated block")
}

/// Parse "250ms", "5s", "3m" or "1h" into a duration.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") {
        Ok(Duration::from_millis(stripped.parse()?))
    } else if let Some(stripped) = s.strip_suffix('s') {
        Ok(Duration::from_secs(stripped.parse()?))
    } else if let Some(stripped) = s.strip_suffix('m') {
        Ok(Duration::from_secs(stripped.parse::<u64>()? * 60))
    } else if let Some(stripped) = s.strip_suffix('h') {
        Ok(Duration::from_secs(stripped.parse::<u64>()? * 3600))
    } else {
        bail!("invalid duration: '{}'", s)
    }
}
