use async_trait::async_trait;
use sb_common::Exchange;
use tracing::{debug, error, info, trace, warn, Level};

use super::Processor;

/// Logs a rendered template for every exchange.
///
/// Placeholders: `${body}`, `${exchangeId}`, `${header.<name>}` and
/// `${property.<name>}`. Unknown placeholders render empty.
pub struct LogProcessor {
    template: String,
    level: Level,
}

impl LogProcessor {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            level: Level::INFO,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn render(&self, exchange: &Exchange) -> String {
        render_template(&self.template, exchange)
    }
}

#[async_trait]
impl Processor for LogProcessor {
    async fn process(&self, exchange: &mut Exchange) {
        let line = self.render(exchange);
        let id = exchange.id();
        match self.level {
            Level::TRACE => trace!(exchange_id = %id, "{}", line),
            Level::DEBUG => debug!(exchange_id = %id, "{}", line),
            Level::INFO => info!(exchange_id = %id, "{}", line),
            Level::WARN => warn!(exchange_id = %id, "{}", line),
            _ => error!(exchange_id = %id, "{}", line),
        }
    }

    fn label(&self) -> String {
        format!("log[{}]", self.template)
    }
}

pub(crate) fn render_template(template: &str, exchange: &Exchange) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        out.push_str(&resolve_placeholder(&after[..end], exchange));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn resolve_placeholder(name: &str, exchange: &Exchange) -> String {
    let message = exchange.current();
    match name {
        "body" => message.body().as_text().map(|t| t.into_owned()).unwrap_or_default(),
        "exchangeId" => exchange.id().to_string(),
        _ => {
            if let Some(header) = name.strip_prefix("header.") {
                message.header_str(header).map(|h| h.into_owned()).unwrap_or_default()
            } else if let Some(property) = name.strip_prefix("property.") {
                match exchange.property(property) {
                    Some(sb_common::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                }
            } else {
                String::new()
            }
        }
    }
}
