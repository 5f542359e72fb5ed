//! `tracing` integration: events emitted by the runtime and by plugin code
//! end up in the host's log sink.
//!
//! [`HostLogLayer`] is a `tracing-subscriber` layer that renders each event
//! as `message key=value ...` and hands it to [`Host::log`]. [`init`]
//! installs it as the global default with a level filter taken from the
//! host's current log level, so events the host would discard are never
//! formatted.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Context as _;
use tracing::Event;
use tracing::Level;
use tracing::Subscriber;
use tracing::field::Field;
use tracing::field::Visit;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::host::Host;
use crate::types::LogLevel;

/// Forwards `tracing` events to the host log.
pub struct HostLogLayer<H> {
    host: Arc<H>,
}

impl<H> HostLogLayer<H> {
    /// Layer forwarding every event to `host`.
    pub fn new(host: Arc<H>) -> Self {
        Self { host }
    }
}

impl<S, H> Layer<S> for HostLogLayer<H>
where
    S: Subscriber,
    H: Host + Send + Sync + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let level = host_level(*event.metadata().level());
        // Nowhere left to report a failing log sink.
        let _ = self.host.log(level, &visitor.finish());
    }
}

/// Map a `tracing` level onto the host's levels.
pub fn host_level(level: Level) -> LogLevel {
    match level {
        Level::TRACE => LogLevel::Trace,
        Level::DEBUG => LogLevel::Debug,
        Level::INFO => LogLevel::Info,
        Level::WARN => LogLevel::Warn,
        Level::ERROR => LogLevel::Error,
    }
}

/// Most verbose `tracing` level the host will keep at `level`.
pub fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Trace => LevelFilter::TRACE,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
        // Critical entries come only from fatal escalation.
        LogLevel::Critical => LevelFilter::OFF,
    }
}

/// Install [`HostLogLayer`] as the global subscriber.
///
/// Fails if the host log level cannot be read or a global subscriber is
/// already set.
pub fn init<H>(host: H) -> anyhow::Result<()>
where H: Host + Send + Sync + 'static {
    let level = host.get_log_level().context("failed to read host log level")?;
    let layer = HostLogLayer::new(Arc::new(host)).with_filter(level_filter(level));
    tracing_subscriber::registry().with(layer).try_init().context("failed to install host log subscriber")?;
    Ok(())
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.record_debug(field, &format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={value:?}", field.name());
    }
}
