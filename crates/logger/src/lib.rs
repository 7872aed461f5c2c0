//! Logger initialization shared by binaries and tests.

use jiff::{Timestamp, Zoned, tz::TimeZone};
use logforth::{append::Stderr, filter::EnvFilter, layout::Layout};
use std::{fmt::Write, io::IsTerminal, str::FromStr, sync::Once};

static INIT: Once = Once::new();

const DEFAULT_FILTER: &str = "info";

/// Formats records as `<utc timestamp> <level>  <target>: <message>`.
#[derive(Debug)]
pub struct UtcLayout {
    no_color: bool,
}

impl Default for UtcLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl UtcLayout {
    pub fn new() -> Self {
        Self { no_color: false }
    }

    pub fn no_color(mut self) -> Self {
        self.no_color = true;
        self
    }

    fn render(&self, now: Timestamp, record: &log::Record<'_>) -> anyhow::Result<String> {
        let mut output = String::new();
        let now = Zoned::new(now, TimeZone::UTC);

        write!(output, "{} ", now.strftime("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = record.level();

        if self.no_color {
            write!(output, "{level:>5}  ")?;
        } else {
            let color = match level {
                log::Level::Error => 31,
                log::Level::Warn => 33,
                log::Level::Info => 32,
                log::Level::Debug => 34,
                log::Level::Trace => 35,
            };

            write!(output, "\x1b[{color}m{level:>5}\x1b[0m  ")?;
        }

        write!(output, "{}: {}", record.target(), record.args())?;

        Ok(output)
    }
}

impl Layout for UtcLayout {
    fn format(
        &self,
        record: &log::Record<'_>,
        _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        Ok(self.render(Timestamp::now(), record)?.into_bytes())
    }
}

/// Installs the global stderr logger once.
///
/// The filter uses env-filter syntax, e.g. `info` or `llm=debug,config=warn`.
/// An unparsable filter falls back to `info`.
pub fn init(log_filter: &str) {
    let log_filter = log_filter.to_owned();
    INIT.call_once(move || apply_logger(log_filter));
}

fn apply_logger(log_filter: String) {
    logforth::builder()
        .dispatch(move |d| {
            let filter = EnvFilter::from_str(&log_filter)
                .unwrap_or_else(|_| EnvFilter::from_str(DEFAULT_FILTER).expect("default filter should be valid"));

            let layout = if std::io::stderr().is_terminal() {
                UtcLayout::new()
            } else {
                UtcLayout::new().no_color()
            };

            d.filter(filter).append(Stderr::default().with_layout(layout))
        })
        .apply();
}
