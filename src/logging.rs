//! Log subscriber setup.
//!
//! Events pass an [`EnvFilter`] (`RUST_LOG` wins over the configured level),
//! then a per-callsite sampler, then one of two formatters: events at or above
//! `trace_level` are printed with their source location.

use crate::config::{LogFormat, LoggerConfig, SamplingConfig};
use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::callsite::Identifier;
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_subscriber::filter::{filter_fn, ParseError};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Length of one sampling window.
const SAMPLING_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    Level(String),

    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("could not install log subscriber: {0}")]
    Init(#[from] TryInitError),
}

fn parse_level(raw: &str) -> Result<Level, LoggingError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        // zap-style names used by existing gateway configs
        "fatal" | "panic" | "dpanic" => Ok(Level::ERROR),
        "warning" => Ok(Level::WARN),
        other => other
            .parse()
            .map_err(|_| LoggingError::Level(raw.to_string())),
    }
}

/// Install the global subscriber.
pub fn init(config: &LoggerConfig, verbose: bool) -> Result<(), LoggingError> {
    let level = if verbose {
        Level::TRACE
    } else {
        parse_level(&config.level)?
    };
    let trace_level = parse_level(&config.trace_level)?;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level.to_string().to_lowercase())?,
    };

    let plain = fmt_layer(config.format, false)
        .with_filter(filter_fn(move |meta: &Metadata<'_>| {
            meta.is_span() || *meta.level() > trace_level
        }))
        .boxed();
    let located = fmt_layer(config.format, true)
        .with_filter(filter_fn(move |meta: &Metadata<'_>| {
            meta.is_span() || *meta.level() <= trace_level
        }))
        .boxed();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(SamplingLayer::new(config.sampling))
        .with(vec![plain, located])
        .try_init()?;
    Ok(())
}

fn fmt_layer<S>(format: LogFormat, located: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_file(located)
        .with_line_number(located);
    match format {
        LogFormat::Console => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u64,
}

/// Counts occurrences per key within fixed windows: the first `initial`
/// pass, then every `thereafter`-th.
#[derive(Debug)]
pub struct WindowSampler<K: Eq + Hash> {
    initial: u64,
    thereafter: u64,
    tick: Duration,
    counters: DashMap<K, Window>,
}

impl<K: Eq + Hash> WindowSampler<K> {
    pub fn new(config: SamplingConfig, tick: Duration) -> Self {
        Self {
            initial: config.initial,
            thereafter: config.thereafter,
            tick,
            counters: DashMap::new(),
        }
    }

    pub fn admit(&self, key: K, now: Instant) -> bool {
        if self.initial == 0 {
            return true;
        }

        let mut window = self.counters.entry(key).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(window.started) >= self.tick {
            window.started = now;
            window.count = 0;
        }
        window.count += 1;
        let n = window.count;

        if n <= self.initial {
            return true;
        }
        self.thereafter > 0 && (n - self.initial) % self.thereafter == 0
    }
}

/// Drops events from callsites that exceeded their sampling budget.
pub struct SamplingLayer {
    sampler: WindowSampler<Identifier>,
}

impl SamplingLayer {
    pub fn new(config: SamplingConfig) -> Self {
        Self {
            sampler: WindowSampler::new(config, SAMPLING_TICK),
        }
    }
}

impl<S: Subscriber> Layer<S> for SamplingLayer {
    fn event_enabled(&self, event: &Event<'_>, _ctx: Context<'_, S>) -> bool {
        self.sampler
            .admit(event.metadata().callsite(), Instant::now())
    }
}
