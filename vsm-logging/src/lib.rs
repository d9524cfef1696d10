//! Logging setup shared by everything that drives snapshot operations.
//!
//! Lifecycle operations open a `snapshot` span carrying `op`, `host` and
//! `snapshot` fields, so `VSM_LOG_TAGS=op:revert` narrows output to reverts
//! and `VSM_LOG_TAGS=host:web01` to a single host.

use std::{
    collections::HashMap,
    env,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{field::Visit, span, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::MakeWriter,
    layer::{Context, Layer},
    prelude::*,
    registry, EnvFilter,
};

const DEFAULT_LOG_FILE: &str = "/tmp/vsm.log";

// --- Custom "Tee" Writer ---
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A, B> Write for Tee<A, B>
where
    A: Write,
    B: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B, W1, W2> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a, Writer = W1>,
    B: MakeWriter<'a, Writer = W2>,
    W1: Write + 'a,
    W2: Write + 'a,
{
    type Writer = Tee<W1, W2>;
    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

/// Where formatted events go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
    None,
}

impl LogOutput {
    fn parse(value: &str) -> Self {
        match value {
            "file" => LogOutput::File,
            "both" => LogOutput::Both,
            "none" => LogOutput::None,
            _ => LogOutput::Console,
        }
    }

    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

/// A `key:value` span-field filter. A value of `*` matches any value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// Parse a comma separated `key:value` list, dropping malformed entries.
pub fn parse_tags(raw: &str) -> Vec<Tag> {
    raw.split(',')
        .filter_map(|s| {
            let mut parts = s.splitn(2, ':');
            let key = parts.next()?.trim().to_string();
            let value = parts.next()?.trim().to_string();
            if key.is_empty() {
                return None;
            }
            Some(Tag { key, value })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: String,
    pub output: LogOutput,
    pub json: bool,
    pub tags: Vec<Tag>,
    pub file_path: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Console,
            json: false,
            tags: Vec::new(),
            file_path: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

impl LogSettings {
    /// Read `VSM_LOG_LEVEL`, `VSM_LOG_OUTPUT`, `VSM_LOG_FORMAT`,
    /// `VSM_LOG_TAGS` and `VSM_LOG_FILE`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            level: env::var("VSM_LOG_LEVEL").unwrap_or(defaults.level),
            output: env::var("VSM_LOG_OUTPUT")
                .map(|v| LogOutput::parse(&v))
                .unwrap_or(defaults.output),
            json: env::var("VSM_LOG_FORMAT").is_ok_and(|v| v == "json"),
            tags: env::var("VSM_LOG_TAGS")
                .map(|v| parse_tags(&v))
                .unwrap_or_default(),
            file_path: env::var("VSM_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.file_path),
        }
    }
}

// --- Tag-Based Filtering Logic ---
struct TagFilterLayer {
    filters: Vec<Tag>,
}

impl TagFilterLayer {
    fn matches(&self, fields: &HashMap<String, String>) -> bool {
        self.filters.iter().all(|filter| {
            fields
                .get(&filter.key)
                .is_some_and(|value| filter.value == "*" || value.contains(&filter.value))
        })
    }
}

impl<S> Layer<S> for TagFilterLayer
where
    S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = HashMap::new();
        let mut visitor = FieldVisitor(&mut fields);
        attrs.record(&mut visitor);
        span.extensions_mut().insert(fields);
    }

    fn enabled(&self, meta: &Metadata<'_>, ctx: Context<'_, S>) -> bool {
        // Spans must exist for their fields to be matched.
        if self.filters.is_empty() || meta.is_span() {
            return true;
        }

        let scope = match ctx.current_span().id().and_then(|id| ctx.span_scope(id)) {
            Some(scope) => scope,
            // Events outside any span carry no tags.
            None => return false,
        };

        let mut all_fields = HashMap::new();
        for span_ref in scope {
            if let Some(fields) = span_ref.extensions().get::<HashMap<String, String>>() {
                for (k, v) in fields {
                    all_fields.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
        }

        self.matches(&all_fields)
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

/// Installs the global tracing subscriber described by `settings`.
///
/// The returned guard flushes the file writer on drop and must be held for
/// as long as logging is needed.
pub fn init_subscriber(settings: &LogSettings) -> Option<WorkerGuard> {
    let mut env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.level));
    for directive in ["hyper=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let tag_filter_layer = TagFilterLayer {
        filters: settings.tags.clone(),
    };

    let mut guard: Option<WorkerGuard> = None;
    let subscriber = registry().with(env_filter).with(tag_filter_layer);

    let log_dir = settings
        .file_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("/tmp"));
    let log_filename = settings
        .file_path
        .file_name()
        .unwrap_or("vsm.log".as_ref());

    let output = settings.output;
    let is_json = settings.json;

    if output.console() && output.file() {
        let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        let tee_writer = MakeTee {
            make_a: std::io::stdout,
            make_b: non_blocking,
        };

        let fmt_layer = tracing_subscriber::fmt::layer().with_writer(tee_writer);
        if is_json {
            let _ = subscriber.with(fmt_layer.json()).try_init();
        } else {
            let _ = subscriber.with(fmt_layer.pretty()).try_init();
        }
    } else if output.console() {
        let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
        if is_json {
            let _ = subscriber.with(fmt_layer.json()).try_init();
        } else {
            let _ = subscriber.with(fmt_layer.pretty()).try_init();
        }
    } else if output.file() {
        let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        let fmt_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
        if is_json {
            let _ = subscriber.with(fmt_layer.json()).try_init();
        } else {
            let _ = subscriber.with(fmt_layer.pretty()).try_init();
        }
    } else {
        let _ = subscriber.try_init();
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags("op:revert, host:web01,malformed,:nokey,any:*");
        assert_eq!(
            tags,
            vec![
                Tag {
                    key: "op".into(),
                    value: "revert".into()
                },
                Tag {
                    key: "host".into(),
                    value: "web01".into()
                },
                Tag {
                    key: "any".into(),
                    value: "*".into()
                },
            ]
        );
    }

    #[test]
    fn test_tag_filter_matching() {
        let layer = TagFilterLayer {
            filters: parse_tags("op:save,host:*"),
        };
        let mut fields = HashMap::new();
        fields.insert("op".to_string(), "save".to_string());
        assert!(!layer.matches(&fields));

        fields.insert("host".to_string(), "web01.example.com".to_string());
        assert!(layer.matches(&fields));

        fields.insert("op".to_string(), "revert".to_string());
        assert!(!layer.matches(&fields));
    }

    #[test]
    #[serial]
    fn test_settings_from_env() {
        env::set_var("VSM_LOG_LEVEL", "debug");
        env::set_var("VSM_LOG_OUTPUT", "both");
        env::set_var("VSM_LOG_FORMAT", "json");
        env::set_var("VSM_LOG_TAGS", "op:destroy");
        env::set_var("VSM_LOG_FILE", "/var/log/vsm/snapshots.log");

        let settings = LogSettings::from_env();
        assert_eq!(settings.level, "debug");
        assert_eq!(settings.output, LogOutput::Both);
        assert!(settings.json);
        assert_eq!(settings.tags.len(), 1);
        assert_eq!(settings.file_path, PathBuf::from("/var/log/vsm/snapshots.log"));

        for key in [
            "VSM_LOG_LEVEL",
            "VSM_LOG_OUTPUT",
            "VSM_LOG_FORMAT",
            "VSM_LOG_TAGS",
            "VSM_LOG_FILE",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_settings_defaults() {
        env::remove_var("VSM_LOG_OUTPUT");
        env::remove_var("VSM_LOG_FORMAT");
        let settings = LogSettings::from_env();
        assert_eq!(settings.output, LogOutput::Console);
        assert!(!settings.json);
        assert_eq!(settings.file_path, PathBuf::from(DEFAULT_LOG_FILE));
    }
}
