use std::{
    env,
    fmt::Debug,
    io,
    path::Path,
    str::FromStr,
    time::Duration,
};

use tracing::{
    level_filters::LevelFilter,
    Level,
};
use tracing_subscriber::{
    fmt::format::format,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

/// Read knob `name` from the environment. Unset, non-unicode or unparsable
/// values fall back to `default` (the latter two with a warning).
pub fn env_config<T>(name: &str, default: T) -> T
where
    T: Debug + FromStr,
    T::Err: Debug,
{
    let raw = match env::var(name) {
        Ok(raw) => raw,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(_)) => {
            tracing::warn!("{name} is not valid unicode, using default {default:?}");
            return default;
        },
    };
    match raw.parse::<T>() {
        Ok(value) => {
            tracing::info!("{name} set to {value:?} from the environment");
            value
        },
        Err(e) => {
            tracing::warn!("Can't parse {name}={raw:?} ({e:?}), using default {default:?}");
            default
        },
    }
}

/// Millisecond-valued knob, e.g. `WRITE_BACK_FLUSH_INTERVAL_MS=2000`.
pub fn env_config_millis(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_config(name, default.as_millis() as u64))
}

/// Keeps the file log writer alive. Hold it for the life of the process.
pub struct TracingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Install the service's tracing subscriber: a stdout layer filtered by
/// `RUST_LOG` (default INFO) whose format is picked by `LOG_FORMAT`
/// (`json`, `pretty`, otherwise compact) and, when `TELEMETRY_TRACE_FILE`
/// names a path, a plain-text copy of every INFO and above event in that file.
pub fn config_service() -> TracingGuard {
    let ansi = env::var_os("NO_COLOR").is_none();
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .with_writer(io::stdout);
    let stdout_layer = match env::var("LOG_FORMAT").as_deref() {
        Ok("json") => stdout_layer.event_format(format().json()).boxed(),
        Ok("pretty") => stdout_layer.event_format(format().pretty()).boxed(),
        _ => stdout_layer.event_format(format().compact()).boxed(),
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.as_str()));
    let mut layers = vec![stdout_layer.with_filter(filter).boxed()];

    let file_guard = env::var_os("TELEMETRY_TRACE_FILE").map(|path| {
        let path = Path::new(&path);
        let directory = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path.file_name().unwrap_or(path.as_os_str());
        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(LevelFilter::INFO)
                .boxed(),
        );
        guard
    });
    tracing_subscriber::registry().with(layers).init();
    TracingGuard {
        _file_guard: file_guard,
    }
}

/// Route logs through the test harness's captured output. Safe to call from
/// every test.
pub fn config_test() {
    // Only the first call in a test binary installs anything.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .compact()
        .try_init();
}
