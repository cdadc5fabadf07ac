pub use paste::paste;
pub use prometheus;

/// Shared body of the `register_telemetry_*` macros. The exported name is the
/// lowercased static name, checked at compile time.
#[doc(hidden)]
#[macro_export]
macro_rules! __register_telemetry_metric {
    ($VIS:vis $NAME:ident, $HELP:literal, $TY:ty, $REGISTER:ident $(, $LABELS:expr)?) => {
        $VIS static $NAME: std::sync::LazyLock<$TY> = std::sync::LazyLock::new(|| {
            $crate::paste! {
                const NAME: &str = $crate::checked_metric_name(stringify!([<$NAME:lower>]));
            }
            const HELP: &str = $crate::checked_metric_help($HELP);
            $crate::prometheus::$REGISTER!(NAME, HELP, $($LABELS,)? $crate::METRICS_REGISTRY)
                .expect("Metric initialization failed")
        });
    };
}

/// Declare a static integer counter, or a counter vector when a label list is
/// given.
#[macro_export]
macro_rules! register_telemetry_counter {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $crate::__register_telemetry_metric!(
            $VIS $NAME,
            $HELP,
            $crate::prometheus::IntCounter,
            register_int_counter_with_registry
        );
    };
    ($VIS:vis $NAME:ident, $HELP:literal, $LABELS:expr $(,)?) => {
        $crate::__register_telemetry_metric!(
            $VIS $NAME,
            $HELP,
            $crate::prometheus::IntCounterVec,
            register_int_counter_vec_with_registry,
            $LABELS
        );
    };
}

/// Declare a static float gauge.
#[macro_export]
macro_rules! register_telemetry_gauge {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $crate::__register_telemetry_metric!(
            $VIS $NAME,
            $HELP,
            $crate::prometheus::Gauge,
            register_gauge_with_registry
        );
    };
}

/// Declare a static histogram vector. Histograms are always labelled, at least
/// by [`STATUS_LABEL`](crate::STATUS_LABEL), so they can back a
/// [`StatusTimer`](crate::StatusTimer).
#[macro_export]
macro_rules! register_telemetry_histogram {
    ($VIS:vis $NAME:ident, $HELP:literal, $LABELS:expr $(,)?) => {
        $crate::__register_telemetry_metric!(
            $VIS $NAME,
            $HELP,
            $crate::prometheus::HistogramVec,
            register_histogram_vec_with_registry,
            $LABELS
        );
    };
}
