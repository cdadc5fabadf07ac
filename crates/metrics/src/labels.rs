use std::borrow::Cow;

/// Label set for metrics whose only dimension is the outcome.
pub const STATUS_LABEL: [&str; 1] = ["status"];

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MetricLabel {
    pub key: &'static str,
    pub value: Cow<'static, str>,
}

impl MetricLabel {
    pub const STATUS_ERROR: MetricLabel = MetricLabel::new_const("status", "error");
    pub const STATUS_SUCCESS: MetricLabel = MetricLabel::new_const("status", "success");

    pub fn new(key: &'static str, value: impl Into<Cow<'static, str>>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    pub const fn new_const(key: &'static str, value: &'static str) -> Self {
        Self {
            key,
            value: Cow::Borrowed(value),
        }
    }
}
