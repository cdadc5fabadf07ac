//! Client-facing error classification.
//!
//! An [`ErrorMetadata`] is attached to an `anyhow` chain with `.context(..)`
//! or `anyhow::anyhow!(..)` where a failure is the caller's fault or a known
//! capacity problem. Anything untagged is treated as an internal error.

use std::borrow::Cow;

use http::StatusCode;
use prometheus::IntCounter;
use tracing::Level;

mod metrics;

pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";
pub const INTERNAL_SERVER_ERROR_MSG: &str = "Your request couldn't be completed. Try again later.";

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    /// Stable CamelCase tag such as `InvalidTimeRange`. Sent as `code` in HTTP
    /// error bodies and matched on in tests.
    pub short_msg: Cow<'static, str>,
    /// Human readable description for the caller.
    pub msg: Cow<'static, str>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// The request can never succeed as sent. 400.
    BadRequest,
    /// A dependency did not answer in time; retrying may work. 503.
    Overloaded,
}

impl ErrorMetadata {
    pub fn bad_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn overloaded(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Overloaded,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn is_bad_request(&self) -> bool {
        self.code == ErrorCode::BadRequest
    }

    pub fn is_overloaded(&self) -> bool {
        self.code == ErrorCode::Overloaded
    }

    pub fn log_level(&self) -> Level {
        match self.code {
            ErrorCode::BadRequest => Level::INFO,
            ErrorCode::Overloaded => Level::WARN,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self.code {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Overloaded => "overloaded",
        }
    }

    /// Counter bumped each time an error of this class is reported.
    pub fn error_counter(&self) -> &'static IntCounter {
        match self.code {
            ErrorCode::BadRequest => &metrics::BAD_REQUEST_ERRORS_TOTAL,
            ErrorCode::Overloaded => &metrics::OVERLOADED_ERRORS_TOTAL,
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self.code {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Reads the [`ErrorMetadata`] back off an `anyhow::Error`, with internal
/// error defaults when there is none.
pub trait ErrorMetadataAnyhowExt {
    fn is_bad_request(&self) -> bool;
    fn is_overloaded(&self) -> bool;
    fn log_level(&self) -> Level;
    fn short_msg(&self) -> &str;
    fn msg(&self) -> &str;
    fn metric_status_label_value(&self) -> &'static str;
    fn http_status(&self) -> StatusCode;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn is_bad_request(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(ErrorMetadata::is_bad_request)
    }

    fn is_overloaded(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>()
            .is_some_and(ErrorMetadata::is_overloaded)
    }

    /// Untagged errors are unexpected and are logged as errors.
    fn log_level(&self) -> Level {
        self.downcast_ref::<ErrorMetadata>()
            .map_or(Level::ERROR, ErrorMetadata::log_level)
    }

    fn short_msg(&self) -> &str {
        match self.downcast_ref::<ErrorMetadata>() {
            Some(e) => &e.short_msg,
            None => INTERNAL_SERVER_ERROR,
        }
    }

    fn msg(&self) -> &str {
        match self.downcast_ref::<ErrorMetadata>() {
            Some(e) => &e.msg,
            None => INTERNAL_SERVER_ERROR_MSG,
        }
    }

    fn metric_status_label_value(&self) -> &'static str {
        self.downcast_ref::<ErrorMetadata>()
            .map_or("error", ErrorMetadata::status_label)
    }

    fn http_status(&self) -> StatusCode {
        self.downcast_ref::<ErrorMetadata>()
            .map_or(StatusCode::INTERNAL_SERVER_ERROR, ErrorMetadata::http_status)
    }
}

#[cfg(any(test, feature = "testing"))]
mod proptest {
    use proptest::prelude::*;

    use super::ErrorMetadata;

    impl Arbitrary for ErrorMetadata {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            ("[A-Z][a-zA-Z]{0,16}", ".{0,32}", any::<bool>())
                .prop_map(|(short_msg, msg, bad_request)| {
                    if bad_request {
                        ErrorMetadata::bad_request(short_msg, msg)
                    } else {
                        ErrorMetadata::overloaded(short_msg, msg)
                    }
                })
                .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use proptest::prelude::*;
    use tracing::Level;

    use crate::{
        ErrorMetadata,
        ErrorMetadataAnyhowExt,
        INTERNAL_SERVER_ERROR,
    };

    proptest! {
        #![proptest_config(
            ProptestConfig { failure_persistence: None, ..ProptestConfig::default() }
        )]

        #[test]
        fn test_metadata_survives_context(err in any::<ErrorMetadata>()) {
            let wrapped = anyhow::anyhow!("storage said no")
                .context(err.clone())
                .context("while executing query");
            prop_assert_eq!(wrapped.short_msg(), &*err.short_msg);
            prop_assert_eq!(wrapped.http_status(), err.http_status());
            prop_assert_eq!(wrapped.is_bad_request(), err.is_bad_request());
            // Client mistakes never log above INFO.
            prop_assert_eq!(wrapped.log_level() == Level::INFO, err.is_bad_request());
        }
    }

    #[test]
    fn test_anyhow_classification() {
        let err = anyhow::anyhow!("unsupported")
            .context(ErrorMetadata::bad_request("UnsupportedOperation", "nope"));
        assert!(err.is_bad_request());
        assert_eq!(err.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.short_msg(), "UnsupportedOperation");
        assert_eq!(err.msg(), "nope");

        let err = anyhow::anyhow!("storage went away");
        assert!(!err.is_bad_request());
        assert_eq!(err.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.short_msg(), INTERNAL_SERVER_ERROR);
        assert_eq!(err.log_level(), Level::ERROR);
        assert_eq!(err.metric_status_label_value(), "error");
    }

    #[test]
    fn test_overloaded() {
        let err = anyhow::anyhow!(ErrorMetadata::overloaded("QueryTimeout", "too slow"));
        assert!(err.is_overloaded());
        assert_eq!(err.http_status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.log_level(), Level::WARN);
        assert_eq!(err.metric_status_label_value(), "overloaded");
    }
}
