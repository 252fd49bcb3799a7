//! Executes query plans against the services of a federated graph.
#![cfg_attr(feature = "failfast", allow(unreachable_code))]

macro_rules! failfast_error {
    ($($tokens:tt)+) => {{
        tracing::error!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

mod data_source;
mod error;
/// Data source that uses http.
mod http_data_source;
mod query_plan;
mod request;
mod response;
mod selection;

pub use data_source::*;
pub use error::*;
pub use http_data_source::HttpDataSource;
pub use query_plan::QueryPlanExt;
pub use request::Request;
pub use response::Response;
