//! Assertion macros shared by integration tests.

/// Await a receive future and panic with contextual diagnostics on failure.
#[macro_export]
macro_rules! recv_expect {
    ($fut:expr) => {{
        $crate::recv_within($fut)
            .await
            .expect(concat!("recv failed at ", file!(), ":", line!()))
    }};
    ($fut:expr, $msg:expr) => {{
        let m = ::std::format!("{msg} at {}:{}", file!(), line!(), msg = $msg);
        $crate::recv_within($fut).await.expect(&m)
    }};
}

pub use crate::recv_expect;
