pub use dtr_common::testing::init_test_logging;

#[ctor::ctor]
fn init() {
    init_test_logging();
}

#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        tracing::info!(target: "test", $($arg)*);
    };
}
