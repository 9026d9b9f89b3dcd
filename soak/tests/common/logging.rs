use tracing_subscriber::{EnvFilter, fmt};

pub fn init_test_logging() {
    let filter = EnvFilter::from_default_env()
        .add_directive("soak=debug".parse().unwrap())
        .add_directive("soak_common=debug".parse().unwrap());
    let _ = fmt().with_test_writer().with_env_filter(filter).try_init();
}

#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        tracing::info!(target: "soak_test", $($arg)*);
    };
}
