pub mod assertions;
pub mod fixtures;
pub mod logging;

pub use assertions::{assert_contains, assert_report_verdict};
pub use fixtures::TestConfig;
pub use logging::init_test_logging;
