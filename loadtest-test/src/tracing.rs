use tracing_subscriber::EnvFilter;

/// Targets that log at full detail in tests. Everything else is limited to errors.
const VERBOSE_TARGETS: &[&str] = &["loadtest", "loadtest_test"];

/// Sends log output of the driver crates to the test harness.
///
/// Output goes through the test writer, so it is only shown for failing tests. Calling this more
/// than once is harmless.
///
/// # Example
///
/// ```
/// loadtest_test::tracing::init();
/// ```
pub fn init() {
    let env_filter = VERBOSE_TARGETS
        .iter()
        .fold(EnvFilter::new("ERROR"), |filter, target| {
            filter.add_directive(format!("{target}=TRACE").parse().unwrap())
        });

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
