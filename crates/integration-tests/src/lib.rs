//! End-to-end tests for the ctrfs access layer.
//!
//! Nothing here needs a container runtime. Live access is driven through
//! [`fixture::ScriptedRunner`], which answers runtime invocations from canned
//! outputs and records every argument list it receives, so tests can assert
//! both what was returned and which commands were issued. Snapshot tests run
//! against archives generated with [`fixture::build_archive`].
//!
//! Each test is a closure registered with [`integration_test!`]; the
//! registrations are collected through a linkme distributed slice and run by
//! libtest-mimic, so the usual `--list`, filtering and `--exact` flags work.

#![allow(unsafe_code)] // linkme's distributed slices

use libtest_mimic::{Arguments, Trial};
use linkme::distributed_slice;

pub mod fixture;
mod tests;

/// Constructors for every registered test, filled in by [`integration_test!`].
#[distributed_slice]
pub static INTEGRATION_TESTS: [fn() -> Trial];

/// Collect the registered tests and run them with command-line filtering.
pub fn run_tests() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Arguments::from_args();
    // Link order is unspecified; sort so runs are reproducible.
    let mut trials: Vec<Trial> = INTEGRATION_TESTS.iter().map(|register| register()).collect();
    trials.sort_by(|a, b| a.name().cmp(b.name()));

    libtest_mimic::run(&args, trials).exit();
}

/// Register a test.
///
/// The body is a closure returning `Result<(), Box<dyn Error + Send + Sync>>`,
/// so `?` works on ctrfs, I/O and eyre errors alike and a plain `&str` can be
/// used as an ad hoc failure.
///
/// ```ignore
/// use integration_tests::fixture::{ETC_LISTING, ScriptedRunner};
/// use integration_tests::integration_test;
///
/// integration_test!(test_lists_etc, || {
///     let runner = ScriptedRunner::new()
///         .on_arg("-la", ctrfs::CommandOutput::ok(ETC_LISTING));
///     assert_eq!(runner.count("exec"), 0);
///     Ok(())
/// });
/// ```
#[macro_export]
macro_rules! integration_test {
    ($name:ident, $body:expr) => {
        $crate::paste::paste! {
            #[$crate::linkme::distributed_slice($crate::INTEGRATION_TESTS)]
            #[linkme(crate = $crate::linkme)]
            fn [<__register_ $name>]() -> $crate::libtest_mimic::Trial {
                $crate::libtest_mimic::Trial::test(stringify!($name), move || {
                    let outcome: Result<(), Box<dyn std::error::Error + Send + Sync>> = $body();
                    outcome.map_err(|e| $crate::libtest_mimic::Failed::from(e.to_string()))
                })
            }
        }
    };
}

// Used by the expansion of `integration_test!`.
pub use libtest_mimic;
pub use linkme;
pub use paste;
