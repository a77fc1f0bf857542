//! Scenario-based tests for localci

mod helpers;

mod apk_build;
mod artifacts;
mod cancellation;
mod fail_fast;
mod trigger_filter;
mod variable_substitution;
