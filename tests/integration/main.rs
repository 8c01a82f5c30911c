//! End-to-end tests against a mock API server

mod follow_check_tests;
mod harvest_tests;
