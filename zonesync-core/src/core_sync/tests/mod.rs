//! Cross-module tests for zone synchronization

mod manager_tests;
