//! Socket-level and lifecycle suites for the daemon.

mod support;
