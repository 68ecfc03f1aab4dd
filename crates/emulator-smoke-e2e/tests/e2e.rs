//! Smoke scenarios against whatever emulators are running locally
//!
//! Groups whose emulator is unreachable are skipped, so this suite passes
//! on a machine with no emulators at all. Set `RUST_LOG=debug` to see each
//! step.

mod scenarios;
