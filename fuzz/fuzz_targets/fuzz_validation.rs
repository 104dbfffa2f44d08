//! Fuzz testing for request body validation.
//!
//! Validation runs on untrusted bytes before any handler sees them, so it
//! must never panic, and whatever it accepts must already be clean.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `sanitize_string`: idempotent, never longer than the cap, no stripped characters
//! - `validate_facility_id`: arbitrary strings
//! - `validate_seed_request`: arbitrary JSON documents

#![no_main]

use libfuzzer_sys::fuzz_target;
use medops_gateway::validation::{
    MAX_SANITIZED_LENGTH, STRIPPED_CHARACTERS, sanitize_string, validate_facility_id,
    validate_seed_request,
};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let clean = sanitize_string(s);
        assert!(clean.chars().count() <= MAX_SANITIZED_LENGTH);
        assert!(!clean.chars().any(|c| STRIPPED_CHARACTERS.contains(&c)));
        assert_eq!(sanitize_string(&clean), clean);

        let _ = validate_facility_id(s);
    }

    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        let result = validate_seed_request(&value);
        assert_eq!(result.is_valid, result.sanitized_data.is_some());
        assert_eq!(result.is_valid, result.errors.is_empty());
    }
});
