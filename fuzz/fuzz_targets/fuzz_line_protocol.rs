// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use chrono::DateTime;
use libfuzzer_sys::fuzz_target;
use metrics_receiver::line_protocol::{encode_point, LineProtocolParser};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let parser = LineProtocolParser::new();
    let now = DateTime::from_timestamp_nanos(0);

    // Neither parsing nor encoding may panic.
    if let Ok(points) = parser.parse(input, now) {
        for point in &points {
            assert!(!point.measurement().is_empty());
            let _ = encode_point(point);
        }
    }
});
