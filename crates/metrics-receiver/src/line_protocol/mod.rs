// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Line Protocol decoding and encoding.

pub mod parser;
pub mod writer;

pub use parser::LineProtocolParser;
pub use writer::encode_point;
