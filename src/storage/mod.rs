// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage contracts and backends.

pub mod memory;
pub mod records;
pub mod sqlite;
pub mod traits;
