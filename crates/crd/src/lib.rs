// Copyright 2025 Marketplace Operator Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Custom resource definitions for the marketplace operator

pub mod v1_alpha1;

pub use v1_alpha1::MeterReport;
pub use v1_alpha1::MeterReportSpec;
pub use v1_alpha1::MeterReportStatus;
