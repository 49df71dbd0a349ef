// Copyright 2026 Harvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Harvest runtime library: structured record extraction from live,
//! operator-driven browser pages.
//!
//! A request flows through the [`stability`] detector, the [`chain`] of
//! extraction [`strategy`] implementations, the [`normalize`] pipeline and
//! [`gate`], then into a [`session`] that deduplicates and caps results before
//! the [`package`] layer builds the response. [`harvester::Harvester`] ties
//! these together behind one `handle` call.

#![allow(clippy::new_without_default, clippy::should_implement_trait)]

pub mod binding;
pub mod chain;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod gate;
pub mod harvester;
pub mod normalize;
pub mod package;
pub mod protocol;
pub mod session;
pub mod stability;
pub mod strategy;
pub mod types;

pub use error::{HarvestError, HarvestResult};
pub use harvester::Harvester;
pub use package::ExtractionResponse;
pub use types::{ExtractionRequest, NormalizedRecord};
