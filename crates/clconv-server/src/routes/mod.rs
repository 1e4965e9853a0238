// SPDX-License-Identifier: AGPL-3.0-only

//! HTTP routes

pub mod health;
pub mod infer;
