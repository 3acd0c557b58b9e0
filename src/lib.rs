// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! HTTP reverse proxy that records request/response pairs.
//!
//! Every request outside the dashboard prefix is forwarded to a single
//! upstream and stored in a bounded in-memory [`store::CaptureStore`]. The
//! dashboard lists captures over a live event feed, renders them as raw
//! HTTP text and curl commands, and can replay them.

pub mod capture;
pub mod config;
pub mod dashboard;
pub mod dump;
pub mod feed;
pub mod forward;
pub mod handler;
pub mod proxy;
pub mod recorder;
pub mod retry;
pub mod store;

#[cfg(test)]
pub mod test_helpers;
