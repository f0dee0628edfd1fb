// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// RelayPrint Print — IPP client for the local CUPS scheduler, the SQLite
// cache of relayed jobs, and lpstat-based printer discovery. This crate
// bridges between the core domain types defined in `relayprint-core` and
// the spooler that actually prints.

pub mod discovery;
pub mod ipp_client;
pub mod queue;
pub mod spooler;
pub mod store;

pub use discovery::{PrinterDevice, PrinterDiscovery};
pub use ipp_client::CupsClient;
pub use queue::JobQueueManager;
pub use spooler::{PrintSpooler, PrinterAttributes, SpoolerJob};
pub use store::JobStore;
