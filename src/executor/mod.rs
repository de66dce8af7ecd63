// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Protocol-level resilience: circuit breakers (C5), the chain that wires
//! them around a raw command, and the monitoring executor (C6) that times
//! whatever the chain runs.

pub mod breaker;
pub mod chain;
pub mod metrics;

pub use breaker::{Breaker, BreakerState, Outcome};
pub use chain::{ExecutorChain, OnceCommand, ProtocolCommand};
pub use metrics::{AccountClass, MetricTag, Measurement, MetricsSink, MonitoringExecutor, NullMetricsSink};
