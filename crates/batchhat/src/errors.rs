// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Error constructing the batcher or its shipping pipeline
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Creation {
    #[error("flush interval invalid")]
    InvalidFlushInterval,
    #[error("queue capacity must be greater than zero")]
    InvalidQueueCapacity,
    #[error("could not build http client: {0}")]
    HttpClient(String),
}

/// Error submitting a stat to the intake queue
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Submit {
    #[error("value is not a finite number")]
    InvalidValue,
    #[error("could not queue up stat: queue is full")]
    QueueFull,
    #[error("could not queue up stat: batcher stopped")]
    Stopped,
}
