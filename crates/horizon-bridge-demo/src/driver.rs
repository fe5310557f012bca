//! The fixed call sequence.
//!
//! Every outcome, success or failure, is rendered as one message on the
//! driver's sink, in call order, followed by `finished`.

use std::fmt::Debug;
use std::sync::Arc;

use horizon_bridge::grpc::{CallOptions, CallOutcome, Channel, ChannelConfig};
use horizon_bridge::sink::LogSink;

use crate::config::DemoConfig;
use crate::error::{DemoError, Result};
use crate::proto::{self, GetServersRequest, GetUserRequest, GetUsersRequest};

/// Final line of a completed run.
pub const FINISHED: &str = "finished";

/// Tallies from one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// False if the channel could not be opened; nothing was called.
    pub connected: bool,
    /// Calls issued.
    pub calls: usize,
    /// Calls, or streams, that ended in a failure status.
    pub failures: usize,
    /// Users received from the stream.
    pub streamed: usize,
}

/// Runs the demo sequence against one channel.
pub struct Driver {
    sink: Arc<dyn LogSink>,
    known_user_id: String,
    unknown_user_id: String,
    stream_count: i64,
    options: CallOptions,
}

impl Driver {
    /// A driver with the default plan.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self::from_config(sink, &DemoConfig::default())
    }

    /// A driver following `config`.
    pub fn from_config(sink: Arc<dyn LogSink>, config: &DemoConfig) -> Self {
        Self {
            sink,
            known_user_id: config.known_user_id.clone(),
            unknown_user_id: config.unknown_user_id.clone(),
            stream_count: config.stream_count,
            options: config.call_options(),
        }
    }

    /// Build the channel settings from `config`, then open and run.
    pub async fn run_configured(&self, config: &DemoConfig) -> Result<RunSummary> {
        let channel_config = self.report(config.channel_config())?;
        self.connect_and_run(channel_config).await
    }

    /// Open a channel and run the sequence on it.
    ///
    /// A connection failure is rendered (by the channel, on this driver's
    /// sink) and ends the run early with `connected: false`. Any other error
    /// is rendered here and returned.
    pub async fn connect_and_run(&self, config: ChannelConfig) -> Result<RunSummary> {
        let channel = match Channel::open(config.sink(self.sink.clone())).await {
            Ok(channel) => channel,
            Err(e) if e.is_connection() => {
                tracing::debug!("Not running: {}", e);
                return Ok(RunSummary::default());
            }
            Err(e) => return self.report(Err(e)),
        };

        let summary = self.run(&channel).await;
        channel.close();
        summary
    }

    /// Run the sequence on an open channel.
    ///
    /// A local failure (a request that cannot be encoded) is rendered and
    /// stops the run before `finished`.
    pub async fn run(&self, channel: &Channel) -> Result<RunSummary> {
        let mut summary = RunSummary {
            connected: true,
            ..RunSummary::default()
        };

        let servers = channel
            .call_unary(
                &proto::get_servers(),
                &GetServersRequest::default(),
                self.options.clone(),
            )
            .await;
        self.render(self.report(servers)?, &mut summary);

        for user_id in [&self.known_user_id, &self.unknown_user_id] {
            let request = GetUserRequest {
                user_id: user_id.clone(),
            };
            let user = channel
                .call_unary(&proto::get_user(), &request, self.options.clone())
                .await;
            self.render(self.report(user)?, &mut summary);
        }

        let request = GetUsersRequest {
            num_users: self.stream_count,
        };
        let users = channel
            .call_stream(&proto::get_users(), &request, self.options.clone())
            .await;
        let mut users = self.report(users)?;
        summary.calls += 1;
        while let Some(item) = users.next().await {
            match item {
                Ok(user) => self.sink.emit(&format!("{:?}", user)),
                Err(status) => {
                    summary.failures += 1;
                    self.sink.emit(&status.to_string());
                }
            }
        }
        summary.streamed = users.received();

        self.sink.emit(FINISHED);
        Ok(summary)
    }

    /// Render a local error before handing it back.
    fn report<T, E: Into<DemoError>>(&self, result: std::result::Result<T, E>) -> Result<T> {
        result.map_err(|e| {
            let e = e.into();
            self.sink.emit(&e.to_string());
            e
        })
    }

    fn render<T: Debug>(&self, outcome: CallOutcome<T>, summary: &mut RunSummary) {
        summary.calls += 1;
        match outcome {
            CallOutcome::Success(response) => self.sink.emit(&format!("{:?}", response)),
            CallOutcome::Failure(status) => {
                summary.failures += 1;
                self.sink.emit(&status.to_string());
            }
        }
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("known_user_id", &self.known_user_id)
            .field("unknown_user_id", &self.unknown_user_id)
            .field("stream_count", &self.stream_count)
            .finish_non_exhaustive()
    }
}
