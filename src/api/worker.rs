//! Isolated-worker host: newline-delimited JSON requests in, newline-delimited
//! JSON responses out. The engine runs on a blocking thread and talks to the
//! async side only through a channel.

use std::pin::Pin;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::{debug, error, info};

use super::protocol::{Request, Response, RunSimulation, decode_request, handle_run};
use crate::core::{CancellationToken, RunConfig};

const RESPONSE_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Receiving end of one run. Dropping it cancels the run at the next trial
/// boundary, whether or not the run has sent anything yet.
#[derive(Debug)]
pub struct RunHandle {
    rx: mpsc::Receiver<Response>,
    cancel: CancellationToken,
}

impl RunHandle {
    pub async fn recv(&mut self) -> Option<Response> {
        self.rx.recv().await
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for RunHandle {
    type Item = Response;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Response>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Starts one decoded request on a blocking thread.
pub fn spawn_run(request: RunSimulation, config: RunConfig) -> RunHandle {
    let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::task::spawn_blocking(move || {
        handle_run(&request, config, &token, |response| {
            if tx.blocking_send(response).is_err() {
                token.cancel();
            }
        });
    });

    RunHandle { rx, cancel }
}

async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), WorkerError>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_vec(response)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Serves requests until the reader reaches end of input. Requests are
/// handled one at a time; blank lines are skipped and undecodable lines get
/// a single `FAILED`.
pub async fn serve_lines<R, W>(
    reader: R,
    mut writer: W,
    config: RunConfig,
) -> Result<(), WorkerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut served = 0_u64;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        served += 1;
        debug!(request = served, "worker received request");
        let request = match decode_request(&line) {
            Ok(Request::RunSimulation(request)) => request,
            Err(err) => {
                error!(error = %err, "could not decode request");
                write_response(&mut writer, &err.into()).await?;
                continue;
            }
        };

        let mut run = spawn_run(request, config);
        while let Some(response) = run.recv().await {
            write_response(&mut writer, &response).await?;
        }
    }

    info!(served, "worker input closed");
    Ok(())
}

pub async fn run_stdio_worker(config: RunConfig) -> Result<(), WorkerError> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    serve_lines(stdin, tokio::io::stdout(), config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::protocol::tests::sample_request_json;

    async fn serve(input: String, config: RunConfig) -> Vec<Response> {
        let mut output = Vec::new();
        serve_lines(input.as_bytes(), &mut output, config)
            .await
            .expect("worker should not fail");
        String::from_utf8(output)
            .expect("utf-8 output")
            .lines()
            .map(|line| serde_json::from_str(line).expect("response json"))
            .collect()
    }

    #[tokio::test]
    async fn worker_streams_progress_then_complete() {
        let input = format!("{}\n", sample_request_json(2_500, 11));
        let responses = serve(input, RunConfig::default()).await;

        let kinds: Vec<&str> = responses.iter().map(Response::kind).collect();
        assert_eq!(kinds, vec!["progress", "progress", "complete"]);
        assert!(matches!(
            &responses[2],
            Response::Complete { data, .. } if data.len() == 2_500
        ));
    }

    #[tokio::test]
    async fn worker_handles_requests_sequentially_and_skips_blank_lines() {
        let input = format!(
            "{}\n\n{{broken\n{}\n",
            sample_request_json(3, 1),
            sample_request_json(4, 2)
        );
        let responses = serve(input, RunConfig::default()).await;

        assert_eq!(responses.len(), 3);
        assert!(matches!(&responses[0], Response::Complete { data, .. } if data.len() == 3));
        assert_eq!(responses[1].kind(), "failed");
        assert!(matches!(&responses[2], Response::Complete { data, .. } if data.len() == 4));
        assert!(responses.iter().all(Response::is_terminal));
    }

    #[tokio::test]
    async fn worker_output_is_deterministic_for_a_fixed_seed() {
        let input = format!("{}\n", sample_request_json(150, 5));
        let config = RunConfig {
            progress_interval: 50,
            ..RunConfig::default()
        };
        let a = serve(input.clone(), config).await;
        let b = serve(input, config).await;
        assert_eq!(a.len(), 4);
        assert_eq!(a, b);
    }

    fn decoded(request: serde_json::Value) -> RunSimulation {
        match decode_request(&request.to_string()).expect("valid request") {
            Request::RunSimulation(run) => run,
        }
    }

    async fn wait_for_cancel(cancel: &CancellationToken) {
        for _ in 0..200 {
            if cancel.is_cancelled() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("run was not cancelled after its handle was dropped");
    }

    #[tokio::test]
    async fn dropping_the_handle_cancels_the_run() {
        let config = RunConfig {
            progress_interval: 1,
            ..RunConfig::default()
        };
        let run = spawn_run(decoded(sample_request_json(100_000, 3)), config);
        let cancel = run.cancellation_token();
        drop(run);

        wait_for_cancel(&cancel).await;
    }

    #[tokio::test]
    async fn dropping_a_silent_run_cancels_it() {
        // Every trial loses more than the investment, so no PROGRESS is ever sent.
        let mut request = sample_request_json(5_000_000, 3);
        request["baseParams"]["initialInvestment"] = serde_json::json!(1.0);
        request["uncertaintyInputs"]["initialRent"] =
            serde_json::json!({ "type": "uniform", "min": 0.0, "max": 0.0 });
        request["uncertaintyInputs"]["appreciation"] =
            serde_json::json!({ "type": "uniform", "min": -0.9, "max": -0.9 });

        let run = spawn_run(decoded(request), RunConfig::default());
        let cancel = run.cancellation_token();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!cancel.is_cancelled());
        drop(run);

        wait_for_cancel(&cancel).await;
    }
}
