//! Server-side connection loop.
//!
//! A connection task reads one request at a time, hands it to the worker
//! queue and writes the resulting response back, looping for keep-alive.
//! The task only does I/O and serialization; handler code runs on the
//! workers.

use crate::base::{Error, Result};
use crate::http::builder::ResponseBuilder;
use crate::http::message::Response;
use crate::http::parser::{ParseStatus, Parser};
use crate::http::Request;
use crate::socket::Socket;
use crate::util;
use bytes::Bytes;
use http::StatusCode;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

/// One unit of handler work: a parsed request and the channel its
/// response goes back on.
pub(crate) struct Job {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

#[derive(Clone)]
pub(crate) struct ConnOptions {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub buffer_size: usize,
}

/// Drive one connection until it closes, errors or the server stops.
pub(crate) async fn serve_connection(
    mut socket: Socket,
    jobs: mpsc::Sender<Job>,
    opts: ConnOptions,
) {
    let mut carry = Bytes::new();

    loop {
        let request = match read_request(&mut socket, &mut carry, &opts).await {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = %e, "request parse failed");
                if let Error::Parse(_) = e {
                    let mut response =
                        ResponseBuilder::new(StatusCode::BAD_REQUEST).build();
                    response.headers_mut().set("Connection", "close");
                    let _ = write_response(&mut socket, &mut response, &opts).await;
                }
                return;
            }
        };

        let keep_alive = request.keep_alive();

        let (reply_tx, reply_rx) = oneshot::channel();
        if jobs
            .send(Job {
                request,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            // Server stopping; nothing left to answer with.
            return;
        }
        let Ok(mut response) = reply_rx.await else {
            return;
        };

        finalize_response(&mut response, keep_alive);
        if let Err(e) = write_response(&mut socket, &mut response, &opts).await {
            tracing::debug!(error = %e, "response write failed");
            return;
        }

        if !keep_alive || !response.keep_alive() {
            return;
        }
    }
}

/// Read and parse one request. `Ok(None)` means the client closed the
/// connection cleanly between exchanges.
async fn read_request(
    socket: &mut Socket,
    carry: &mut Bytes,
    opts: &ConnOptions,
) -> Result<Option<Request>> {
    let mut parser = Parser::request();
    let mut received_any = false;

    if !carry.is_empty() {
        let leftover = std::mem::take(carry);
        received_any = true;
        if parser.feed(&leftover)? == ParseStatus::Finished {
            *carry = parser.take_remaining();
            return Ok(Some(parser.take_request()?));
        }
    }

    let mut buf = vec![0u8; opts.buffer_size.max(1)];

    loop {
        let n = timeout(opts.read_timeout, socket.read(&mut buf))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| Error::Read)?;

        if n == 0 {
            if received_any {
                return Err(Error::Read);
            }
            return Ok(None);
        }
        received_any = true;

        if parser.feed(&buf[..n])? == ParseStatus::Finished {
            *carry = parser.take_remaining();
            return Ok(Some(parser.take_request()?));
        }
    }
}

fn finalize_response(response: &mut Response, keep_alive: bool) {
    if !response.headers().contains("Server") {
        response
            .headers_mut()
            .set("Server", concat!("webwire/", env!("CARGO_PKG_VERSION")));
    }
    if !response.headers().contains("Date") {
        response.headers_mut().set("Date", util::http_date());
    }
    let chunked = response.headers().contains("Transfer-Encoding");
    if !chunked && !response.headers().contains("Content-Length") {
        let size = response.body().size().unwrap_or_default();
        response
            .headers_mut()
            .set("Content-Length", size.to_string());
    }
    if !keep_alive {
        response.headers_mut().set("Connection", "close");
    }
}

async fn write_response(
    socket: &mut Socket,
    response: &mut Response,
    opts: &ConnOptions,
) -> Result<()> {
    let head = response.serialize_head();
    let write_all = async {
        socket.write_all(&head).await.map_err(|_| Error::Write)?;
        response.body_mut().init_payload();
        loop {
            let payload = response.body_mut().next_payload().await?;
            if payload.is_empty() {
                break;
            }
            socket.write_all(&payload).await.map_err(|_| Error::Write)?;
        }
        socket.flush().await.map_err(|_| Error::Write)
    };
    timeout(opts.write_timeout, write_all)
        .await
        .map_err(|_| Error::Timeout)?
}
