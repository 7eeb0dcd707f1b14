//! Client session tests against raw in-process TCP peers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use webwire::{Error, RequestBuilder, Session, SslVerify, StatusCode};

/// Read until the header terminator; enough for requests without bodies.
async fn read_head(socket: &mut tokio::net::TcpStream) -> Option<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            return Some(data);
        }
    }
}

#[tokio::test]
async fn get_200_with_fixed_length_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = read_head(&mut socket).await.unwrap();
        let head = String::from_utf8_lossy(&head);
        assert!(head.starts_with("GET /echo HTTP/1.1\r\n"));
        assert!(head.contains("Host: "));

        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nPING")
            .await;
    });

    let session = Session::new();
    let request = RequestBuilder::get(&format!("http://{addr}/echo"))
        .build()
        .unwrap();
    let response = session.send(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text(), "PING");
}

#[tokio::test]
async fn chunked_response_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_head(&mut socket).await;
        let _ = socket
            .write_all(
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                  3\r\nHel\r\n2\r\nlo\r\n0\r\n\r\n",
            )
            .await;
    });

    let session = Session::new();
    let request = RequestBuilder::get(&format!("http://{addr}/chunked"))
        .build()
        .unwrap();
    let response = session.send(request).await.unwrap();

    assert_eq!(response.text(), "Hello");
    assert_eq!(response.body().size(), Some(5));
}

#[tokio::test]
async fn read_until_close_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_head(&mut socket).await;
        // No Content-Length, no chunking: the body ends when we close.
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nuntil the end")
            .await;
    });

    let session = Session::new();
    let request = RequestBuilder::get(&format!("http://{addr}/"))
        .build()
        .unwrap();
    let response = session.send(request).await.unwrap();
    assert_eq!(response.text(), "until the end");
    assert_eq!(session.pool_size(), 0);
}

#[tokio::test]
async fn redirect_followed_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let server_hits = hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let hits = server_hits.clone();
            tokio::spawn(async move {
                let Some(head) = read_head(&mut socket).await else {
                    return;
                };
                hits.fetch_add(1, Ordering::Relaxed);
                let head = String::from_utf8_lossy(&head);
                let response: &[u8] = if head.starts_with("GET /a ") {
                    b"HTTP/1.1 302 Found\r\nLocation: /b\r\nContent-Length: 0\r\n\
                      Connection: close\r\n\r\n"
                } else {
                    b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\nConnection: close\r\n\r\nB"
                };
                let _ = socket.write_all(response).await;
            });
        }
    });

    let mut session = Session::new();
    session.set_max_redirects(5);
    let request = RequestBuilder::get(&format!("http://{addr}/a"))
        .build()
        .unwrap();
    let response = session.send(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text(), "B");
    assert_eq!(hits.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn redirect_cycle_detected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                while read_head(&mut socket).await.is_some() {
                    // /a and /b point at each other forever.
                    let _ = socket
                        .write_all(
                            b"HTTP/1.1 302 Found\r\nLocation: /a\r\n\
                              Content-Length: 0\r\nConnection: close\r\n\r\n",
                        )
                        .await;
                }
            });
        }
    });

    let session = Session::new();
    let request = RequestBuilder::get(&format!("http://{addr}/a"))
        .build()
        .unwrap();
    let err = session.send(request).await.unwrap_err();
    assert_eq!(err, Error::RedirectLoop);
}

#[tokio::test]
async fn redirects_disabled_pass_through() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_head(&mut socket).await;
        let _ = socket
            .write_all(b"HTTP/1.1 302 Found\r\nLocation: /b\r\nContent-Length: 0\r\n\r\n")
            .await;
    });

    let mut session = Session::new();
    session.set_follow_redirects(false);
    let request = RequestBuilder::get(&format!("http://{addr}/a"))
        .build()
        .unwrap();
    let response = session.send(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers().get("Location"), Some("/b"));
}

#[tokio::test]
async fn see_other_rewrites_post_to_get() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let Some(head) = read_head(&mut socket).await else {
                    return;
                };
                let head = String::from_utf8_lossy(&head);
                if head.starts_with("POST /submit ") {
                    let _ = socket
                        .write_all(
                            b"HTTP/1.1 303 See Other\r\nLocation: /done\r\n\
                              Content-Length: 0\r\nConnection: close\r\n\r\n",
                        )
                        .await;
                } else {
                    assert!(head.starts_with("GET /done "), "got: {head}");
                    let _ = socket
                        .write_all(
                            b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\
                              Connection: close\r\n\r\ndone",
                        )
                        .await;
                }
            });
        }
    });

    let session = Session::new();
    let request = RequestBuilder::post(&format!("http://{addr}/submit"))
        .body("payload")
        .build()
        .unwrap();
    let response = session.send(request).await.unwrap();
    assert_eq!(response.text(), "done");
}

#[tokio::test]
async fn keep_alive_connection_is_reused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let server_connections = connections.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            server_connections.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(async move {
                while read_head(&mut socket).await.is_some() {
                    let response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
                    if socket.write_all(response).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    let session = Session::new();
    for _ in 0..3 {
        let request = RequestBuilder::get(&format!("http://{addr}/"))
            .build()
            .unwrap();
        let response = session.send(request).await.unwrap();
        assert_eq!(response.text(), "ok");
    }

    assert_eq!(connections.load(Ordering::Relaxed), 1);
    assert_eq!(session.pool_size(), 1);

    session.clear().await;
    assert_eq!(session.pool_size(), 0);
}

#[tokio::test]
async fn stale_pooled_connection_retries_fresh() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                // Serve exactly one exchange per connection, then drop the
                // socket without a Connection: close header.
                let _ = read_head(&mut socket).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                    .await;
            });
        }
    });

    let session = Session::new();
    for _ in 0..2 {
        let request = RequestBuilder::get(&format!("http://{addr}/"))
            .build()
            .unwrap();
        let response = session.send(request).await.unwrap();
        assert_eq!(response.text(), "ok");
        // Let the server-side drop land before the next send.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn unresponsive_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        // Accept and hold the socket open without ever responding.
        let Ok((socket, _)) = listener.accept().await else {
            return;
        };
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(socket);
    });

    let mut session = Session::new();
    session.set_connect_timeout(2);
    session.set_read_timeout(1);

    let start = Instant::now();
    let request = RequestBuilder::get(&format!("http://{addr}/"))
        .build()
        .unwrap();
    let err = session.send(request).await.unwrap_err();

    assert_eq!(err, Error::Timeout);
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn https_against_plain_listener_is_handshake_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        // Not a TLS peer: close as soon as the ClientHello arrives.
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 512];
        let _ = socket.read(&mut buf).await;
        drop(socket);
    });

    let mut session = Session::new();
    session.set_ssl_verify(SslVerify::None);
    session.set_connect_timeout(5);

    let request = RequestBuilder::get(&format!("https://{addr}/"))
        .build()
        .unwrap();
    let err = session.send(request).await.unwrap_err();
    assert_eq!(err, Error::Handshake);
}

#[tokio::test]
async fn streamed_response_lands_in_file() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_head(&mut socket).await;
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\n\r\nFILEDATA")
            .await;
    });

    let session = Session::new();
    let request = RequestBuilder::get(&format!("http://{addr}/download"))
        .build()
        .unwrap();
    let response = session.send_streamed(request).await.unwrap();

    let webwire::Body::File(file) = response.body() else {
        panic!("expected a file body");
    };
    assert_eq!(file.size(), 8);
    let content = std::fs::read(file.path()).unwrap();
    assert_eq!(content, b"FILEDATA");
    std::fs::remove_file(file.path()).unwrap();
}

#[tokio::test]
async fn progress_callback_reports_totals() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_head(&mut socket).await;
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nabcdef")
            .await;
    });

    let observed = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = observed.clone();
    let callback: webwire::ProgressCallback = Arc::new(move |received, total| {
        if let Ok(mut seen) = sink.lock() {
            seen.push((received, total));
        }
    });

    let session = Session::new();
    let request = RequestBuilder::get(&format!("http://{addr}/"))
        .build()
        .unwrap();
    let response = session
        .send_with_progress(request, false, callback)
        .await
        .unwrap();
    assert_eq!(response.text(), "abcdef");

    let seen = observed.lock().unwrap();
    let last = seen.last().unwrap();
    assert_eq!(*last, (6, Some(6)));
}

#[cfg(feature = "gzip")]
#[tokio::test]
async fn gzip_response_is_transparently_decoded() {
    let payload = "compressible ".repeat(200);
    let compressed = webwire::util::gzip::compress(payload.as_bytes()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let body = compressed.clone();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = read_head(&mut socket).await.unwrap();
        let head = String::from_utf8_lossy(&head);
        assert!(head.contains("Accept-Encoding: gzip"));

        let response_head = format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let _ = socket.write_all(response_head.as_bytes()).await;
        let _ = socket.write_all(&body).await;
    });

    let session = Session::new();
    let request = RequestBuilder::get(&format!("http://{addr}/"))
        .build()
        .unwrap();
    let response = session.send(request).await.unwrap();

    assert_eq!(response.text(), payload);
    assert!(!response.headers().contains("Content-Encoding"));
}

#[tokio::test]
async fn plain_http_goes_through_forward_proxy() {
    // Origin server.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = read_head(&mut socket).await.unwrap();
        let head = String::from_utf8_lossy(&head);
        // Through a proxy the request target is the absolute URI.
        assert!(head.starts_with("GET http://"), "got: {head}");
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nproxy")
            .await;
    });

    // Blind byte-forwarding proxy.
    let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = proxy_listener.local_addr().unwrap();
    let proxied = Arc::new(AtomicUsize::new(0));
    let proxy_hits = proxied.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut client_sock, _)) = proxy_listener.accept().await else {
                break;
            };
            proxy_hits.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(async move {
                if let Ok(mut origin_sock) =
                    tokio::net::TcpStream::connect(origin_addr).await
                {
                    let (mut cr, mut cw) = client_sock.split();
                    let (mut or, mut ow) = origin_sock.split();
                    let _ = tokio::join!(
                        tokio::io::copy(&mut cr, &mut ow),
                        tokio::io::copy(&mut or, &mut cw)
                    );
                }
            });
        }
    });

    let mut session = Session::new();
    session.set_proxy(&format!("http://{proxy_addr}")).unwrap();

    let request = RequestBuilder::get(&format!("http://{origin_addr}/via-proxy"))
        .build()
        .unwrap();
    let response = session.send(request).await.unwrap();

    assert_eq!(response.text(), "proxy");
    assert_eq!(proxied.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn head_response_with_content_length_has_no_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = read_head(&mut socket).await.unwrap();
        assert!(head.starts_with(b"HEAD / "));
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1234\r\n\r\n")
            .await;
    });

    let session = Session::new();
    let request = RequestBuilder::head(&format!("http://{addr}/"))
        .build()
        .unwrap();
    let response = session.send(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.body().is_empty());
    assert_eq!(response.headers().get("Content-Length"), Some("1234"));
}
