//! Request routing: URL patterns, method dispatch, captured arguments.
//!
//! A pattern is `/`-separated segments, each either a literal or a
//! `:name` capture. Matching is exact on segment count, routes are tried
//! in insertion order and the first path+method match wins.

use crate::http::builder::ResponseBuilder;
use crate::http::message::{Request, Response};
use http::{Method, StatusCode};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Captured path arguments, ordered as their `:name` placeholders appear
/// in the pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlArgs {
    args: Vec<(String, String)>,
}

impl UrlArgs {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.args.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// A request handler. Views run on worker tasks and may be invoked
/// concurrently across connections.
pub trait View: Send + Sync + 'static {
    fn serve(&self, request: &Request, args: &UrlArgs) -> Response;
}

impl<F> View for F
where
    F: Fn(&Request, &UrlArgs) -> Response + Send + Sync + 'static,
{
    fn serve(&self, request: &Request, args: &UrlArgs) -> Response {
        self(request, args)
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Capture(String),
}

#[derive(Clone)]
struct Route {
    segments: Vec<Segment>,
    methods: Vec<Method>,
    view: Arc<dyn View>,
}

/// The route table.
#[derive(Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a view for `pattern` and the given methods.
    pub fn route(&mut self, pattern: &str, view: impl View, methods: &[Method]) {
        let methods = if methods.is_empty() {
            vec![Method::GET]
        } else {
            methods.to_vec()
        };
        self.routes.push(Route {
            segments: compile_pattern(pattern),
            methods,
            view: Arc::new(view),
        });
    }

    /// Route a request to its view. Produces 404 for an unmatched path and
    /// 405 with an `Allow` header for a matched path with the wrong
    /// method. A panicking view turns into an empty 500.
    pub fn dispatch(&self, request: &Request) -> Response {
        let path: Vec<&str> = split_path(request.url().path());
        let mut allowed: Vec<Method> = Vec::new();

        for route in &self.routes {
            let Some(args) = match_segments(&route.segments, &path) else {
                continue;
            };
            if !route.methods.contains(request.method()) {
                for method in &route.methods {
                    if !allowed.contains(method) {
                        allowed.push(method.clone());
                    }
                }
                continue;
            }

            let view = Arc::clone(&route.view);
            return match catch_unwind(AssertUnwindSafe(|| view.serve(request, &args))) {
                Ok(response) => response,
                Err(_) => {
                    tracing::error!(path = %request.url().path(), "view panicked");
                    ResponseBuilder::new(StatusCode::INTERNAL_SERVER_ERROR).build()
                }
            };
        }

        if !allowed.is_empty() {
            let allow = allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            return ResponseBuilder::new(StatusCode::METHOD_NOT_ALLOWED)
                .header("Allow", &allow)
                .build();
        }
        ResponseBuilder::new(StatusCode::NOT_FOUND).build()
    }
}

fn compile_pattern(pattern: &str) -> Vec<Segment> {
    split_path(pattern)
        .into_iter()
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => Segment::Capture(name.to_owned()),
            None => Segment::Literal(segment.to_owned()),
        })
        .collect()
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> Option<UrlArgs> {
    if pattern.len() != path.len() {
        return None;
    }
    let mut args = UrlArgs::default();
    for (segment, value) in pattern.iter().zip(path) {
        match segment {
            Segment::Literal(literal) => {
                if literal != value {
                    return None;
                }
            }
            Segment::Capture(name) => {
                args.args.push((name.clone(), (*value).to_owned()));
            }
        }
    }
    Some(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestBuilder;

    fn request(method: Method, path: &str) -> Request {
        RequestBuilder::new()
            .method(method)
            .url(&format!("http://h{path}"))
            .build()
            .unwrap()
    }

    fn text_view(text: &'static str) -> impl View {
        move |_: &Request, _: &UrlArgs| ResponseBuilder::ok().body(text).build()
    }

    #[test]
    fn literal_and_capture_dispatch() {
        let mut router = Router::new();
        router.route(
            "/users/:id",
            |_: &Request, args: &UrlArgs| {
                ResponseBuilder::ok()
                    .body(format!("user {}", args.get("id").unwrap_or("?")))
                    .build()
            },
            &[Method::GET],
        );
        router.route("/users", text_view("created"), &[Method::POST]);

        let resp = router.dispatch(&request(Method::GET, "/users/42"));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.text(), "user 42");

        let resp = router.dispatch(&request(Method::POST, "/users"));
        assert_eq!(resp.text(), "created");
    }

    #[test]
    fn method_mismatch_yields_405_with_allow() {
        let mut router = Router::new();
        router.route("/users/:id", text_view("v1"), &[Method::GET]);

        let resp = router.dispatch(&request(Method::POST, "/users/42"));
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers().get("Allow"), Some("GET"));
    }

    #[test]
    fn unmatched_path_yields_404() {
        let mut router = Router::new();
        router.route("/users", text_view("v"), &[Method::GET]);

        let resp = router.dispatch(&request(Method::GET, "/missing"));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn first_match_wins_in_insertion_order() {
        let mut router = Router::new();
        router.route("/a/:x", text_view("capture"), &[Method::GET]);
        router.route("/a/b", text_view("literal"), &[Method::GET]);

        let resp = router.dispatch(&request(Method::GET, "/a/b"));
        assert_eq!(resp.text(), "capture");
    }

    #[test]
    fn captures_agree_by_position() {
        let mut router = Router::new();
        router.route(
            "/files/:dir/:name",
            |_: &Request, args: &UrlArgs| {
                let collected: Vec<(&str, &str)> = args.iter().collect();
                assert_eq!(collected, [("dir", "docs"), ("name", "a.txt")]);
                ResponseBuilder::ok().build()
            },
            &[Method::GET],
        );

        let resp = router.dispatch(&request(Method::GET, "/files/docs/a.txt"));
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn segment_count_must_match() {
        let mut router = Router::new();
        router.route("/a/:x", text_view("v"), &[Method::GET]);

        assert_eq!(
            router.dispatch(&request(Method::GET, "/a")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            router.dispatch(&request(Method::GET, "/a/b/c")).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn panicking_view_becomes_500() {
        let mut router = Router::new();
        router.route(
            "/boom",
            |_: &Request, _: &UrlArgs| -> Response { panic!("handler bug") },
            &[Method::GET],
        );

        let resp = router.dispatch(&request(Method::GET, "/boom"));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp.body().is_empty());
    }

    #[test]
    fn allow_header_merges_across_routes() {
        let mut router = Router::new();
        router.route("/x", text_view("a"), &[Method::GET]);
        router.route("/x", text_view("b"), &[Method::PUT, Method::GET]);

        let resp = router.dispatch(&request(Method::DELETE, "/x"));
        assert_eq!(resp.headers().get("Allow"), Some("GET, PUT"));
    }
}
