// src/router/mod.rs
//
// Radix-tree router (spec §4.6). Segment syntax: `{name}` captures one
// path segment as a param; `*name` captures the remainder of the path
// (every segment from its position to the end) as a single wildcard
// value. A node holds at most one param child and one wildcard child;
// match order at each position is static (longest-prefix) children
// first, then param, then wildcard.

use std::collections::HashMap;

use crate::http1::types::{Context, Method, Response, MAX_PARAMS};

pub type Handler = fn(Context) -> Response;
pub type MiddlewareFn = fn(Context, Handler) -> Response;

/// `(handler, params, param_count)`.
pub type RouteMatch<'a> = (&'a Handler, [(&'a str, &'a str); MAX_PARAMS], u8);

#[derive(Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    Static,
    Param,
    Wildcard,
}

#[derive(Clone)]
pub struct RouteNode {
    pub segment: String,
    kind: SegmentKind,
    param_name: Option<String>,
    pub handlers: HashMap<Method, Handler>,
    pub children: Vec<RouteNode>,
}

impl RouteNode {
    fn new(segment: String, kind: SegmentKind, param_name: Option<String>) -> Self {
        Self { segment, kind, param_name, handlers: HashMap::new(), children: Vec::new() }
    }
}

/// Byte-range (start, end) of each non-empty `/`-delimited segment,
/// preserving exact offsets into `path` so the wildcard branch can slice
/// the true remainder instead of rejoining segment copies.
fn segment_spans(path: &str) -> Vec<(usize, usize)> {
    let bytes = path.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && bytes[i] == b'/' {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && bytes[i] != b'/' {
            i += 1;
        }
        if i > start {
            spans.push((start, i));
        }
    }
    spans
}

fn parse_segment(raw: &str) -> (SegmentKind, Option<String>, String) {
    if raw.starts_with('{') && raw.ends_with('}') && raw.len() >= 2 {
        (SegmentKind::Param, Some(raw[1..raw.len() - 1].to_string()), String::new())
    } else if let Some(name) = raw.strip_prefix('*') {
        (SegmentKind::Wildcard, Some(name.to_string()), String::new())
    } else {
        (SegmentKind::Static, None, raw.to_string())
    }
}

#[derive(Clone)]
pub struct Router {
    root: RouteNode,
    global_middleware: Option<MiddlewareFn>,
}

impl Router {
    pub fn new() -> Self {
        Self { root: RouteNode::new(String::new(), SegmentKind::Static, None), global_middleware: None }
    }

    /// Registers `handler` for `method` at `path`. Panics on a static
    /// segment colliding with an existing param/wildcard child at the
    /// same position, or on a duplicate `(method, path)` registration —
    /// both are configuration errors caught at startup, not runtime.
    pub fn add(&mut self, method: Method, path: &str, handler: Handler) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = &mut self.root;

        for raw in segments {
            let (kind, param_name, static_text) = parse_segment(raw);

            let found_idx = current.children.iter().position(|child| match (child.kind, kind) {
                (SegmentKind::Static, SegmentKind::Static) => child.segment == static_text,
                (SegmentKind::Param, SegmentKind::Param) => true,
                (SegmentKind::Wildcard, SegmentKind::Wildcard) => true,
                _ => false,
            });

            if let Some(idx) = found_idx {
                current = &mut current.children[idx];
                continue;
            }

            // Registering a param or wildcard here is always fine (a
            // node holds at most one of each, enforced by `found_idx`
            // above reusing the existing one). A *static* segment that
            // would land alongside an existing param/wildcard child is
            // the one rejected collision.
            if kind == SegmentKind::Static
                && current.children.iter().any(|c| c.kind == SegmentKind::Param || c.kind == SegmentKind::Wildcard)
            {
                panic!("router: static segment collides with existing param/wildcard registering {path}");
            }

            let node = RouteNode::new(static_text, kind, param_name);
            current.children.push(node);
            current = current.children.last_mut().unwrap();
        }

        if current.handlers.insert(method, handler).is_some() {
            panic!("router: duplicate route registration for {path}");
        }
    }

    pub fn match_route<'a>(&'a self, method: Method, path: &'a str) -> Option<RouteMatch<'a>> {
        let spans = segment_spans(path);
        let mut params = [("", ""); MAX_PARAMS];
        let mut param_count: u8 = 0;

        let handler = self.match_recursive(&self.root, method, path, &spans, 0, &mut params, &mut param_count);
        handler.map(|h| (h, params, param_count))
    }

    fn match_recursive<'a>(
        &'a self,
        node: &'a RouteNode,
        method: Method,
        path: &'a str,
        spans: &[(usize, usize)],
        depth: usize,
        params: &mut [(&'a str, &'a str); MAX_PARAMS],
        param_count: &mut u8,
    ) -> Option<&'a Handler> {
        if depth == spans.len() {
            return node.handlers.get(&method);
        }

        let (s, e) = spans[depth];
        let segment = &path[s..e];

        // `add` guarantees at most one static child shares a given
        // segment text at any node, so there is never more than one
        // candidate to try here — no per-match allocation needed.
        if let Some(child) = node.children.iter().find(|c| c.kind == SegmentKind::Static && c.segment == segment) {
            if let Some(handler) = self.match_recursive(child, method, path, spans, depth + 1, params, param_count) {
                return Some(handler);
            }
        }

        if let Some(child) = node.children.iter().find(|c| c.kind == SegmentKind::Param) {
            let old_count = *param_count;
            if (*param_count as usize) < MAX_PARAMS {
                if let Some(name) = &child.param_name {
                    params[*param_count as usize] = (name.as_str(), segment);
                    *param_count += 1;
                }
            }
            if let Some(handler) = self.match_recursive(child, method, path, spans, depth + 1, params, param_count) {
                return Some(handler);
            }
            *param_count = old_count;
        }

        if let Some(child) = node.children.iter().find(|c| c.kind == SegmentKind::Wildcard) {
            if (*param_count as usize) < MAX_PARAMS {
                if let Some(name) = &child.param_name {
                    // The wildcard consumes every remaining segment as
                    // one value: the exact substring of `path` from the
                    // start of this segment to the end.
                    let remainder_start = spans[depth].0;
                    params[*param_count as usize] = (name.as_str(), &path[remainder_start..]);
                    *param_count += 1;
                }
            }
            return child.handlers.get(&method);
        }

        None
    }

    pub fn wrap(&mut self, mw: MiddlewareFn) {
        self.global_middleware = Some(mw);
    }

    pub fn middleware(&self) -> Option<MiddlewareFn> {
        self.global_middleware
    }

    pub fn get(&mut self, path: &str, handler: Handler) {
        self.add(Method::Get, path, handler);
    }
    pub fn post(&mut self, path: &str, handler: Handler) {
        self.add(Method::Post, path, handler);
    }
    pub fn put(&mut self, path: &str, handler: Handler) {
        self.add(Method::Put, path, handler);
    }
    pub fn delete(&mut self, path: &str, handler: Handler) {
        self.add(Method::Delete, path, handler);
    }
    pub fn patch(&mut self, path: &str, handler: Handler) {
        self.add(Method::Patch, path, handler);
    }
    pub fn head(&mut self, path: &str, handler: Handler) {
        self.add(Method::Head, path, handler);
    }
    pub fn options(&mut self, path: &str, handler: Handler) {
        self.add(Method::Options, path, handler);
    }
    pub fn trace(&mut self, path: &str, handler: Handler) {
        self.add(Method::Trace, path, handler);
    }
    pub fn connect(&mut self, path: &str, handler: Handler) {
        self.add(Method::Connect, path, handler);
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_handler(ctx: Context) -> Response {
        Response::ok(ctx.req.path.to_string())
    }

    #[test]
    fn static_routes_match_exactly() {
        let mut router = Router::new();
        router.get("/hello/world", test_handler);

        assert!(router.match_route(Method::Get, "/hello/world").is_some());
        assert!(router.match_route(Method::Get, "/hello").is_none());
        assert!(router.match_route(Method::Post, "/hello/world").is_none());
    }

    #[test]
    fn param_segments_capture_one_component() {
        let mut router = Router::new();
        router.get("/users/{id}", test_handler);
        router.post("/users/{id}/posts/{post_id}", test_handler);

        let (_, params1, _) = router.match_route(Method::Get, "/users/123").unwrap();
        assert_eq!(params1.iter().find(|(k, _)| *k == "id").map(|(_, v)| *v), Some("123"));

        let (_, params2, _) = router.match_route(Method::Post, "/users/123/posts/abc").unwrap();
        assert_eq!(params2.iter().find(|(k, _)| *k == "id").map(|(_, v)| *v), Some("123"));
        assert_eq!(params2.iter().find(|(k, _)| *k == "post_id").map(|(_, v)| *v), Some("abc"));
    }

    #[test]
    fn wildcard_captures_path_remainder() {
        let mut router = Router::new();
        router.get("/assets/*path", test_handler);

        let (_, params, _) = router.match_route(Method::Get, "/assets/js/app.js").unwrap();
        assert_eq!(params.iter().find(|(k, _)| *k == "path").map(|(_, v)| *v), Some("js/app.js"));
    }

    #[test]
    fn static_takes_precedence_over_param() {
        let mut router = Router::new();
        router.get("/users/me", test_handler);
        router.get("/users/{id}", test_handler);

        assert!(router.match_route(Method::Get, "/users/me").is_some());
        let (_, params, _) = router.match_route(Method::Get, "/users/42").unwrap();
        assert_eq!(params.iter().find(|(k, _)| *k == "id").map(|(_, v)| *v), Some("42"));
    }
}
