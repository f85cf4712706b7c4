use crate::error::GatewayError;

/// Segment-compressed routing trie.
///
/// Patterns are slash-delimited sequences of static literals, `:name`
/// parameters (exactly one segment), and a trailing `*` wildcard
/// (the remainder). Lookup walks one node per path segment, trying
/// children static > param > wildcard, and backtracks out of a param
/// branch when the rest of the path fails to match beneath it.
///
/// The trie is built during reload and immutable once published; a
/// fresh trie is constructed for every configuration change.
pub struct PathTrie<T> {
    root: Node<T>,
}

/// Path parameters captured during a lookup. The wildcard remainder is
/// recorded under the key `"*"`.
pub type Params = Vec<(String, String)>;

struct Node<T> {
    value: Option<T>,
    statics: Vec<(String, Node<T>)>,
    params: Vec<(String, Node<T>)>,
    wildcard: Option<Box<Node<T>>>,
}

impl<T> Node<T> {
    fn new() -> Self {
        Self {
            value: None,
            statics: Vec::new(),
            params: Vec::new(),
            wildcard: None,
        }
    }
}

impl<T> PathTrie<T> {
    pub fn new() -> Self {
        Self { root: Node::new() }
    }

    /// Insert a pattern. A duplicate exact pattern overwrites the
    /// previous value (last write wins). Fails when a `*` appears
    /// anywhere but the last segment.
    pub fn insert(&mut self, pattern: &str, value: T) -> Result<(), GatewayError> {
        let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();

        if let Some(pos) = segments.iter().position(|s| *s == "*") {
            if pos != segments.len() - 1 {
                return Err(GatewayError::Internal(format!(
                    "invalid pattern {pattern:?}: wildcard must be the last segment"
                )));
            }
        }

        let mut node = &mut self.root;
        for segment in segments {
            if segment == "*" {
                node = node.wildcard.get_or_insert_with(|| Box::new(Node::new()));
            } else if let Some(name) = segment.strip_prefix(':') {
                if name.is_empty() {
                    return Err(GatewayError::Internal(format!(
                        "invalid pattern {pattern:?}: unnamed parameter segment"
                    )));
                }
                let idx = match node.params.iter().position(|(n, _)| n == name) {
                    Some(i) => i,
                    None => {
                        node.params.push((name.to_string(), Node::new()));
                        node.params.len() - 1
                    }
                };
                node = &mut node.params[idx].1;
            } else {
                let idx = match node.statics.iter().position(|(s, _)| s == segment) {
                    Some(i) => i,
                    None => {
                        node.statics.push((segment.to_string(), Node::new()));
                        node.statics.len() - 1
                    }
                };
                node = &mut node.statics[idx].1;
            }
        }

        node.value = Some(value);
        Ok(())
    }

    /// Look up a path. Returns the matched value and captured params.
    /// Runs in O(segments) node steps plus any param backtracking.
    pub fn search(&self, path: &str) -> Option<(&T, Params)> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = Params::new();
        let value = Self::descend(&self.root, &segments, &mut params)?;
        Some((value, params))
    }

    fn descend<'a>(node: &'a Node<T>, segments: &[&str], params: &mut Params) -> Option<&'a T> {
        let Some((segment, rest)) = segments.split_first() else {
            return node.value.as_ref();
        };

        if let Some((_, child)) = node.statics.iter().find(|(s, _)| s == segment) {
            if let Some(v) = Self::descend(child, rest, params) {
                return Some(v);
            }
        }

        for (name, child) in &node.params {
            params.push((name.clone(), (*segment).to_string()));
            if let Some(v) = Self::descend(child, rest, params) {
                return Some(v);
            }
            params.pop();
        }

        if let Some(ref wild) = node.wildcard {
            if let Some(ref v) = wild.value {
                params.push(("*".to_string(), segments.join("/")));
                return Some(v);
            }
        }

        None
    }
}

impl<T> Default for PathTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trie(patterns: &[(&str, &str)]) -> PathTrie<String> {
        let mut t = PathTrie::new();
        for (pattern, id) in patterns {
            t.insert(pattern, id.to_string()).unwrap();
        }
        t
    }

    fn hit(t: &PathTrie<String>, path: &str) -> Option<(String, Params)> {
        t.search(path).map(|(v, p)| (v.clone(), p))
    }

    // ── Basic matching ──────────────────────────────────────────

    #[test]
    fn static_match() {
        let t = trie(&[("/api/users", "r1")]);
        let (v, params) = hit(&t, "/api/users").unwrap();
        assert_eq!(v, "r1");
        assert!(params.is_empty());
        assert!(t.search("/api").is_none());
        assert!(t.search("/api/users/42").is_none());
    }

    #[test]
    fn param_match_captures_segment() {
        let t = trie(&[("/api/users/:id", "r1")]);
        let (v, params) = hit(&t, "/api/users/42").unwrap();
        assert_eq!(v, "r1");
        assert_eq!(params, vec![("id".to_string(), "42".to_string())]);
    }

    #[test]
    fn wildcard_captures_remainder() {
        let t = trie(&[("/files/*", "r1")]);
        let (v, params) = hit(&t, "/files/a/b/c.txt").unwrap();
        assert_eq!(v, "r1");
        assert_eq!(params, vec![("*".to_string(), "a/b/c.txt".to_string())]);
    }

    #[test]
    fn wildcard_requires_at_least_one_segment() {
        let t = trie(&[("/files/*", "r1")]);
        assert!(t.search("/files").is_none());
    }

    // ── Sibling priority: static > param > wildcard ─────────────

    #[test]
    fn sibling_priority() {
        let t = trie(&[("/a/b", "static"), ("/a/:x", "param"), ("/a/*", "wild")]);

        assert_eq!(hit(&t, "/a/b").unwrap().0, "static");

        let (v, params) = hit(&t, "/a/c").unwrap();
        assert_eq!(v, "param");
        assert_eq!(params, vec![("x".to_string(), "c".to_string())]);

        let (v, params) = hit(&t, "/a/c/d").unwrap();
        assert_eq!(v, "wild");
        assert_eq!(params, vec![("*".to_string(), "c/d".to_string())]);
    }

    #[test]
    fn param_backtracks_to_wildcard() {
        // ":x" only terminates at depth 2; a three-segment path must
        // fall back out of the param branch into the wildcard.
        let t = trie(&[("/a/:x/edit", "edit"), ("/a/*", "wild")]);

        assert_eq!(hit(&t, "/a/1/edit").unwrap().0, "edit");

        let (v, params) = hit(&t, "/a/1/view").unwrap();
        assert_eq!(v, "wild");
        assert_eq!(params, vec![("*".to_string(), "1/view".to_string())]);
    }

    #[test]
    fn static_backtracks_to_param() {
        // "/a/b" exists as a static branch but only "/a/b/c" terminates;
        // "/a/b" itself must be served by the param branch.
        let t = trie(&[("/a/b/c", "deep"), ("/a/:x", "param")]);

        assert_eq!(hit(&t, "/a/b/c").unwrap().0, "deep");

        let (v, params) = hit(&t, "/a/b").unwrap();
        assert_eq!(v, "param");
        assert_eq!(params, vec![("x".to_string(), "b".to_string())]);
    }

    #[test]
    fn backtracking_discards_partial_params() {
        let t = trie(&[("/a/:x/p", "px"), ("/a/:y/q", "qy")]);

        let (v, params) = hit(&t, "/a/7/q").unwrap();
        assert_eq!(v, "qy");
        assert_eq!(
            params,
            vec![("y".to_string(), "7".to_string())],
            "the abandoned :x capture must not leak into the result"
        );
    }

    // ── Duplicate and invalid patterns ──────────────────────────

    #[test]
    fn duplicate_pattern_last_write_wins() {
        let mut t = PathTrie::new();
        t.insert("/api/users", "old".to_string()).unwrap();
        t.insert("/api/users", "new".to_string()).unwrap();
        assert_eq!(hit(&t, "/api/users").unwrap().0, "new");
    }

    #[test]
    fn interior_wildcard_is_rejected() {
        let mut t: PathTrie<String> = PathTrie::new();
        assert!(t.insert("/a/*/b", "r1".to_string()).is_err());
    }

    #[test]
    fn unnamed_param_is_rejected() {
        let mut t: PathTrie<String> = PathTrie::new();
        assert!(t.insert("/a/:/b", "r1".to_string()).is_err());
    }

    // ── Trailing slash ──────────────────────────────────────────

    #[test]
    fn trailing_slash_is_insignificant() {
        let t = trie(&[("/a/b", "r1")]);
        assert_eq!(hit(&t, "/a/b").unwrap(), hit(&t, "/a/b/").unwrap());

        let t = trie(&[("/a/b/", "r1")]);
        assert_eq!(hit(&t, "/a/b").unwrap().0, "r1");
    }

    #[test]
    fn root_pattern() {
        let t = trie(&[("/", "root")]);
        assert_eq!(hit(&t, "/").unwrap().0, "root");
        assert!(t.search("/a").is_none());
    }

    // ── Insert-then-extend stability ────────────────────────────

    #[test]
    fn earlier_inserts_survive_later_ones() {
        let mut t = PathTrie::new();
        t.insert("/api/users", "r1".to_string()).unwrap();
        t.insert("/api/users/:id", "r2".to_string()).unwrap();
        t.insert("/api/users/:id/posts/*", "r3".to_string()).unwrap();
        t.insert("/health", "r4".to_string()).unwrap();

        assert_eq!(hit(&t, "/api/users").unwrap().0, "r1");
        assert_eq!(hit(&t, "/api/users/9").unwrap().0, "r2");
        let (v, params) = hit(&t, "/api/users/9/posts/2024/01").unwrap();
        assert_eq!(v, "r3");
        assert_eq!(
            params,
            vec![
                ("id".to_string(), "9".to_string()),
                ("*".to_string(), "2024/01".to_string()),
            ]
        );
        assert_eq!(hit(&t, "/health").unwrap().0, "r4");
    }
}
