//! Directory trees over a flat keyspace.
//!
//! Keys are split into directory levels on a separator. Given the sorted
//! listing below a prefix, [`build_tree`] walks it once: a key whose
//! remainder after the prefix contains the separator with something after
//! it opens a directory, and every following key under that directory is
//! consumed by the recursive call for it. Levels share the input slice and
//! only pass indices around.

use serde::Serialize;

use crate::backend::KeyValue;

/// One entry of a directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub key: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(skip_serializing_if = "is_false")]
    pub dir: bool,

    #[serde(skip_serializing_if = "is_zero")]
    pub created_index: i64,

    #[serde(skip_serializing_if = "is_zero")]
    pub modified_index: i64,

    /// Remaining lease time in seconds.
    #[serde(skip_serializing_if = "is_zero")]
    pub ttl: i64,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Node>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

impl Node {
    /// Leaf node for a stored key.
    pub fn leaf(kv: &KeyValue) -> Self {
        Self {
            key: String::from_utf8_lossy(&kv.key).into_owned(),
            value: (!kv.value.is_empty()).then(|| String::from_utf8_lossy(&kv.value).into_owned()),
            created_index: kv.create_revision,
            modified_index: kv.mod_revision,
            ..Default::default()
        }
    }

    /// Directory node with the given children.
    pub fn directory(key: &[u8], nodes: Vec<Node>) -> Self {
        Self {
            key: String::from_utf8_lossy(key).into_owned(),
            dir: true,
            nodes,
            ..Default::default()
        }
    }
}

/// Sort a listing by key and drop repeated keys.
///
/// Listings assembled from several permission ranges are only sorted
/// within each range; the tree walk needs one sorted run.
pub fn sort_listing(kvs: &mut Vec<KeyValue>) {
    kvs.sort_by(|a, b| a.key.cmp(&b.key));
    kvs.dedup_by(|a, b| a.key == b.key);
}

/// Build the nodes directly below `prefix`.
///
/// `kvs` must be sorted by key. Keys equal to `prefix` produce no node; a
/// key whose only separator is its last bytes is a leaf. An empty
/// separator makes every key a leaf.
pub fn build_tree(prefix: &[u8], separator: &[u8], kvs: &[KeyValue]) -> Vec<Node> {
    build_level(prefix, separator, kvs, 0).0
}

/// Returns the nodes of one level and how many entries it consumed.
fn build_level(
    prefix: &[u8],
    separator: &[u8],
    kvs: &[KeyValue],
    start: usize,
) -> (Vec<Node>, usize) {
    let mut nodes = Vec::new();
    let mut i = start;

    while let Some(kv) = kvs.get(i) {
        let Some(rest) = kv.key.strip_prefix(prefix) else {
            break;
        };

        match find(rest, separator) {
            Some(offset) if offset + separator.len() < rest.len() => {
                let boundary = prefix.len() + offset + separator.len();
                let dir_key = &kv.key[..boundary];
                let (children, consumed) = build_level(dir_key, separator, kvs, i);
                nodes.push(Node::directory(dir_key, children));
                i += consumed;
            }
            _ => {
                if !rest.is_empty() {
                    nodes.push(Node::leaf(kv));
                }
                i += 1;
            }
        }
    }

    (nodes, i - start)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(keys: &[&str]) -> Vec<KeyValue> {
        keys.iter()
            .enumerate()
            .map(|(i, key)| KeyValue {
                key: key.as_bytes().to_vec(),
                create_revision: i as i64 + 2,
                mod_revision: i as i64 + 2,
                version: 1,
                ..Default::default()
            })
            .collect()
    }

    fn shape(nodes: &[Node]) -> Vec<String> {
        nodes
            .iter()
            .map(|n| {
                if n.dir {
                    format!("{}[{}]", n.key, shape(&n.nodes).join(","))
                } else {
                    n.key.clone()
                }
            })
            .collect()
    }

    #[test]
    fn test_directory_and_leaf() {
        let kvs = listing(&["a/b", "a/c", "d"]);
        let nodes = build_tree(b"", b"/", &kvs);

        assert_eq!(shape(&nodes), vec!["a/[a/b,a/c]", "d"]);
        assert!(nodes[0].dir);
        assert!(!nodes[1].dir);
        assert_eq!(nodes[0].nodes[1].created_index, 3);
    }

    #[test]
    fn test_trailing_separator_is_leaf() {
        let nodes = build_tree(b"", b"/", &listing(&["a/"]));
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].key, "a/");
        assert!(!nodes[0].dir);
    }

    #[test]
    fn test_directory_marker_is_leaf_of_parent() {
        let kvs = listing(&["a/", "a/b", "a/c/", "a/c/d"]);
        let nodes = build_tree(b"", b"/", &kvs);

        // Markers sit next to their directory, never inside it.
        assert_eq!(shape(&nodes), vec!["a/", "a/[a/b,a/c/,a/c/[a/c/d]]"]);
    }

    #[test]
    fn test_key_equal_to_prefix_is_dropped() {
        let kvs = listing(&["a/", "a/b", "a/c"]);
        let nodes = build_tree(b"a/", b"/", &kvs);
        assert_eq!(shape(&nodes), vec!["a/b", "a/c"]);
    }

    #[test]
    fn test_nested_levels() {
        let kvs = listing(&["x/1/a", "x/1/b", "x/2/a", "x/3", "y"]);
        let nodes = build_tree(b"", b"/", &kvs);
        assert_eq!(
            shape(&nodes),
            vec!["x/[x/1/[x/1/a,x/1/b],x/2/[x/2/a],x/3]", "y"]
        );
    }

    #[test]
    fn test_stops_at_first_key_outside_prefix() {
        let kvs = listing(&["a/1", "a/2", "b/1"]);
        let (nodes, consumed) = build_level(b"a/", b"/", &kvs, 0);
        assert_eq!(nodes.len(), 2);
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_multibyte_separator() {
        let kvs = listing(&["app::db::host", "app::db::port", "app::name", "top"]);
        let nodes = build_tree(b"", b"::", &kvs);
        assert_eq!(
            shape(&nodes),
            vec!["app::[app::db::[app::db::host,app::db::port],app::name]", "top"]
        );

        let trailing = build_tree(b"", b"::", &listing(&["app::"]));
        assert_eq!(shape(&trailing), vec!["app::"]);
    }

    #[test]
    fn test_empty_separator_yields_leaves() {
        let nodes = build_tree(b"", b"", &listing(&["a/b", "c"]));
        assert_eq!(shape(&nodes), vec!["a/b", "c"]);
    }

    #[test]
    fn test_sort_listing_merges_ranges() {
        let mut kvs = listing(&["x", "m1", "n", "m1"]);
        sort_listing(&mut kvs);
        let keys: Vec<_> = kvs.iter().map(|kv| kv.key.clone()).collect();
        assert_eq!(keys, vec![b"m1".to_vec(), b"n".to_vec(), b"x".to_vec()]);
    }

    #[test]
    fn test_node_json_shape() {
        let dir = Node::directory(b"a/", vec![Node::leaf(&listing(&["a/b"])[0])]);
        let json = serde_json::to_value(&dir).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "key": "a/",
                "dir": true,
                "nodes": [{"key": "a/b", "createdIndex": 2, "modifiedIndex": 2}]
            })
        );
    }
}
