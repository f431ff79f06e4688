use std::collections::HashMap;
use std::sync::Arc;

use latch_checkpoint::send::SendDirective;
use serde_json::Value;

/// A static edge connecting two nodes.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Where a conditional edge sends execution next.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Schedule the node with the merged state as input.
    Node(String),
    /// Schedule the node with a private input.
    Send(SendDirective),
}

type RouteFn = dyn Fn(&Value) -> String + Send + Sync;
type FanOutFn = dyn Fn(&Value) -> Vec<SendDirective> + Send + Sync;

enum Router {
    Key {
        route_fn: Arc<RouteFn>,
        path_map: Option<HashMap<String, String>>,
    },
    FanOut {
        fan_out_fn: Arc<FanOutFn>,
        targets: Vec<String>,
    },
}

/// An edge whose targets are computed from the state after the source
/// node's superstep has been merged.
pub struct ConditionalEdge {
    pub from: String,
    router: Router,
}

impl ConditionalEdge {
    /// Create a key-routed conditional edge.
    ///
    /// - `from`: source node name
    /// - `route_fn`: synchronous function that returns a routing key
    /// - `path_map`: optional mapping from routing key to target node name
    pub fn new<F>(
        from: impl Into<String>,
        route_fn: F,
        path_map: Option<HashMap<String, String>>,
    ) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        Self {
            from: from.into(),
            router: Router::Key {
                route_fn: Arc::new(route_fn),
                path_map,
            },
        }
    }

    /// Create a fan-out edge: every directive becomes its own task.
    ///
    /// `targets` lists the nodes the function may send to; it is only used
    /// for the reachability check at compile time.
    pub fn fan_out<F, I, S>(from: impl Into<String>, fan_out_fn: F, targets: I) -> Self
    where
        F: Fn(&Value) -> Vec<SendDirective> + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            from: from.into(),
            router: Router::FanOut {
                fan_out_fn: Arc::new(fan_out_fn),
                targets: targets.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Get the path map, if any.
    pub fn path_map(&self) -> Option<&HashMap<String, String>> {
        match &self.router {
            Router::Key { path_map, .. } => path_map.as_ref(),
            Router::FanOut { .. } => None,
        }
    }

    /// Nodes this edge can reach, when known statically.
    pub fn possible_targets(&self) -> Option<Vec<&str>> {
        match &self.router {
            Router::Key { path_map, .. } => path_map
                .as_ref()
                .map(|pm| pm.values().map(String::as_str).collect()),
            Router::FanOut { targets, .. } => Some(targets.iter().map(String::as_str).collect()),
        }
    }

    /// Resolve the routes for the given state.
    pub fn resolve(&self, state: &Value) -> Vec<Route> {
        match &self.router {
            Router::Key { route_fn, path_map } => {
                let key = route_fn(state);
                let target = match path_map {
                    Some(map) => map.get(&key).cloned().unwrap_or(key),
                    None => key,
                };
                vec![Route::Node(target)]
            }
            Router::FanOut { fan_out_fn, .. } => {
                fan_out_fn(state).into_iter().map(Route::Send).collect()
            }
        }
    }
}

impl std::fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.router {
            Router::Key { .. } => "key",
            Router::FanOut { .. } => "fan_out",
        };
        f.debug_struct("ConditionalEdge")
            .field("from", &self.from)
            .field("router", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn edge_creation() {
        let edge = Edge::new("a", "b");
        assert_eq!(edge.from, "a");
        assert_eq!(edge.to, "b");
    }

    #[test]
    fn key_route_without_path_map() {
        let ce = ConditionalEdge::new(
            "router",
            |state: &Value| state["next"].as_str().unwrap_or("default").to_string(),
            None,
        );
        assert_eq!(
            ce.resolve(&json!({"next": "node_a"})),
            vec![Route::Node("node_a".into())]
        );
        assert_eq!(ce.resolve(&json!({})), vec![Route::Node("default".into())]);
        assert!(ce.possible_targets().is_none());
    }

    #[test]
    fn key_route_with_path_map() {
        let path_map = HashMap::from([
            ("yes".to_string(), "approve".to_string()),
            ("no".to_string(), "reject".to_string()),
        ]);
        let ce = ConditionalEdge::new(
            "decide",
            |state: &Value| state["answer"].as_str().unwrap_or("no").to_string(),
            Some(path_map),
        );
        assert_eq!(
            ce.resolve(&json!({"answer": "yes"})),
            vec![Route::Node("approve".into())]
        );
        // Unmapped keys fall through as node names.
        assert_eq!(
            ce.resolve(&json!({"answer": "maybe"})),
            vec![Route::Node("maybe".into())]
        );
        assert_eq!(ce.possible_targets().map(|t| t.len()), Some(2));
    }

    #[test]
    fn fan_out_emits_one_send_per_item() {
        let ce = ConditionalEdge::fan_out(
            "entry",
            |state: &Value| {
                state["items"]
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .map(|item| SendDirective::new("map_node", json!({"item": item})))
                            .collect()
                    })
                    .unwrap_or_default()
            },
            ["map_node"],
        );

        let routes = ce.resolve(&json!({"items": ["a", "b"]}));
        assert_eq!(routes.len(), 2);
        assert_eq!(
            routes[1],
            Route::Send(SendDirective::new("map_node", json!({"item": "b"})))
        );
        assert_eq!(ce.possible_targets(), Some(vec!["map_node"]));
        assert!(ce.path_map().is_none());
    }

    #[test]
    fn fan_out_with_nothing_to_send() {
        let ce = ConditionalEdge::fan_out("entry", |_: &Value| Vec::new(), ["map_node"]);
        assert!(ce.resolve(&json!({})).is_empty());
    }
}
