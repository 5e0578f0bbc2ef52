use std::sync::RwLock;

/// A known peer address.
#[derive(Clone)]
pub struct Node {
    addr: String,
}

impl Node {
    fn new(addr: String) -> Node {
        Node { addr }
    }

    pub fn get_addr(&self) -> String {
        self.addr.clone()
    }
}

/// The known-peer set. Insertion order is kept: the first entry is the
/// central relay. Membership is best-effort — a peer evicted after a failed
/// send may be re-added by its next `version` message.
pub struct Nodes {
    inner: RwLock<Vec<Node>>,
}

impl Default for Nodes {
    fn default() -> Self {
        Self::new()
    }
}

impl Nodes {
    pub fn new() -> Nodes {
        Nodes {
            inner: RwLock::new(vec![]),
        }
    }

    pub fn add_node(&self, addr: String) {
        let mut inner = self.inner.write().expect("known-peer lock poisoned");
        if !inner.iter().any(|x| x.get_addr().eq(addr.as_str())) {
            inner.push(Node::new(addr));
        }
    }

    pub fn evict_node(&self, addr: &str) {
        let mut inner = self.inner.write().expect("known-peer lock poisoned");
        if let Some(idx) = inner.iter().position(|x| x.get_addr().eq(addr)) {
            inner.remove(idx);
        }
    }

    pub fn first(&self) -> Option<Node> {
        let inner = self.inner.read().expect("known-peer lock poisoned");
        inner.first().cloned()
    }

    pub fn get_nodes(&self) -> Vec<Node> {
        self.inner
            .read()
            .expect("known-peer lock poisoned")
            .to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("known-peer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .read()
            .expect("known-peer lock poisoned")
            .is_empty()
    }

    pub fn node_is_known(&self, addr: &str) -> bool {
        let inner = self.inner.read().expect("known-peer lock poisoned");
        inner.iter().any(|x| x.get_addr().eq(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let nodes = Nodes::new();
        nodes.add_node("127.0.0.1:2001".to_string());
        nodes.add_node("127.0.0.1:2001".to_string());
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn first_is_insertion_order() {
        let nodes = Nodes::new();
        nodes.add_node("127.0.0.1:2001".to_string());
        nodes.add_node("127.0.0.1:2002".to_string());
        assert_eq!(nodes.first().unwrap().get_addr(), "127.0.0.1:2001");
    }

    #[test]
    fn evict_removes_membership() {
        let nodes = Nodes::new();
        nodes.add_node("127.0.0.1:2002".to_string());
        assert!(nodes.node_is_known("127.0.0.1:2002"));
        nodes.evict_node("127.0.0.1:2002");
        assert!(!nodes.node_is_known("127.0.0.1:2002"));
    }
}
