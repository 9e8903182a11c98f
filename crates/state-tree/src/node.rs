use crate::{Result, TreeError};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeKind {
    Integer,
    String,
    Compound,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Integer(i64),
    String(String),
    /// Children in insertion order; ids are unique within one compound.
    Compound(Vec<Node>),
}

/// One named node of the tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Node {
    id: String,
    value: Value,
}

impl Node {
    /// The unnamed root of a document.
    pub fn top() -> Self {
        Self::compound("")
    }

    pub fn compound(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: Value::Compound(Vec::new()),
        }
    }

    pub fn integer(id: impl Into<String>, v: i64) -> Self {
        Self {
            id: id.into(),
            value: Value::Integer(v),
        }
    }

    pub fn string(id: impl Into<String>, v: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: Value::String(v.into()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn kind(&self) -> NodeKind {
        match self.value {
            Value::Integer(_) => NodeKind::Integer,
            Value::String(_) => NodeKind::String,
            Value::Compound(_) => NodeKind::Compound,
        }
    }

    pub fn is_compound(&self) -> bool {
        self.kind() == NodeKind::Compound
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.value {
            Value::Integer(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn set_integer(&mut self, v: i64) {
        self.value = Value::Integer(v);
    }

    pub fn set_string(&mut self, v: impl Into<String>) {
        self.value = Value::String(v.into());
    }

    /// Children of a compound; empty for leaves.
    pub fn children(&self) -> &[Node] {
        match &self.value {
            Value::Compound(children) => children,
            _ => &[],
        }
    }

    fn children_mut(&mut self) -> Result<&mut Vec<Node>> {
        match &mut self.value {
            Value::Compound(children) => Ok(children),
            _ => Err(TreeError::NotCompound(self.id.clone())),
        }
    }

    /// Append a child. Fails on leaves and on an id already present.
    pub fn add(&mut self, child: Node) -> Result<&mut Node> {
        let children = self.children_mut()?;
        if children.iter().any(|c| c.id == child.id) {
            return Err(TreeError::Duplicate(child.id));
        }
        children.push(child);
        let last = children.len() - 1;
        Ok(&mut children[last])
    }

    /// Put `child` in place of the node with the same id, or append it.
    pub fn replace(&mut self, child: Node) -> Result<&mut Node> {
        let children = self.children_mut()?;
        match children.iter().position(|c| c.id == child.id) {
            Some(pos) => {
                children[pos] = child;
                Ok(&mut children[pos])
            }
            None => {
                children.push(child);
                let last = children.len() - 1;
                Ok(&mut children[last])
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Node> {
        let children = self.children_mut().ok()?;
        let pos = children.iter().position(|c| c.id == id)?;
        Some(children.remove(pos))
    }

    pub fn search(&self, id: &str) -> Option<&Node> {
        self.children().iter().find(|c| c.id == id)
    }

    pub fn search_mut(&mut self, id: &str) -> Option<&mut Node> {
        match &mut self.value {
            Value::Compound(children) => children.iter_mut().find(|c| c.id == id),
            _ => None,
        }
    }

    pub fn search_path(&self, path: &[&str]) -> Option<&Node> {
        path.iter().try_fold(self, |node, id| node.search(id))
    }

    pub fn search_path_mut(&mut self, path: &[&str]) -> Option<&mut Node> {
        let mut node = self;
        for id in path {
            node = node.search_mut(id)?;
        }
        Some(node)
    }

    /// Find the compound child `id`, creating it when absent.
    pub fn ensure_compound(&mut self, id: &str) -> Result<&mut Node> {
        let children = self.children_mut()?;
        let pos = match children.iter().position(|c| c.id == id) {
            Some(pos) => pos,
            None => {
                children.push(Node::compound(id));
                children.len() - 1
            }
        };
        let node = &mut children[pos];
        if !node.is_compound() {
            return Err(TreeError::NotCompound(node.id.clone()));
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_duplicates_and_leaves() -> anyhow::Result<()> {
        let mut top = Node::top();
        top.add(Node::integer("a", 1))?;
        assert!(matches!(
            top.add(Node::string("a", "x")),
            Err(TreeError::Duplicate(_))
        ));
        let leaf = top.search_mut("a").ok_or_else(|| anyhow::anyhow!("a"))?;
        assert!(matches!(
            leaf.add(Node::integer("b", 2)),
            Err(TreeError::NotCompound(_))
        ));
        Ok(())
    }

    #[test]
    fn replace_keeps_position() -> anyhow::Result<()> {
        let mut top = Node::top();
        top.add(Node::integer("a", 1))?;
        top.add(Node::integer("b", 2))?;
        top.add(Node::integer("c", 3))?;
        top.replace(Node::compound("b"))?;
        let ids: Vec<&str> = top.children().iter().map(|c| c.id()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert!(top.search("b").is_some_and(|b| b.is_compound()));
        Ok(())
    }

    #[test]
    fn ensure_compound_and_paths() -> anyhow::Result<()> {
        let mut top = Node::top();
        top.ensure_compound("state")?
            .ensure_compound("PCH")?
            .add(Node::string("name", "x"))?;
        assert_eq!(
            top.search_path(&["state", "PCH", "name"]).and_then(|n| n.as_str()),
            Some("x")
        );
        assert!(top.ensure_compound("state")?.ensure_compound("PCH").is_ok());
        assert!(top
            .search_path_mut(&["state", "PCH"])
            .is_some_and(|n| n.remove("name").is_some()));
        assert!(top.search_path(&["state", "PCH", "name"]).is_none());
        Ok(())
    }
}
