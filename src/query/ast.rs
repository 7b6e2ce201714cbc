//! Set-algebra syntax tree and evaluation.
//!
//! A parsed query is a binary tree of [`Node`]s. Evaluation walks the tree in
//! postfix order with an explicit value stack, substituting materialized sets
//! for identifiers through a caller-provided lookup closure. The walk is
//! iterative so deeply nested queries cannot overflow the call stack.

use std::collections::HashSet;
use std::hash::Hash;

/// One node of a parsed set-algebra expression.
///
/// Leaves name a set-valued key; interior nodes apply one operator to the two
/// subtrees. Operators are left-associative; intersection binds tighter than
/// union and difference (enforced by the parser, not the tree).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A key naming a set-valued cache entry.
    Value(String),
    /// `left | right`
    Union(Box<Node>, Box<Node>),
    /// `left & right`
    Intersection(Box<Node>, Box<Node>),
    /// `left - right`
    Difference(Box<Node>, Box<Node>),
}

impl Node {
    /// Collect every identifier referenced anywhere in the tree.
    pub fn keys(&self) -> HashSet<&str> {
        let mut keys = HashSet::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            match node {
                Node::Value(key) => {
                    keys.insert(key.as_str());
                }
                Node::Union(left, right)
                | Node::Intersection(left, right)
                | Node::Difference(left, right) => {
                    pending.push(left);
                    pending.push(right);
                }
            }
        }
        keys
    }

    /// Traverse the tree and return nodes in postfix order, so the infix
    /// input can be evaluated with a plain value stack.
    fn postfix_order(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            out.push(node);
            match node {
                Node::Value(_) => {}
                Node::Union(left, right)
                | Node::Intersection(left, right)
                | Node::Difference(left, right) => {
                    pending.push(left);
                    pending.push(right);
                }
            }
        }
        out.reverse();
        out
    }
}

/// Union of two sets, inserting the smaller into the bigger.
pub fn union<T: Eq + Hash>(left: HashSet<T>, right: HashSet<T>) -> HashSet<T> {
    let (small, mut big) = if left.len() <= right.len() { (left, right) } else { (right, left) };
    big.extend(small);
    big
}

/// Intersection of two sets, filtering the smaller against the bigger.
pub fn intersection<T: Eq + Hash>(left: HashSet<T>, right: HashSet<T>) -> HashSet<T> {
    let (mut small, big) = if left.len() <= right.len() { (left, right) } else { (right, left) };
    small.retain(|elem| big.contains(elem));
    small
}

/// Elements of `left` not present in `right`.
pub fn difference<T: Eq + Hash>(mut left: HashSet<T>, right: HashSet<T>) -> HashSet<T> {
    for elem in &right {
        left.remove(elem);
    }
    left
}

/// Evaluate the tree rooted at `node`, resolving each identifier through
/// `lookup_fn`. Identifiers with no materialized set must be mapped to an
/// empty set by the closure.
pub fn eval<T, F>(node: &Node, lookup_fn: F) -> HashSet<T>
where
    T: Eq + Hash,
    F: Fn(&str) -> HashSet<T>,
{
    // Postfix order guarantees both operands of every operator are already
    // on the stack when the operator is visited.
    let mut stack: Vec<HashSet<T>> = Vec::new();
    let pop2 = |stack: &mut Vec<HashSet<T>>| {
        let right = stack.pop().unwrap_or_default();
        let left = stack.pop().unwrap_or_default();
        (left, right)
    };
    for step in node.postfix_order() {
        match step {
            Node::Value(key) => stack.push(lookup_fn(key)),
            Node::Union(..) => {
                let (left, right) = pop2(&mut stack);
                stack.push(union(left, right));
            }
            Node::Intersection(..) => {
                let (left, right) = pop2(&mut stack);
                stack.push(intersection(left, right));
            }
            Node::Difference(..) => {
                let (left, right) = pop2(&mut stack);
                stack.push(difference(left, right));
            }
        }
    }
    stack.pop().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn lookup(key: &str) -> HashSet<String> {
        match key {
            "A" => set(&["x", "y"]),
            "B" => set(&["y", "z"]),
            "C" => set(&["z"]),
            _ => HashSet::new(),
        }
    }

    #[test]
    fn keys_collects_all_identifiers() {
        let node = Node::Union(
            Box::new(Node::Value("A".into())),
            Box::new(Node::Intersection(
                Box::new(Node::Value("B".into())),
                Box::new(Node::Value("C".into())),
            )),
        );
        let keys = node.keys();
        assert_eq!(keys, ["A", "B", "C"].into_iter().collect());
    }

    #[test]
    fn eval_value() {
        let node = Node::Value("A".into());
        assert_eq!(eval(&node, lookup), set(&["x", "y"]));
    }

    #[test]
    fn eval_union() {
        let node = Node::Union(
            Box::new(Node::Value("A".into())),
            Box::new(Node::Value("B".into())),
        );
        assert_eq!(eval(&node, lookup), set(&["x", "y", "z"]));
    }

    #[test]
    fn eval_intersection() {
        let node = Node::Intersection(
            Box::new(Node::Value("A".into())),
            Box::new(Node::Value("B".into())),
        );
        assert_eq!(eval(&node, lookup), set(&["y"]));
    }

    #[test]
    fn eval_difference() {
        let node = Node::Difference(
            Box::new(Node::Value("A".into())),
            Box::new(Node::Value("B".into())),
        );
        assert_eq!(eval(&node, lookup), set(&["x"]));
    }

    #[test]
    fn eval_is_left_associative() {
        // (A - B) - C, not A - (B - C).
        let node = Node::Difference(
            Box::new(Node::Difference(
                Box::new(Node::Value("A".into())),
                Box::new(Node::Value("B".into())),
            )),
            Box::new(Node::Value("C".into())),
        );
        assert_eq!(eval(&node, lookup), set(&["x"]));
    }

    #[test]
    fn eval_missing_key_is_empty() {
        let node = Node::Intersection(
            Box::new(Node::Value("A".into())),
            Box::new(Node::Value("missing".into())),
        );
        assert_eq!(eval(&node, lookup), HashSet::new());
    }

    #[test]
    fn set_ops_on_u32() {
        let left: HashSet<u32> = [1, 2, 3].into_iter().collect();
        let right: HashSet<u32> = [3, 4].into_iter().collect();
        assert_eq!(union(left.clone(), right.clone()), [1, 2, 3, 4].into_iter().collect());
        assert_eq!(intersection(left.clone(), right.clone()), [3].into_iter().collect());
        assert_eq!(difference(left, right), [1, 2].into_iter().collect());
    }
}
