//! Breaking reference cycles when a [`LuaState`](crate::LuaState) is dropped.
//!
//! Values are reference counted, so a table that is its own metatable or a
//! closure stored in its own environment would outlive the state. On drop the
//! state walks everything reachable from its tracked tables and upvalue
//! cells and counts the references those objects hold on each other. An
//! object with more strong references than that is held by the host: it and
//! everything it reaches are left alone. The remaining tables are emptied and
//! the remaining cells closed over nil, which frees the cycles.

use crate::function::{LuaClosure, NativeFunction, Upvalue, UpvalueInner};
use crate::thread::LuaThread;
use crate::userdata::LuaUserdata;
use crate::value::{LuaValue, TableRef};
use indexmap::IndexMap;
use std::sync::Arc;

enum Node {
    Table(TableRef),
    Closure(Arc<LuaClosure>),
    Native(Arc<NativeFunction>),
    Userdata(Arc<LuaUserdata>),
    Thread(LuaThread),
    Cell(Upvalue),
}

impl Node {
    fn from_value(v: &LuaValue) -> Option<Node> {
        Some(match v {
            LuaValue::Table(t) => Node::Table(t.clone()),
            LuaValue::Closure(c) => Node::Closure(c.clone()),
            LuaValue::NativeFunction(f) => Node::Native(f.clone()),
            LuaValue::Userdata(u) => Node::Userdata(u.clone()),
            LuaValue::Thread(t) => Node::Thread(t.clone()),
            _ => return None,
        })
    }

    fn address(&self) -> usize {
        match self {
            Node::Table(t) => Arc::as_ptr(t) as *const () as usize,
            Node::Closure(c) => Arc::as_ptr(c) as *const () as usize,
            Node::Native(f) => Arc::as_ptr(f) as *const () as usize,
            Node::Userdata(u) => Arc::as_ptr(u) as *const () as usize,
            Node::Thread(t) => t.identity(),
            Node::Cell(c) => Arc::as_ptr(&c.0) as *const () as usize,
        }
    }

    fn strong_count(&self) -> usize {
        match self {
            Node::Table(t) => Arc::strong_count(t),
            Node::Closure(c) => Arc::strong_count(c),
            Node::Native(f) => Arc::strong_count(f),
            Node::Userdata(u) => Arc::strong_count(u),
            Node::Thread(t) => Arc::strong_count(&t.0),
            Node::Cell(c) => Arc::strong_count(&c.0),
        }
    }

    /// Objects this one holds a strong reference to, once per reference.
    /// Captures inside native closures are invisible here, which only makes
    /// their targets look host-held.
    fn children(&self) -> Vec<Node> {
        let mut out = Vec::new();
        match self {
            Node::Table(t) => {
                let t = t.read();
                out.extend(t.values_held().filter_map(Node::from_value));
                out.extend(t.metatable().map(Node::Table));
            }
            Node::Closure(c) => {
                out.push(Node::Table(c.env()));
                out.extend(c.upvalues.iter().cloned().map(Node::Cell));
            }
            Node::Native(f) => out.push(Node::Table(f.env())),
            Node::Userdata(u) => out.extend(u.metatable().map(Node::Table)),
            Node::Thread(t) => out.push(Node::Table(t.env())),
            Node::Cell(c) => {
                if let UpvalueInner::Closed(v) = &*c.0.lock() {
                    out.extend(Node::from_value(v));
                }
            }
        }
        out
    }
}

/// Clear the tables and cells in `tables`/`cells` (and anything they reach)
/// that no outside reference can reach. Returns how many tables were
/// cleared.
pub(crate) fn break_cycles(tables: Vec<TableRef>, cells: Vec<Upvalue>) -> usize {
    let mut nodes: IndexMap<usize, Node> = IndexMap::new();
    let mut pending: Vec<Node> = tables
        .into_iter()
        .map(Node::Table)
        .chain(cells.into_iter().map(Node::Cell))
        .collect();
    while let Some(node) = pending.pop() {
        let addr = node.address();
        if nodes.contains_key(&addr) {
            continue;
        }
        pending.extend(node.children());
        nodes.insert(addr, node);
    }

    let edges: Vec<Vec<usize>> = nodes
        .values()
        .map(|n| n.children().iter().map(Node::address).collect())
        .collect();
    let mut internal = vec![0usize; nodes.len()];
    for addr in edges.iter().flatten() {
        if let Some(i) = nodes.get_index_of(addr) {
            internal[i] += 1;
        }
    }

    // `nodes` itself holds one reference to each object
    let mut reachable = vec![false; nodes.len()];
    let mut stack: Vec<usize> = nodes
        .values()
        .enumerate()
        .filter(|&(i, n)| n.strong_count() > internal[i] + 1)
        .map(|(i, _)| i)
        .collect();
    while let Some(i) = stack.pop() {
        if std::mem::replace(&mut reachable[i], true) {
            continue;
        }
        stack.extend(edges[i].iter().filter_map(|a| nodes.get_index_of(a)));
    }

    let mut cleared = 0;
    for (node, _) in nodes.values().zip(&reachable).filter(|&(_, &r)| !r) {
        match node {
            Node::Table(t) => {
                let contents = std::mem::take(&mut *t.write());
                drop(contents);
                cleared += 1;
            }
            Node::Cell(c) => {
                let old = std::mem::replace(&mut *c.0.lock(), UpvalueInner::Closed(LuaValue::Nil));
                drop(old);
            }
            _ => {}
        }
    }
    cleared
}
