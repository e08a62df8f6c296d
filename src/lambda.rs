//! Closures: a parameter list, a body, and the environment captured at
//! definition time.

use std::fmt;

use crate::code_node::CodeNode;
use crate::environment::Env;

#[derive(Debug, Clone)]
pub struct Closure {
    params: Vec<String>,
    body: std::rc::Rc<CodeNode>,
    env: Env,
}

impl Closure {
    pub fn new(params: Vec<String>, body: std::rc::Rc<CodeNode>, env: Env) -> Self {
        Closure { params, body, env }
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn body(&self) -> &CodeNode {
        &self.body
    }

    pub fn env(&self) -> &Env {
        &self.env
    }
}

impl PartialEq for Closure {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params
            && std::rc::Rc::ptr_eq(&self.body, &other.body)
            && self.env.ptr_eq(&other.env)
    }
}

impl PartialOrd for Closure {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.params.len().partial_cmp(&other.params.len())
    }
}

impl fmt::Display for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Lambda]")
    }
}
