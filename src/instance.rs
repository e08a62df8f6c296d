//! Instances of user-defined struct types (`makeinstance`).

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::struct_type::StructType;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Instance {
    ty: Rc<StructType>,
    members: HashMap<String, Value>,
}

impl Instance {
    /// Builds an instance with every declared member present, defaulted to
    /// `Null` and then overridden by `init_args`. Keys in `init_args` that
    /// don't name a declared member are silently ignored, matching the
    /// member-driven construction loop the original uses.
    pub fn new(ty: Rc<StructType>, init_args: &HashMap<String, Value>) -> Self {
        let mut members = HashMap::with_capacity(ty.members().len());
        for name in ty.members() {
            let value = init_args.get(name).cloned().unwrap_or(Value::Null);
            members.insert(name.clone(), value);
        }
        Instance { ty, members }
    }

    pub fn ty(&self) -> &Rc<StructType> {
        &self.ty
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        self.members.get(name).ok_or_else(|| Error::UnknownMember {
            type_name: self.ty.name().to_string(),
            member: name.to_string(),
        })
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        let slot = self.members.get_mut(name).ok_or_else(|| Error::UnknownMember {
            type_name: self.ty.name().to_string(),
            member: name.to_string(),
        })?;
        *slot = value;
        Ok(())
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.members.len() == other.members.len() && self.members == other.members
    }
}

impl PartialOrd for Instance {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.members.len().partial_cmp(&other.members.len())
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance:{}", self.ty.name())
    }
}
