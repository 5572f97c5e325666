//! `root`: the node type `CREATE_NODE(id, "root")` instantiates (§8 scenario
//! 1). A root is otherwise an ordinary node — the crossfade, channel
//! selection, and active/inactive bookkeeping described in §4.6 live in
//! [`crate::engine::sequence::RootGainState`], owned by the runtime, not in
//! this type. All this node itself does is what any "no DSP of its own"
//! combinator would: sum its children's samples sample-for-sample.

use std::any::Any;

use crate::{
    error::PropertyError,
    node::{BlockContext, Event, GraphNode},
    resources::ResourceResolver,
    value::Value,
};

pub struct Root;

impl Root {
    pub const TYPE_NAME: &'static str = "root";

    pub fn new() -> Self {
        Root
    }
}

impl Default for Root {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphNode for Root {
    fn set_property(
        &self,
        _key: &str,
        _value: Value,
        _resources: &mut dyn ResourceResolver,
    ) -> Result<(), PropertyError> {
        Ok(())
    }

    fn get_property(&self, _key: &str) -> Option<Value> {
        None
    }

    fn process(&self, ctx: &mut BlockContext) {
        ctx.fill_silence();
        for input in ctx.inputs {
            let n = ctx.output.len().min(input.len());
            for i in 0..n {
                ctx.output[i] += input[i];
            }
        }
    }

    fn process_events(&self, _emit: &mut dyn FnMut(Event)) {}

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
