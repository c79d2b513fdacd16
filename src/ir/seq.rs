//! Sequence nodes: the containers that hold ordered lists of [`Command`]s.

use crate::ir::cmd::Command;

#[derive(Debug, Clone, PartialEq)]
pub enum Sequence {
    /// A nested sequence, used for branch/loop bodies.
    Seq { cmds: Vec<Command> },
    /// The root of a user-defined script: declares the ordered names of its
    /// positional keys and args.
    Script {
        cmds: Vec<Command>,
        argv: Vec<String>,
        keyv: Vec<String>,
    },
    /// Reserved for future nested function definitions. Unimplemented by
    /// every backend — translating one is a [`crate::error::CompileError`].
    Function { cmds: Vec<Command>, argc: usize },
}

impl Sequence {
    pub fn cmds(&self) -> &[Command] {
        match self {
            Sequence::Seq { cmds } => cmds,
            Sequence::Script { cmds, .. } => cmds,
            Sequence::Function { cmds, .. } => cmds,
        }
    }
}
